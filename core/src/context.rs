//! Cancellation and deadline propagation for one run.
//!
//! A `RunContext` is threaded from the configurator through the runner and every task down to
//! each transport call. Cancelling it (or letting its deadline pass) tears down whatever
//! connection is in flight.
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CancelCause;

#[derive(Clone, Debug, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context that also stops once `timeout` elapses.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the earlier of the parent's deadline and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child context cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context stopped, or `None` while it is still live.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.token.is_cancelled() {
            return Some(CancelCause::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CancelCause {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => CancelCause::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelCause::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let root = RunContext::new();
        let child = root.child();
        assert!(!child.is_done());

        root.cancel();
        assert_eq!(child.cause(), Some(CancelCause::Cancelled));
        assert_eq!(child.done().await, CancelCause::Cancelled);
    }

    #[tokio::test]
    async fn child_cancel_does_not_reach_parent() {
        let root = RunContext::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn earlier_deadline_wins() {
        let root = RunContext::new().with_timeout(Duration::from_millis(50));
        let child = root.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), root.deadline());

        let cause = child.done().await;
        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert_eq!(child.cause(), Some(CancelCause::DeadlineExceeded));
    }
}
