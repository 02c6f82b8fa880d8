use async_trait::async_trait;

use crate::context::RunContext;
use crate::transport::RemoteHost;

/// A check-then-apply unit of remote configuration.
///
/// `execute` must establish the state `needs_execution` checks for. Implementations may cache
/// something discovered during the check (a resolved path, say), but `execute` has to work
/// without it.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> String;
    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost)
        -> anyhow::Result<bool>;
    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()>;
}

pub type BoxedTask = Box<dyn Task>;
