use tracing::info;

use crate::context::RunContext;
use crate::error::RunError;
use crate::task::BoxedTask;
use crate::transport::RemoteHost;

/// Drives the check-then-apply loop over one host's tasks, strictly in order.
#[derive(Debug, Clone, Default)]
pub struct Runner;

impl Runner {
    pub fn new() -> Self {
        Self
    }

    /// Stops at the first failing check or apply; later tasks are never touched.
    pub async fn run(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
        tasks: &[BoxedTask],
    ) -> Result<(), RunError> {
        for task in tasks {
            let name = task.name();
            info!(task = %name, server = host.id(), "processing task");

            let needs = task
                .needs_execution(ctx, host)
                .await
                .map_err(|source| RunError::Check {
                    task: name.clone(),
                    source,
                })?;
            if !needs {
                info!(task = %name, server = host.id(), "task already satisfied");
                continue;
            }

            info!(task = %name, server = host.id(), "applying task");
            task.execute(ctx, host)
                .await
                .map_err(|source| RunError::Apply {
                    task: name.clone(),
                    source,
                })?;
            info!(task = %name, server = host.id(), "task applied");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::transport::MockHost;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Scripted {
        name: &'static str,
        needs: bool,
        fail_check: bool,
        fail_apply: bool,
        checks: AtomicUsize,
        applies: AtomicUsize,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl Scripted {
        fn record(&self, what: &str) {
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("{}:{what}", self.name));
            }
        }
    }

    #[async_trait]
    impl Task for Arc<Scripted> {
        fn name(&self) -> String {
            self.name.to_string()
        }
        async fn needs_execution(&self, _: &RunContext, _: &dyn RemoteHost) -> anyhow::Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.record("check");
            if self.fail_check {
                anyhow::bail!("scripted check failed");
            }
            Ok(self.needs)
        }
        async fn execute(&self, _: &RunContext, _: &dyn RemoteHost) -> anyhow::Result<()> {
            self.applies.fetch_add(1, Ordering::SeqCst);
            self.record("apply");
            if self.fail_apply {
                anyhow::bail!("scripted apply failed");
            }
            Ok(())
        }
    }

    fn boxed(task: &Arc<Scripted>) -> BoxedTask {
        Box::new(task.clone())
    }

    #[tokio::test]
    async fn satisfied_task_is_never_applied() {
        let task = Arc::new(Scripted {
            name: "noop",
            ..Default::default()
        });
        Runner::new()
            .run(&RunContext::new(), &MockHost::new("h"), &[boxed(&task)])
            .await
            .unwrap();
        assert_eq!(task.checks.load(Ordering::SeqCst), 1);
        assert_eq!(task.applies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn apply_failure_stops_remaining_tasks() {
        let failing = Arc::new(Scripted {
            name: "first",
            needs: true,
            fail_apply: true,
            ..Default::default()
        });
        let after = Arc::new(Scripted {
            name: "second",
            needs: true,
            ..Default::default()
        });

        let err = Runner::new()
            .run(
                &RunContext::new(),
                &MockHost::new("h"),
                &[boxed(&failing), boxed(&after)],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Apply { .. }));
        assert_eq!(err.task(), "first");
        assert_eq!(
            err.to_string(),
            "failed to execute task \"first\": scripted apply failed"
        );
        assert_eq!(after.checks.load(Ordering::SeqCst), 0);
        assert_eq!(after.applies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn check_failure_is_wrapped_with_task_name() {
        let failing = Arc::new(Scripted {
            name: "broken",
            fail_check: true,
            ..Default::default()
        });
        let err = Runner::new()
            .run(&RunContext::new(), &MockHost::new("h"), &[boxed(&failing)])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Check { ref task, .. } if task == "broken"));
        assert_eq!(failing.applies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_apply_directly_follows_its_check() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scripted: Vec<Arc<Scripted>> = ["a", "b", "c"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                Arc::new(Scripted {
                    name,
                    needs: i != 1,
                    log: Some(log.clone()),
                    ..Default::default()
                })
            })
            .collect();
        let tasks: Vec<BoxedTask> = scripted.iter().map(boxed).collect();

        Runner::new()
            .run(&RunContext::new(), &MockHost::new("h"), &tasks)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:check", "a:apply", "b:check", "c:check", "c:apply"]
        );
    }
}
