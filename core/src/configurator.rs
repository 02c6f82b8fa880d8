//! Per-host binding of a runner to a fixed task list.
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::RunError;
use crate::runner::Runner;
use crate::task::BoxedTask;
use crate::transport::RemoteHost;

/// Brings one host to its configured state.
#[async_trait]
pub trait Configurator: Send + Sync {
    async fn configure(&self, ctx: &RunContext, host: &dyn RemoteHost) -> Result<(), RunError>;
}

pub struct TaskConfigurator {
    runner: Arc<Runner>,
    tasks: Vec<BoxedTask>,
}

impl TaskConfigurator {
    pub fn new(runner: Arc<Runner>, tasks: Vec<BoxedTask>) -> Self {
        Self { runner, tasks }
    }

    pub fn tasks(&self) -> &[BoxedTask] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl Configurator for TaskConfigurator {
    async fn configure(&self, ctx: &RunContext, host: &dyn RemoteHost) -> Result<(), RunError> {
        self.runner.run(ctx, host, &self.tasks).await
    }
}
