//! Host convergence over SSH: layered task planning, a check-then-apply runner and the
//! transport every task uses to reach its host.
pub mod config;
pub mod configurator;
pub mod context;
pub mod error;
pub mod plan;
pub mod runner;
pub mod task;
pub mod transport;
pub mod util;

pub use configurator::{Configurator, TaskConfigurator};
pub use context::RunContext;
pub use plan::{plan_tasks, plan_tasks_with, DefaultsCatalog, Plan, TaskSpec};
pub use runner::Runner;
pub use task::{BoxedTask, Builder, ConfigTree, ConfigValue, Task};
pub use transport::RemoteHost;
