//! Layered configuration and task planning.
//!
//! Per-key built-in defaults are merged with caller overrides, then decoded by each
//! registered builder into an ordered task list.
mod catalog;
mod merge;
mod planner;

pub use catalog::DefaultsCatalog;
pub use merge::merge_config;
pub use planner::{plan_tasks, plan_tasks_with, Plan, TaskSpec};
