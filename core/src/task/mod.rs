//! Task contract and the key → builder registry.
mod builder;
mod traits;

pub use builder::{create_tasks, decode_config, Builder, Handler};
pub use traits::{BoxedTask, Task};

/// Untyped nested configuration map shared by defaults and overrides.
pub type ConfigTree = serde_json::Map<String, serde_json::Value>;
pub type ConfigValue = serde_json::Value;
