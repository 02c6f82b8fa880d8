use std::collections::{BTreeSet, HashSet};

use serde::de::DeserializeOwned;
use tracing::debug;

use super::catalog::DefaultsCatalog;
use super::merge::merge_config;
use crate::error::PlanError;
use crate::task::{create_tasks, BoxedTask, Builder, ConfigTree, ConfigValue};

/// Registration of one configuration key.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub key: String,
    /// Resource id in the defaults catalog. `None` means the key has no defaults.
    pub defaults: Option<&'static str>,
    pub builder: Builder,
}

impl TaskSpec {
    pub fn new(key: impl Into<String>, defaults: Option<&'static str>, builder: Builder) -> Self {
        Self {
            key: key.into(),
            defaults,
            builder,
        }
    }

    pub fn typed<T, F>(key: &str, defaults: Option<&'static str>, build: F) -> Self
    where
        T: DeserializeOwned + Default,
        F: Fn(T) -> anyhow::Result<Vec<BoxedTask>> + Send + Sync + 'static,
    {
        Self::new(key, defaults, Builder::typed(key, build))
    }
}

/// Ordered tasks plus the top-level keys nothing claimed.
#[derive(Default)]
pub struct Plan {
    pub tasks: Vec<BoxedTask>,
    pub unknown_keys: Vec<String>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("tasks", &self.task_names())
            .field("unknown_keys", &self.unknown_keys)
            .finish()
    }
}

impl Plan {
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name()).collect()
    }
}

/// Plans against the built-in defaults catalog.
pub fn plan_tasks(overrides: &ConfigTree, specs: &[TaskSpec]) -> Result<Plan, PlanError> {
    plan_tasks_with(DefaultsCatalog::builtin(), overrides, specs)
}

/// Merges each spec's defaults with `overrides[spec.key]` and builds tasks in spec order.
///
/// Any failure aborts the whole call; no partial task list is returned.
pub fn plan_tasks_with(
    catalog: &DefaultsCatalog,
    overrides: &ConfigTree,
    specs: &[TaskSpec],
) -> Result<Plan, PlanError> {
    let mut index = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !index.insert(spec.key.as_str()) {
            return Err(PlanError::DuplicateKey(spec.key.clone()));
        }
    }

    let mut unknown: BTreeSet<String> = overrides
        .keys()
        .filter(|key| !index.contains(key.as_str()))
        .cloned()
        .collect();

    let mut state = ConfigTree::new();
    for spec in specs {
        let defaults = match spec.defaults {
            Some(id) => Some(catalog.load(&spec.key, id)?),
            None => None,
        };
        let merged = merge_config(defaults.as_ref(), overrides.get(&spec.key));
        state.insert(spec.key.clone(), merged.unwrap_or(ConfigValue::Null));
    }

    let builders: Vec<Builder> = specs.iter().map(|s| s.builder.clone()).collect();
    let (tasks, residue) = create_tasks(&state, &builders)?;
    unknown.extend(residue);

    debug!(tasks = tasks.len(), unknown = unknown.len(), "planned tasks");
    Ok(Plan {
        tasks,
        unknown_keys: unknown.into_iter().collect(),
    })
}
