use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;

use super::{BoxedTask, ConfigTree, ConfigValue};
use crate::error::PlanError;

/// Turns one untyped config value into zero or more tasks.
pub type Handler = Arc<dyn Fn(Option<ConfigValue>) -> anyhow::Result<Vec<BoxedTask>> + Send + Sync>;

/// Ties a configuration key to its handler.
#[derive(Clone)]
pub struct Builder {
    pub key: String,
    pub handler: Handler,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Builder {
    pub fn new<F>(key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<ConfigValue>) -> anyhow::Result<Vec<BoxedTask>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            handler: Arc::new(handler),
        }
    }

    /// Builder that decodes the raw value into `T` before calling `build`.
    pub fn typed<T, F>(key: impl Into<String>, build: F) -> Self
    where
        T: DeserializeOwned + Default,
        F: Fn(T) -> anyhow::Result<Vec<BoxedTask>> + Send + Sync + 'static,
    {
        Self::new(key, move |raw| build(decode_config::<T>(raw)?))
    }
}

/// Decodes an untyped value into a typed config. Absent or null yields `T::default()`.
pub fn decode_config<T>(raw: Option<ConfigValue>) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    match raw {
        None | Some(ConfigValue::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).context("decode config"),
    }
}

/// Runs each builder whose key is present in `state`, in builder order.
///
/// Returns the tasks and the sorted list of keys in `state` that no builder claims.
pub fn create_tasks(
    state: &ConfigTree,
    builders: &[Builder],
) -> Result<(Vec<BoxedTask>, Vec<String>), PlanError> {
    let mut seen = HashSet::with_capacity(builders.len());
    for builder in builders {
        if !seen.insert(builder.key.as_str()) {
            return Err(PlanError::DuplicateKey(builder.key.clone()));
        }
    }

    let mut tasks = Vec::new();
    for builder in builders {
        let Some(value) = state.get(&builder.key) else {
            continue;
        };
        let built = (builder.handler)(Some(value.clone())).map_err(|source| PlanError::Build {
            key: builder.key.clone(),
            source,
        })?;
        tasks.extend(built);
    }

    let mut unknown: Vec<String> = state
        .keys()
        .filter(|key| !seen.contains(key.as_str()))
        .cloned()
        .collect();
    unknown.sort();
    Ok((tasks, unknown))
}
