use thiserror::Error;

/// Planning failures. Any of these aborts the planning call and yields no tasks.
#[derive(Error, Debug)]
pub enum PlanError {
    /// Two specs registered under the same key. A programming error, not bad input.
    #[error("duplicate task key: {0}")]
    DuplicateKey(String),

    #[error("load defaults for {key}: {reason}")]
    Defaults { key: String, reason: String },

    #[error("failed to create tasks for {key}: {source:#}")]
    Build {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PlanError {
    pub fn key(&self) -> &str {
        match self {
            Self::DuplicateKey(key) => key,
            Self::Defaults { key, .. } | Self::Build { key, .. } => key,
        }
    }
}
