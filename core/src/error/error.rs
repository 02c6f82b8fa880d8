use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single target's run. Carries the name of the task that stopped it.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to check if task {task:?} needs execution: {source:#}")]
    Check {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to execute task {task:?}: {source:#}")]
    Apply {
        task: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RunError {
    pub fn task(&self) -> &str {
        match self {
            Self::Check { task, .. } | Self::Apply { task, .. } => task,
        }
    }

    pub fn source_error(&self) -> &anyhow::Error {
        match self {
            Self::Check { source, .. } | Self::Apply { source, .. } => source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid server entry #{index}: {reason}")]
    Server { index: usize, reason: String },
}
