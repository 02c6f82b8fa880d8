use thiserror::Error;

use settled_core::error::ConfigError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{} target(s) failed: {}", failed.len(), failed.join(", "))]
    TargetsFailed { failed: Vec<String> },
    #[error("internal error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    /// 0 ok, 11 configuration, 20 target failures, 50 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Logging(_) | Self::InvalidArgs(_) => 11,
            Self::TargetsFailed { .. } => 20,
            Self::Anyhow(_) => 50,
        }
    }
}
