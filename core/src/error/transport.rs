use std::path::PathBuf;

use thiserror::Error;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context cancelled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Errors from one remote command execution, tagged with the phase that failed.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no ssh authentication methods available")]
    NoAuthMethod,

    #[error("failed to expand path {path:?}: {reason}")]
    Path { path: String, reason: String },

    #[error("failed to read ssh key {path:?}: {source}")]
    KeyRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse ssh key {path:?}: {reason}")]
    KeyParse { path: PathBuf, reason: String },

    #[error("failed to load known_hosts file {path:?}: {reason}")]
    KnownHosts { path: PathBuf, reason: String },

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to establish ssh connection to {addr}: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("host key verification failed for {addr}: {reason}")]
    HostKey { addr: String, reason: String },

    #[error("ssh authentication failed for {user}@{addr}: {reason}")]
    Auth {
        user: String,
        addr: String,
        reason: String,
    },

    #[error("failed to create session: {0}")]
    Session(String),

    #[error("command {command:?} failed: {status}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("{phase} aborted: {cause}")]
    Cancelled {
        phase: &'static str,
        cause: CancelCause,
    },

    #[error("ssh io error during {phase}: {source}")]
    Io {
        phase: &'static str,
        source: std::io::Error,
    },
}

impl TransportError {
    /// Combined output captured before a command failed, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Command { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
