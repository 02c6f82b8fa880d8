//! Remote command execution.
//!
//! `RemoteHost` is the only channel tasks have to a target. Each `execute` call is an
//! independent authenticated session; nothing is pooled or reused between calls.
mod key;
pub mod mock;
mod ssh;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::TransportError;

pub use mock::MockHost;
pub use ssh::{
    elevate_command, expand_path, handshake_deadline, resolve_known_hosts_path, with_default_port,
    SshHost, SshOptions, SshUser, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SSH_PORT,
    NON_INTERACTIVE_SUDO, PROMPTING_SUDO,
};

#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    fn address(&self) -> &str;

    /// Run one command and return its combined stdout/stderr.
    ///
    /// A non-zero exit is reported as `TransportError::Command`, which still carries the output
    /// captured before the failure.
    async fn execute(&self, ctx: &RunContext, command: &str) -> Result<String, TransportError>;
}
