use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::ConfigTree;
use crate::transport::{SshHost, SshOptions, SshUser};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, also log to a per-process file under `directory`.
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "settled_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Directory for log files. If empty or unset, uses the OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,

    /// Private key path; `~` and `$VARS` are expanded.
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Fed to `sudo -S` for commands using the non-interactive sudo marker.
    #[serde(default)]
    pub sudo_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    pub user: UserConfig,

    #[serde(default)]
    pub known_hosts: Option<String>,

    #[serde(default)]
    pub use_agent: Option<bool>,

    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,

    /// Per-key task overrides.
    #[serde(default)]
    pub tasks: ConfigTree,
}

impl ServerConfig {
    pub fn connect(&self) -> SshHost {
        SshHost::new(
            self.name.clone(),
            self.address.clone(),
            SshUser {
                name: self.user.name.clone(),
                ssh_key: self.user.ssh_key.clone(),
                sudo_password: self.user.sudo_password.clone(),
            },
            self.known_hosts.clone(),
            SshOptions {
                use_agent: self.use_agent,
                handshake_timeout: self.handshake_timeout_ms.map(Duration::from_millis),
            },
        )
    }

    /// Same server reached as a different login user, keeping key and trust settings.
    pub fn with_login_user(&self, login: &str) -> Self {
        let mut cfg = self.clone();
        cfg.user.name = login.to_string();
        if login == "root" {
            cfg.user.sudo_password = None;
        }
        cfg
    }
}
