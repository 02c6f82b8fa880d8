use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::AppConfig;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = ".settled.toml";
pub const ENV_PREFIX: &str = "SETTLED_";

/// Picks the configuration file: an explicit path (which must exist), then
/// `~/.settled.toml`, then `./.settled.toml`. `None` means run on built-in defaults.
pub fn find_config_file(explicit: Option<&str>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        let expanded = shellexpand::tilde(path).to_string();
        let path = PathBuf::from(expanded);
        std::fs::metadata(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        return Ok(Some(path));
    }

    if let Some(home) = dirs::home_dir() {
        let path = home.join(CONFIG_FILE_NAME);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let local = Path::new(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(Some(local.to_path_buf()));
    }
    Ok(None)
}

pub fn load(explicit: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut cfg = match find_config_file(explicit)? {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            let s = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let mut cfg = parse_config(&s, &path)?;
            cfg.source = Some(path);
            cfg
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

/// Decodes and validates a configuration document.
pub fn parse_config(s: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate(&cfg)?;
    Ok(cfg)
}

/// `SETTLED_LOG_LEVEL` and `SETTLED_LOG_DIR` win over the file.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

    if let Some(level) = var("LOG_LEVEL") {
        cfg.logging.level = level;
    }
    if let Some(dir) = var("LOG_DIR") {
        cfg.logging.directory = Some(dir);
        cfg.logging.file = true;
    }
}

fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for (index, server) in cfg.servers.iter().enumerate() {
        let reason = if server.name.trim().is_empty() {
            Some("name is required".to_string())
        } else if server.address.trim().is_empty() {
            Some(format!("server {:?}: address is required", server.name))
        } else if server.user.name.trim().is_empty() {
            Some(format!("server {:?}: user.name is required", server.name))
        } else if !names.insert(server.name.as_str()) {
            Some(format!("duplicate server name {:?}", server.name))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ConfigError::Server { index, reason });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[[servers]]
name = "web-1"
address = "10.0.0.5"
use_agent = false
handshake_timeout_ms = 5000

[servers.user]
name = "deploy"
ssh_key = "~/.ssh/id_ed25519"

[servers.tasks]
root_login = { disable = false }

[servers.tasks.users.alice]
sudo = true
groups = ["docker"]
"#;

    #[test]
    fn parses_servers_and_override_tree() {
        let cfg = parse_config(SAMPLE, Path::new("test.toml")).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.servers.len(), 1);

        let server = &cfg.servers[0];
        assert_eq!(server.user.name, "deploy");
        assert_eq!(server.use_agent, Some(false));
        assert_eq!(server.handshake_timeout_ms, Some(5000));
        assert_eq!(server.tasks["root_login"], json!({"disable": false}));
        assert_eq!(
            server.tasks["users"],
            json!({"alice": {"sudo": true, "groups": ["docker"]}})
        );
    }

    #[test]
    fn missing_user_is_rejected() {
        let doc = "[[servers]]\nname = \"a\"\naddress = \"h\"\n[servers.user]\nname = \"\"\n";
        let err = parse_config(doc, Path::new("t.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Server { index: 0, .. }));
    }

    #[test]
    fn duplicate_server_names_are_rejected() {
        let doc = r#"
[[servers]]
name = "a"
address = "h1"
user = { name = "u" }

[[servers]]
name = "a"
address = "h2"
user = { name = "u" }
"#;
        let err = parse_config(doc, Path::new("t.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Server { index: 1, .. }));
    }

    #[test]
    fn env_overrides_logging() {
        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |key| match key {
            "SETTLED_LOG_LEVEL" => Some("trace".to_string()),
            "SETTLED_LOG_DIR" => Some("/var/log/settled".to_string()),
            _ => None,
        });
        assert_eq!(cfg.logging.level, "trace");
        assert_eq!(cfg.logging.directory.as_deref(), Some("/var/log/settled"));
        assert!(cfg.logging.file);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = find_config_file(Some(missing.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settled.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.source.as_deref(), Some(path.as_path()));
        assert_eq!(cfg.servers[0].name, "web-1");
    }

    #[test]
    fn login_user_swap_keeps_key() {
        let cfg = parse_config(SAMPLE, Path::new("t.toml")).unwrap();
        let root = cfg.servers[0].with_login_user("root");
        assert_eq!(root.user.name, "root");
        assert_eq!(root.user.ssh_key, cfg.servers[0].user.ssh_key);
    }
}
