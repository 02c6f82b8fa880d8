//! sshd_config access shared by the SSH hardening tasks.
use serde::Serialize;

use settled_core::context::RunContext;
use settled_core::transport::RemoteHost;
use settled_core::util::{read_file_if_exists, sudo_prefix};

use crate::script;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ssh/sshd_config";
pub const KEY_PERMIT_ROOT_LOGIN: &str = "PermitRootLogin";
pub const KEY_PASSWORD_AUTHENTICATION: &str = "PasswordAuthentication";
pub const KEY_KBD_INTERACTIVE_AUTH: &str = "KbdInteractiveAuthentication";
pub const KEY_CHALLENGE_RESPONSE_AUTH: &str = "ChallengeResponseAuthentication";
pub const VALUE_NO: &str = "no";

const CONFIG_PATHS: &[&str] = &[DEFAULT_CONFIG_PATH];

/// Path and contents of the first sshd config found on the host.
pub async fn read_config(
    ctx: &RunContext,
    host: &dyn RemoteHost,
) -> anyhow::Result<(String, String)> {
    let prefix = sudo_prefix(ctx, host).await?;
    for path in CONFIG_PATHS {
        if let Some(contents) = read_file_if_exists(ctx, host, prefix, path).await? {
            return Ok((path.to_string(), contents));
        }
    }
    anyhow::bail!("sshd config not found (checked: {})", CONFIG_PATHS.join(", "))
}

#[derive(Debug, Clone, Serialize)]
pub struct Setting {
    pub key: &'static str,
    pub value: &'static str,
}

#[derive(Serialize)]
struct SettingsScript<'a> {
    config_path: &'a str,
    settings: &'a [Setting],
}

/// Script that rewrites `settings` in `config_path`, validates with `sshd -t` and reloads sshd.
pub fn render_settings_script(config_path: &str, settings: &[Setting]) -> anyhow::Result<String> {
    script::render(
        "sshd_settings.sh",
        SettingsScript {
            config_path,
            settings,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use settled_core::transport::MockHost;

    #[tokio::test]
    async fn reads_default_path() {
        let host = MockHost::new("h")
            .respond("id -u", "0\n")
            .respond(DEFAULT_CONFIG_PATH, "PermitRootLogin yes\n");
        let (path, contents) = read_config(&RunContext::new(), &host).await.unwrap();
        assert_eq!(path, DEFAULT_CONFIG_PATH);
        assert_eq!(contents, "PermitRootLogin yes\n");
    }

    #[tokio::test]
    async fn missing_config_is_an_error() {
        let host = MockHost::new("h")
            .respond("id -u", "0\n")
            .respond(DEFAULT_CONFIG_PATH, "__SETTLED_MISSING__:/etc/ssh/sshd_config");
        let err = read_config(&RunContext::new(), &host).await.unwrap_err();
        assert!(err.to_string().starts_with("sshd config not found"));
    }

    #[test]
    fn settings_script_validates_before_reload() {
        let script = render_settings_script(
            DEFAULT_CONFIG_PATH,
            &[Setting {
                key: KEY_PERMIT_ROOT_LOGIN,
                value: VALUE_NO,
            }],
        )
        .unwrap();
        assert!(script.contains("config='/etc/ssh/sshd_config'"));
        assert!(script.contains("PermitRootLogin no"));
        let validate = script.find("-t -f").unwrap();
        let reload = script.find("systemctl reload").unwrap();
        assert!(validate < reload);
    }
}
