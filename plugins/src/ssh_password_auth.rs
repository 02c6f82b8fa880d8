use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use settled_core::context::RunContext;
use settled_core::plan::TaskSpec;
use settled_core::task::{BoxedTask, Task};
use settled_core::transport::RemoteHost;
use settled_core::util::{parse_key_value_settings, sudo_prefix};

use crate::script::run_script;
use crate::sshd::{self, Setting};

pub const TASK_KEY: &str = "ssh_password_auth";

const SETTINGS: &[Setting] = &[
    Setting {
        key: sshd::KEY_PASSWORD_AUTHENTICATION,
        value: sshd::VALUE_NO,
    },
    Setting {
        key: sshd::KEY_KBD_INTERACTIVE_AUTH,
        value: sshd::VALUE_NO,
    },
    Setting {
        key: sshd::KEY_CHALLENGE_RESPONSE_AUTH,
        value: sshd::VALUE_NO,
    },
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshPasswordAuthConfig {
    #[serde(default)]
    pub disable: bool,
}

pub fn spec() -> TaskSpec {
    TaskSpec::typed(TASK_KEY, Some("ssh_password_auth.toml"), build_tasks)
}

fn build_tasks(cfg: SshPasswordAuthConfig) -> anyhow::Result<Vec<BoxedTask>> {
    if !cfg.disable {
        return Ok(Vec::new());
    }
    Ok(vec![Box::new(DisableSshPasswordAuthTask::default()) as BoxedTask])
}

#[derive(Debug, Default)]
pub struct DisableSshPasswordAuthTask {
    config_path: Mutex<Option<String>>,
}

impl DisableSshPasswordAuthTask {
    async fn resolve_config_path(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
    ) -> anyhow::Result<String> {
        if let Some(path) = self.config_path.lock().ok().and_then(|p| p.clone()) {
            return Ok(path);
        }
        let (path, _) = sshd::read_config(ctx, host).await?;
        if let Ok(mut slot) = self.config_path.lock() {
            *slot = Some(path.clone());
        }
        Ok(path)
    }
}

#[async_trait]
impl Task for DisableSshPasswordAuthTask {
    fn name(&self) -> String {
        "disable ssh password authentication".to_string()
    }

    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        let (path, contents) = sshd::read_config(ctx, host).await?;
        if let Ok(mut slot) = self.config_path.lock() {
            *slot = Some(path);
        }
        Ok(!password_auth_disabled(&contents))
    }

    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()> {
        let prefix = sudo_prefix(ctx, host).await?;
        let path = self.resolve_config_path(ctx, host).await?;
        let script = sshd::render_settings_script(&path, SETTINGS)?;
        run_script(ctx, host, prefix, &script).await?;
        Ok(())
    }
}

/// Password auth must be `no`, and at least one keyboard-interactive style setting must be
/// present with every present one set to `no`.
fn password_auth_disabled(contents: &str) -> bool {
    let settings = parse_key_value_settings(contents);
    let get = |key: &str| settings.get(&key.to_lowercase()).map(String::as_str);

    if get(sshd::KEY_PASSWORD_AUTHENTICATION) != Some(sshd::VALUE_NO) {
        return false;
    }
    let interactive = [
        get(sshd::KEY_KBD_INTERACTIVE_AUTH),
        get(sshd::KEY_CHALLENGE_RESPONSE_AUTH),
    ];
    interactive.iter().any(Option::is_some)
        && interactive
            .iter()
            .flatten()
            .all(|value| *value == sshd::VALUE_NO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use settled_core::transport::MockHost;

    #[test]
    fn requires_password_and_interactive_off() {
        assert!(password_auth_disabled(
            "PasswordAuthentication no\nKbdInteractiveAuthentication no\n"
        ));
        assert!(password_auth_disabled(
            "PasswordAuthentication no\nChallengeResponseAuthentication no\n"
        ));
        assert!(!password_auth_disabled("PasswordAuthentication no\n"));
        assert!(!password_auth_disabled(
            "PasswordAuthentication no\nKbdInteractiveAuthentication no\nChallengeResponseAuthentication yes\n"
        ));
        assert!(!password_auth_disabled(
            "PasswordAuthentication yes\nKbdInteractiveAuthentication no\n"
        ));
    }

    #[tokio::test]
    async fn execute_rewrites_all_three_settings() {
        let host = MockHost::new("h")
            .respond("id -u", "0\n")
            .respond(sshd::DEFAULT_CONFIG_PATH, "PasswordAuthentication yes\n")
            .respond("sshd_bin=", "");
        let task = DisableSshPasswordAuthTask::default();
        let ctx = RunContext::new();
        assert!(task.needs_execution(&ctx, &host).await.unwrap());
        task.execute(&ctx, &host).await.unwrap();

        let script = host.calls().pop().unwrap();
        assert!(script.starts_with("sh -c "));
        for setting in SETTINGS {
            assert!(script.contains(&format!("{} no", setting.key)));
        }
    }
}
