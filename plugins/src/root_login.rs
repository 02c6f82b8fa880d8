use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use settled_core::context::RunContext;
use settled_core::plan::TaskSpec;
use settled_core::task::{BoxedTask, Task};
use settled_core::transport::RemoteHost;
use settled_core::util::{parse_key_value_settings, sudo_prefix};

use crate::script::run_script;
use crate::sshd::{self, Setting};

pub const TASK_KEY: &str = "root_login";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootLoginConfig {
    #[serde(default)]
    pub disable: bool,
}

pub fn spec() -> TaskSpec {
    TaskSpec::typed(TASK_KEY, Some("root_login.toml"), build_tasks)
}

fn build_tasks(cfg: RootLoginConfig) -> anyhow::Result<Vec<BoxedTask>> {
    if !cfg.disable {
        return Ok(Vec::new());
    }
    Ok(vec![Box::new(DisableRootLoginTask::default()) as BoxedTask])
}

/// Sets `PermitRootLogin no`. Never runs while connected as root, which would lock the
/// session out.
#[derive(Debug, Default)]
pub struct DisableRootLoginTask {
    config_path: Mutex<Option<String>>,
}

impl DisableRootLoginTask {
    fn remember(&self, path: &str) {
        if let Ok(mut slot) = self.config_path.lock() {
            *slot = Some(path.to_string());
        }
    }

    fn cached_path(&self) -> Option<String> {
        self.config_path.lock().ok().and_then(|p| p.clone())
    }

    async fn resolve_config_path(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
    ) -> anyhow::Result<String> {
        if let Some(path) = self.cached_path() {
            return Ok(path);
        }
        let (path, _) = sshd::read_config(ctx, host).await?;
        self.remember(&path);
        Ok(path)
    }
}

#[async_trait]
impl Task for DisableRootLoginTask {
    fn name(&self) -> String {
        "disable root login".to_string()
    }

    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        if logged_in_as_root(ctx, host).await? {
            warn!(
                server = host.id(),
                "skipping {} task because connected as root",
                self.name()
            );
            return Ok(false);
        }

        let (path, contents) = sshd::read_config(ctx, host).await?;
        self.remember(&path);
        Ok(!root_login_disabled(&contents))
    }

    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()> {
        let prefix = sudo_prefix(ctx, host).await?;
        let path = self.resolve_config_path(ctx, host).await?;
        let script = sshd::render_settings_script(
            &path,
            &[Setting {
                key: sshd::KEY_PERMIT_ROOT_LOGIN,
                value: sshd::VALUE_NO,
            }],
        )?;
        run_script(ctx, host, prefix, &script).await?;
        Ok(())
    }
}

async fn logged_in_as_root(ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
    let output = host
        .execute(ctx, "id -un")
        .await
        .context("check login user")?;
    Ok(output.trim() == "root")
}

fn root_login_disabled(contents: &str) -> bool {
    let settings = parse_key_value_settings(contents);
    settings
        .get(&sshd::KEY_PERMIT_ROOT_LOGIN.to_lowercase())
        .is_some_and(|v| v == sshd::VALUE_NO)
}
