use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use settled_core::context::RunContext;
use settled_core::task::Task;
use settled_core::transport::RemoteHost;
use settled_core::util::{read_file_if_exists, sudo_prefix};

use crate::script::{render, run_script};

pub const DEFAULT_JAIL_CONFIG: &str = "/etc/fail2ban/jail.d/settled.conf";

const SERVICE_NAME: &str = "fail2ban";
const CLIENT_CMD: &str = "fail2ban-client";
const PACKAGE_NAME: &str = "fail2ban";
const OUTPUT_YES: &str = "yes";
const OUTPUT_NO: &str = "no";

#[derive(Serialize)]
struct InstallScript<'a> {
    client_cmd: &'a str,
    package_name: &'a str,
    config_path: &'a str,
    config_content: &'a str,
    service_name: &'a str,
}

#[derive(Serialize)]
struct ReadyScript<'a> {
    client_cmd: &'a str,
    service_name: &'a str,
    result_yes: &'a str,
    result_no: &'a str,
    jails: &'a [String],
}

/// Installs fail2ban, writes the managed jail file and keeps the service running.
#[derive(Debug, Clone)]
pub struct Fail2banTask {
    pub config_path: String,
    pub config_content: String,
    /// Enabled jails that must show up in `fail2ban-client status`.
    pub jails: Vec<String>,
}

impl Fail2banTask {
    pub fn new(config_content: String, jails: Vec<String>) -> Self {
        Self {
            config_path: DEFAULT_JAIL_CONFIG.to_string(),
            config_content,
            jails,
        }
    }

    fn render_install(&self) -> anyhow::Result<String> {
        render(
            "fail2ban.sh",
            InstallScript {
                client_cmd: CLIENT_CMD,
                package_name: PACKAGE_NAME,
                config_path: &self.config_path,
                config_content: &self.config_content,
                service_name: SERVICE_NAME,
            },
        )
    }

    async fn service_ready(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
        prefix: &str,
    ) -> anyhow::Result<bool> {
        let script = render(
            "fail2ban_ready.sh",
            ReadyScript {
                client_cmd: CLIENT_CMD,
                service_name: SERVICE_NAME,
                result_yes: OUTPUT_YES,
                result_no: OUTPUT_NO,
                jails: &self.jails,
            },
        )?;
        let output = run_script(ctx, host, prefix, &script)
            .await
            .context("check fail2ban service")?;
        Ok(output.trim() == OUTPUT_YES)
    }
}

#[async_trait]
impl Task for Fail2banTask {
    fn name(&self) -> String {
        "configure fail2ban".to_string()
    }

    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        if !installed(ctx, host).await? {
            return Ok(true);
        }

        let prefix = sudo_prefix(ctx, host).await?;
        let Some(existing) = read_file_if_exists(ctx, host, prefix, &self.config_path).await? else {
            return Ok(true);
        };
        if existing.trim() != self.config_content.trim() {
            return Ok(true);
        }

        Ok(!self.service_ready(ctx, host, prefix).await?)
    }

    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()> {
        let prefix = sudo_prefix(ctx, host).await?;
        let script = self.render_install()?;
        run_script(ctx, host, prefix, &script)
            .await
            .context("configure fail2ban")?;
        Ok(())
    }
}

async fn installed(ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
    let script = format!(
        "if command -v {CLIENT_CMD} >/dev/null 2>&1; then echo {OUTPUT_YES}; else echo {OUTPUT_NO}; fi"
    );
    let output = run_script(ctx, host, "", &script)
        .await
        .context("check fail2ban install")?;
    Ok(output.trim() == OUTPUT_YES)
}
