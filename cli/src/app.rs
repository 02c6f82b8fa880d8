//! Per-server orchestration behind `configure`, `ping` and `bootstrap`.
//!
//! Servers share nothing, so a failure on one is logged and recorded in the [`Summary`]
//! while the others carry on.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{error, info, info_span, warn, Instrument, Span};

use settled_core::config::{AppConfig, ServerConfig};
use settled_core::configurator::{Configurator, TaskConfigurator};
use settled_core::context::RunContext;
use settled_core::plan::{plan_tasks, TaskSpec};
use settled_core::runner::Runner;
use settled_core::task::ConfigTree;
use settled_core::transport::RemoteHost;
use settled_core::util::{clean_list, sh_command, shell_escape};
use settled_tasks::users;

use crate::error::CliError;

pub const PING_TIMEOUT: Duration = Duration::from_secs(15);
const PING_COMMAND: &str = "echo 'pong'";
const PING_REPLY: &str = "pong";

/// Builds the transport for one server entry.
pub type Connector<'a> = &'a (dyn Fn(&ServerConfig) -> Arc<dyn RemoteHost> + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Nothing was planned for the server.
    Skipped,
    Failed,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub outcomes: Vec<(String, Outcome)>,
}

impl Summary {
    /// Names of the servers that failed, sorted.
    pub fn failed(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .outcomes
            .iter()
            .filter(|(_, o)| *o == Outcome::Failed)
            .map(|(name, _)| name.clone())
            .collect();
        failed.sort();
        failed
    }

    pub fn outcome(&self, server: &str) -> Option<Outcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, o)| *o)
    }

    pub fn into_result(self) -> Result<(), CliError> {
        let failed = self.failed();
        if failed.is_empty() {
            return Ok(());
        }
        Err(CliError::TargetsFailed { failed })
    }
}

#[derive(Debug, Clone)]
pub struct ConfigureOptions {
    pub jobs: usize,
    pub timeout: Option<Duration>,
}

impl Default for ConfigureOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout: None,
        }
    }
}

fn scoped(ctx: &RunContext, timeout: Option<Duration>) -> RunContext {
    match timeout {
        Some(t) => ctx.with_timeout(t),
        None => ctx.child(),
    }
}

/// Span wrapping all work for one target; events inside it inherit the server name.
pub fn server_span(server: &ServerConfig) -> Span {
    info_span!("server", name = %server.name)
}

/// Plans `overrides` against `specs` and converges `host`.
pub async fn converge(
    ctx: &RunContext,
    server: &str,
    host: &dyn RemoteHost,
    overrides: &ConfigTree,
    specs: &[TaskSpec],
    runner: Arc<Runner>,
) -> Outcome {
    let plan = match plan_tasks(overrides, specs) {
        Ok(plan) => plan,
        Err(e) => {
            error!(server, key = e.key(), error = %e, "failed to plan tasks");
            return Outcome::Failed;
        }
    };

    if !plan.unknown_keys.is_empty() {
        warn!(server, keys = ?plan.unknown_keys, "ignoring unknown task keys");
    }
    if plan.tasks.is_empty() {
        info!(server, "no tasks to apply for server");
        return Outcome::Skipped;
    }

    let configurator = TaskConfigurator::new(runner, plan.tasks);
    match configurator.configure(ctx, host).await {
        Ok(()) => {
            info!(server, "server configured successfully");
            Outcome::Ok
        }
        Err(e) => {
            error!(server, task = e.task(), error = %e, "failed to configure server");
            Outcome::Failed
        }
    }
}

pub async fn configure(
    ctx: &RunContext,
    cfg: &AppConfig,
    specs: &[TaskSpec],
    opts: &ConfigureOptions,
    connect: Connector<'_>,
) -> Summary {
    info!("starting configuration process");
    if cfg.servers.is_empty() {
        warn!("no servers provided for configuration");
        return Summary::default();
    }
    info!(count = cfg.servers.len(), jobs = opts.jobs, "configuring servers");

    let runner = Arc::new(Runner::new());
    let outcomes = stream::iter(cfg.servers.iter())
        .map(|server| {
            let runner = runner.clone();
            async move {
                info!(address = %server.address, "configuring server");
                let target_ctx = scoped(ctx, opts.timeout);
                let host = connect(server);
                let outcome = converge(
                    &target_ctx,
                    &server.name,
                    host.as_ref(),
                    &server.tasks,
                    specs,
                    runner,
                )
                .await;
                (server.name.clone(), outcome)
            }
            .instrument(server_span(server))
        })
        .buffer_unordered(opts.jobs.max(1))
        .collect()
        .await;

    Summary { outcomes }
}

pub async fn ping(ctx: &RunContext, cfg: &AppConfig, connect: Connector<'_>) -> Summary {
    info!("starting connection verification");
    if cfg.servers.is_empty() {
        warn!("no servers configured");
        return Summary::default();
    }

    let mut summary = Summary::default();
    for server in &cfg.servers {
        let outcome = ping_one(ctx, server, connect)
            .instrument(server_span(server))
            .await;
        summary.outcomes.push((server.name.clone(), outcome));
    }
    summary
}

async fn ping_one(ctx: &RunContext, server: &ServerConfig, connect: Connector<'_>) -> Outcome {
    let host = connect(server);
    let ping_ctx = ctx.with_timeout(PING_TIMEOUT);
    info!(address = host.address(), "checking server");

    match host.execute(&ping_ctx, PING_COMMAND).await {
        Ok(output) if output.trim() == PING_REPLY => {
            info!("verification successful");
            Outcome::Ok
        }
        Ok(output) => {
            warn!(
                output = output.trim(),
                "verification partially successful (unexpected output)"
            );
            Outcome::Ok
        }
        Err(e) => {
            error!(error = %e, "verification failed");
            Outcome::Failed
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub user: String,
    pub login_user: String,
    pub group: Option<String>,
    pub sudo_nopasswd: bool,
    pub authorized_keys: Vec<String>,
}

impl BootstrapOptions {
    /// Trims inputs; the new user is required and the login user falls back to root.
    pub fn normalized(mut self) -> Result<Self, CliError> {
        self.user = self.user.trim().to_string();
        if self.user.is_empty() {
            return Err(CliError::InvalidArgs("bootstrap user is required".to_string()));
        }
        self.login_user = match self.login_user.trim() {
            "" => "root".to_string(),
            login => login.to_string(),
        };
        self.group = self
            .group
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());
        Ok(self)
    }
}

/// The `users` override that creates the bootstrap account.
pub fn bootstrap_overrides(opts: &BootstrapOptions, keys: &[String]) -> ConfigTree {
    let mut user = Map::new();
    user.insert("sudo".to_string(), Value::Bool(true));
    if opts.sudo_nopasswd {
        user.insert("sudo_nopasswd".to_string(), Value::Bool(true));
    }
    if let Some(group) = &opts.group {
        user.insert("groups".to_string(), json!([group]));
    }
    if !keys.is_empty() {
        user.insert("authorized_keys".to_string(), json!(keys));
    }

    let mut accounts = Map::new();
    accounts.insert(opts.user.clone(), Value::Object(user));
    let mut overrides = ConfigTree::new();
    overrides.insert(users::TASK_KEY.to_string(), Value::Object(accounts));
    overrides
}

/// Keys given on the command line, or else the login user's own `authorized_keys`.
pub async fn resolve_bootstrap_keys(
    ctx: &RunContext,
    host: &dyn RemoteHost,
    provided: &[String],
    login_user: &str,
) -> anyhow::Result<Vec<String>> {
    let keys = clean_list(provided);
    if !keys.is_empty() {
        return Ok(keys);
    }

    let script = format!(
        "set -e; home=$(getent passwd {} | cut -d: -f6); if [ -z \"$home\" ]; then home=/root; fi; cat \"$home/{}/{}\"",
        shell_escape(login_user),
        users::SSH_DIR_NAME,
        users::AUTHORIZED_KEYS_FILE_NAME,
    );
    let output = host
        .execute(ctx, &sh_command("", &script))
        .await
        .with_context(|| {
            format!("read authorized_keys for {login_user} (use --authorized-key to override)")
        })?;

    let keys = clean_list(output.lines());
    if keys.is_empty() {
        anyhow::bail!("authorized_keys for {login_user} is empty");
    }
    Ok(keys)
}

pub async fn bootstrap(
    ctx: &RunContext,
    cfg: &AppConfig,
    opts: &BootstrapOptions,
    connect: Connector<'_>,
) -> Summary {
    info!("starting bootstrap process");
    if cfg.servers.is_empty() {
        warn!("no servers provided for bootstrap");
        return Summary::default();
    }

    let runner = Arc::new(Runner::new());
    let specs = [users::spec()];
    let mut summary = Summary::default();
    for server in &cfg.servers {
        let span = server_span(server);
        let target = async {
            info!(address = %server.address, login = %opts.login_user, "bootstrapping server");
            let host = connect(&server.with_login_user(&opts.login_user));
            let target_ctx = ctx.child();

            match resolve_bootstrap_keys(
                &target_ctx,
                host.as_ref(),
                &opts.authorized_keys,
                &opts.login_user,
            )
            .await
            {
                Ok(keys) => {
                    let overrides = bootstrap_overrides(opts, &keys);
                    converge(
                        &target_ctx,
                        &server.name,
                        host.as_ref(),
                        &overrides,
                        &specs,
                        runner.clone(),
                    )
                    .await
                }
                Err(e) => {
                    error!(error = %format!("{e:#}"), "failed to resolve authorized keys");
                    Outcome::Failed
                }
            }
        };
        let outcome = target.instrument(span).await;
        summary.outcomes.push((server.name.clone(), outcome));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use settled_core::transport::MockHost;

    fn opts() -> BootstrapOptions {
        BootstrapOptions {
            user: " deploy ".to_string(),
            login_user: "".to_string(),
            group: Some("sudo".to_string()),
            sudo_nopasswd: false,
            authorized_keys: Vec::new(),
        }
    }

    #[test]
    fn options_are_normalized() {
        let opts = opts().normalized().unwrap();
        assert_eq!(opts.user, "deploy");
        assert_eq!(opts.login_user, "root");

        let blank = BootstrapOptions {
            user: "  ".to_string(),
            ..opts
        };
        assert!(matches!(blank.normalized(), Err(CliError::InvalidArgs(_))));
    }

    #[test]
    fn overrides_shape() {
        let opts = BootstrapOptions {
            sudo_nopasswd: true,
            ..opts().normalized().unwrap()
        };
        let tree = bootstrap_overrides(&opts, &["ssh-ed25519 AAAA k".to_string()]);
        assert_eq!(
            Value::Object(tree),
            json!({"users": {"deploy": {
                "sudo": true,
                "sudo_nopasswd": true,
                "groups": ["sudo"],
                "authorized_keys": ["ssh-ed25519 AAAA k"],
            }}})
        );
    }

    #[test]
    fn empty_group_is_dropped() {
        let opts = BootstrapOptions {
            group: Some(" ".to_string()),
            ..opts()
        }
        .normalized()
        .unwrap();
        let tree = bootstrap_overrides(&opts, &[]);
        assert_eq!(Value::Object(tree), json!({"users": {"deploy": {"sudo": true}}}));
    }

    #[tokio::test]
    async fn provided_keys_skip_the_host() {
        let host = MockHost::new("h");
        let keys = resolve_bootstrap_keys(
            &RunContext::new(),
            &host,
            &[" ssh-ed25519 AAAA k ".to_string(), "".to_string()],
            "root",
        )
        .await
        .unwrap();
        assert_eq!(keys, vec!["ssh-ed25519 AAAA k"]);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn login_user_keys_are_read() {
        let host = MockHost::new("h").respond("authorized_keys", "ssh-rsa AAA a\n\nssh-rsa AAA a\nssh-ed25519 BBB b\n");
        let keys = resolve_bootstrap_keys(&RunContext::new(), &host, &[], "root")
            .await
            .unwrap();
        assert_eq!(keys, vec!["ssh-rsa AAA a", "ssh-ed25519 BBB b"]);
        assert!(host.calls()[0].contains("getent passwd"));
    }

    #[tokio::test]
    async fn empty_login_keys_fail() {
        let host = MockHost::new("h").respond("authorized_keys", "\n");
        let err = resolve_bootstrap_keys(&RunContext::new(), &host, &[], "root")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "authorized_keys for root is empty");
    }

    #[test]
    fn summary_reports_failures() {
        let summary = Summary {
            outcomes: vec![
                ("b".to_string(), Outcome::Failed),
                ("a".to_string(), Outcome::Ok),
                ("c".to_string(), Outcome::Failed),
            ],
        };
        assert_eq!(summary.failed(), vec!["b", "c"]);
        let err = summary.into_result().unwrap_err();
        assert_eq!(err.exit_code(), 20);
        assert_eq!(err.to_string(), "2 target(s) failed: b, c");
    }
}
