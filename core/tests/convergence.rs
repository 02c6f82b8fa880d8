use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use settled_core::error::{RunError, TransportError};
use settled_core::transport::MockHost;
use settled_core::util::{read_file_if_exists, sh_command, shell_escape, sudo_prefix};
use settled_core::{
    plan_tasks_with, BoxedTask, ConfigTree, Configurator, DefaultsCatalog, RemoteHost,
    RunContext, Runner, Task, TaskConfigurator, TaskSpec,
};

/// Ensures a file holds a fixed line.
struct LineTask {
    path: String,
    line: String,
}

#[async_trait]
impl Task for LineTask {
    fn name(&self) -> String {
        format!("line in {}", self.path)
    }

    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        let prefix = sudo_prefix(ctx, host).await?;
        let current = read_file_if_exists(ctx, host, prefix, &self.path).await?;
        Ok(current.map_or(true, |c| c.trim() != self.line))
    }

    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()> {
        let prefix = sudo_prefix(ctx, host).await?;
        let script = format!(
            "printf '%s\\n' {} > {}",
            shell_escape(&self.line),
            shell_escape(&self.path)
        );
        host.execute(ctx, &sh_command(prefix, &script)).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MotdConfig {
    #[serde(default)]
    line: Option<String>,
}

fn motd_spec() -> TaskSpec {
    TaskSpec::typed::<MotdConfig, _>("motd", Some("motd.toml"), |cfg| {
        Ok(cfg
            .line
            .map(|line| {
                vec![Box::new(LineTask {
                    path: "/etc/motd".to_string(),
                    line,
                }) as BoxedTask]
            })
            .unwrap_or_default())
    })
}

const READ: &str = "then cat";
const WRITE: &str = "> ";

/// A host whose `/etc/motd` flips to present once the write command runs.
fn stateful_host() -> MockHost {
    let written = Arc::new(AtomicBool::new(false));
    let host = MockHost::new("web-1").respond("id -u", "1000\n");

    let state = written.clone();
    host.add_rule(READ, move |_| {
        if state.load(Ordering::SeqCst) {
            Ok("managed by settled\n".to_string())
        } else {
            Ok("__SETTLED_MISSING__:/etc/motd".to_string())
        }
    });
    host.add_rule(WRITE, move |_| {
        written.store(true, Ordering::SeqCst);
        Ok(String::new())
    });
    host
}

fn catalog() -> DefaultsCatalog {
    DefaultsCatalog::from_entries(&[("motd.toml", "line = \"managed by settled\"\n")])
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let plan = plan_tasks_with(&catalog(), &ConfigTree::new(), &[motd_spec()]).unwrap();
    assert_eq!(plan.task_names(), vec!["line in /etc/motd"]);

    let host = stateful_host();
    let configurator = TaskConfigurator::new(Arc::new(Runner::new()), plan.tasks);
    let ctx = RunContext::new();

    configurator.configure(&ctx, &host).await.unwrap();
    assert_eq!(host.count(WRITE), 1);
    assert!(host.calls().iter().any(|c| c.starts_with("sudo -n sh -c ")));

    configurator.configure(&ctx, &host).await.unwrap();
    assert_eq!(host.count(WRITE), 1, "converged host must not be rewritten");
}

#[tokio::test]
async fn override_replaces_default_line() {
    let overrides: ConfigTree = match json!({"motd": {"line": "custom"}}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let plan = plan_tasks_with(&catalog(), &overrides, &[motd_spec()]).unwrap();
    let host = stateful_host();
    TaskConfigurator::new(Arc::new(Runner::new()), plan.tasks)
        .configure(&RunContext::new(), &host)
        .await
        .unwrap();
    assert!(host.calls().iter().any(|c| c.contains("custom")));
}

#[tokio::test]
async fn transport_failure_surfaces_with_task_and_output() {
    let plan = plan_tasks_with(&catalog(), &ConfigTree::new(), &[motd_spec()]).unwrap();
    let host = MockHost::new("web-2")
        .respond("id -u", "1000\n")
        .respond(READ, "__SETTLED_MISSING__:/etc/motd")
        .fail(WRITE, "sudo: a password is required\n", 1);

    let err = TaskConfigurator::new(Arc::new(Runner::new()), plan.tasks)
        .configure(&RunContext::new(), &host)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Apply { .. }));
    assert_eq!(err.task(), "line in /etc/motd");
    let transport = err.source_error().downcast_ref::<TransportError>().unwrap();
    assert_eq!(transport.output(), Some("sudo: a password is required\n"));
}

#[tokio::test]
async fn targets_converge_independently() {
    let runner = Arc::new(Runner::new());
    let hosts: Vec<MockHost> = (0..4).map(|_| stateful_host()).collect();
    let ctx = RunContext::new();

    let runs = hosts.iter().map(|host| {
        let plan = plan_tasks_with(&catalog(), &ConfigTree::new(), &[motd_spec()]).unwrap();
        let configurator = TaskConfigurator::new(runner.clone(), plan.tasks);
        let ctx = ctx.clone();
        async move { configurator.configure(&ctx, host).await }
    });
    for result in futures::future::join_all(runs).await {
        result.unwrap();
    }
    for host in &hosts {
        assert_eq!(host.count(WRITE), 1);
    }
}
