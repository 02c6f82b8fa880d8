use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use settled_cli::app::{self, ConfigureOptions, Outcome};
use settled_core::config::{self, AppConfig, ServerConfig};
use settled_core::context::RunContext;
use settled_core::transport::{MockHost, RemoteHost};
use settled_tasks::root_login;

const CONFIG: &str = r#"
[logging]
enabled = false

[[servers]]
name = "alpha"
address = "10.0.0.1"
user = { name = "root" }

[[servers]]
name = "beta"
address = "10.0.0.2"
user = { name = "deploy" }

[[servers]]
name = "gamma"
address = "10.0.0.3"
user = { name = "deploy" }

[servers.tasks]
root_login = { disabel = true }
"#;

fn load_config() -> AppConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settled.toml");
    std::fs::write(&path, CONFIG).unwrap();
    config::load(Some(path.to_str().unwrap())).unwrap()
}

fn hosts() -> HashMap<String, Arc<MockHost>> {
    let mut hosts = HashMap::new();
    // Connected as root: the task reports itself satisfied.
    hosts.insert(
        "alpha".to_string(),
        Arc::new(MockHost::new("alpha").respond("id -un", "root\n")),
    );
    // No rule for `id -un`: the check fails with exit status 127.
    hosts.insert("beta".to_string(), Arc::new(MockHost::new("beta")));
    hosts.insert("gamma".to_string(), Arc::new(MockHost::new("gamma")));
    hosts
}

fn connector(
    hosts: &HashMap<String, Arc<MockHost>>,
) -> impl Fn(&ServerConfig) -> Arc<dyn RemoteHost> + Send + Sync + '_ {
    move |server: &ServerConfig| hosts[&server.name].clone() as Arc<dyn RemoteHost>
}

#[tokio::test]
async fn each_server_converges_independently() {
    let cfg = load_config();
    let hosts = hosts();
    let connect = connector(&hosts);
    let specs = vec![root_login::spec()];

    let summary = app::configure(
        &RunContext::new(),
        &cfg,
        &specs,
        &ConfigureOptions { jobs: 3, timeout: None },
        &connect,
    )
    .await;

    assert_eq!(summary.outcome("alpha"), Some(Outcome::Ok));
    assert_eq!(summary.outcome("beta"), Some(Outcome::Failed));
    assert_eq!(summary.outcome("gamma"), Some(Outcome::Failed));
    assert_eq!(summary.failed(), vec!["beta", "gamma"]);

    // A planning failure never touches the host.
    assert!(hosts["gamma"].calls().is_empty());
    assert_eq!(hosts["beta"].calls(), vec!["id -un"]);
}

#[tokio::test]
async fn nothing_planned_is_skipped() {
    let mut cfg = load_config();
    cfg.servers.truncate(1);
    cfg.servers[0]
        .tasks
        .insert("root_login".to_string(), serde_json::json!({"disable": false}));
    let hosts = hosts();
    let connect = connector(&hosts);

    let summary = app::configure(
        &RunContext::new(),
        &cfg,
        &[root_login::spec()],
        &ConfigureOptions::default(),
        &connect,
    )
    .await;
    assert_eq!(summary.outcome("alpha"), Some(Outcome::Skipped));
    assert!(summary.into_result().is_ok());
    assert!(hosts["alpha"].calls().is_empty());
}

#[tokio::test]
async fn ping_reports_each_server() {
    let cfg = load_config();
    let mut hosts = HashMap::new();
    hosts.insert(
        "alpha".to_string(),
        Arc::new(MockHost::new("alpha").respond("echo 'pong'", "pong\n")),
    );
    hosts.insert(
        "beta".to_string(),
        Arc::new(MockHost::new("beta").respond("echo 'pong'", "motd banner\n")),
    );
    hosts.insert("gamma".to_string(), Arc::new(MockHost::new("gamma")));
    let connect = connector(&hosts);

    let summary = app::ping(&RunContext::new(), &cfg, &connect).await;
    assert_eq!(summary.outcome("alpha"), Some(Outcome::Ok));
    assert_eq!(summary.outcome("beta"), Some(Outcome::Ok));
    assert_eq!(summary.failed(), vec!["gamma"]);
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).lines().map(str::to_string).collect()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn events_carry_the_server_span() {
    let cfg = load_config();
    let mut hosts = hosts();
    hosts.insert(
        "alpha".to_string(),
        Arc::new(MockHost::new("alpha").respond("echo 'pong'", "pong\n")),
    );
    let connect = connector(&hosts);

    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_target(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    app::ping(&RunContext::new(), &cfg, &connect).await;

    let lines = captured.lines();
    let line = |msg: &str, server: &str| {
        lines
            .iter()
            .any(|l| l.contains(msg) && l.contains(&format!("server{{name={server}}}")))
    };
    assert!(line("verification successful", "alpha"), "{lines:#?}");
    assert!(line("verification failed", "beta"), "{lines:#?}");
    assert!(line("verification failed", "gamma"), "{lines:#?}");
    assert!(!line("verification failed", "alpha"), "{lines:#?}");
}

#[tokio::test]
async fn cancelled_run_fails_every_server() {
    let cfg = load_config();
    let hosts = hosts();
    let connect = connector(&hosts);
    let ctx = RunContext::new();
    ctx.cancel();

    let summary = app::ping(&ctx, &cfg, &connect).await;
    assert_eq!(summary.failed(), vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn empty_config_does_nothing() {
    let hosts = hosts();
    let connect = connector(&hosts);
    let summary = app::ping(&RunContext::new(), &AppConfig::default(), &connect).await;
    assert!(summary.outcomes.is_empty());
}
