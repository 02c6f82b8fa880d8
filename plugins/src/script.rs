//! Host-side shell scripts rendered from embedded templates.
use anyhow::Context;
use lazy_static::lazy_static;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use settled_core::context::RunContext;
use settled_core::transport::RemoteHost;
use settled_core::util::{sh_command, shell_escape};

const TEMPLATES: &[(&str, &str)] = &[
    ("users.sh", include_str!("../scripts/users.sh.j2")),
    ("sshd_settings.sh", include_str!("../scripts/sshd_settings.sh.j2")),
    ("fail2ban.sh", include_str!("../scripts/fail2ban.sh.j2")),
    (
        "fail2ban_ready.sh",
        include_str!("../scripts/fail2ban_ready.sh.j2"),
    ),
];

lazy_static! {
    static ref SCRIPTS: Environment<'static> = build_environment();
}

fn shell_escape_filter(value: &str) -> String {
    shell_escape(value)
}

fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.add_filter("shell_escape", shell_escape_filter);
    for &(name, source) in TEMPLATES {
        if let Err(e) = env.add_template(name, source) {
            tracing::error!(template = name, error = %e, "invalid embedded script template");
        }
    }
    env
}

/// Renders an embedded script template. Any undefined variable is an error.
pub fn render<S: Serialize>(name: &str, data: S) -> anyhow::Result<String> {
    let template = SCRIPTS
        .get_template(name)
        .with_context(|| format!("load script template {name}"))?;
    template
        .render(data)
        .with_context(|| format!("execute template {name}"))
}

/// Runs `script` through `sh -c`, elevated with `prefix` when non-empty.
pub async fn run_script(
    ctx: &RunContext,
    host: &dyn RemoteHost,
    prefix: &str,
    script: &str,
) -> anyhow::Result<String> {
    Ok(host.execute(ctx, &sh_command(prefix, script)).await?)
}
