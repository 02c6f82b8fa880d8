//! Managed fail2ban jails.
mod config;
mod render;
mod task;

pub use config::{parse_duration, Fail2banConfig, JailDuration, Rule, StringList};
pub use render::{normalize_rules, render_jail_config, JailRule, CONTINUATION_INDENT};
pub use task::{Fail2banTask, DEFAULT_JAIL_CONFIG};

use settled_core::plan::TaskSpec;
use settled_core::task::BoxedTask;

pub const TASK_KEY: &str = "fail2ban";

pub fn spec() -> TaskSpec {
    TaskSpec::typed(TASK_KEY, Some("fail2ban.toml"), build_tasks)
}

fn build_tasks(cfg: Fail2banConfig) -> anyhow::Result<Vec<BoxedTask>> {
    let rules = normalize_rules(&cfg.rules)?;
    if rules.is_empty() {
        return Ok(Vec::new());
    }
    let content = render_jail_config(&rules);
    let jails = rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.name.clone())
        .collect();
    Ok(vec![Box::new(Fail2banTask::new(content, jails)) as BoxedTask])
}
