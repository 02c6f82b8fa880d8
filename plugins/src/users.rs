//! Local user accounts: existence, supplementary groups, sudo rights and authorized keys.
use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use settled_core::context::RunContext;
use settled_core::plan::TaskSpec;
use settled_core::task::{BoxedTask, Task};
use settled_core::transport::RemoteHost;
use settled_core::util::{
    clean_list, has_exact_line, line_set, read_file_if_exists, sanitize_filename, shell_escape,
    sudo_prefix, validate_identifier,
};

use crate::script::{self, run_script};

pub const TASK_KEY: &str = "users";

pub const SUDOERS_DIR: &str = "/etc/sudoers.d";
pub const SUDOERS_FILE_PREFIX: &str = "settled-";
pub const SSH_DIR_NAME: &str = ".ssh";
pub const AUTHORIZED_KEYS_FILE_NAME: &str = "authorized_keys";
const SSH_DIR_MODE: &str = "700";
const AUTHORIZED_KEYS_MODE: &str = "600";
const SUDOERS_FILE_MODE: &str = "440";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub sudo_nopasswd: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub authorized_keys: Vec<String>,
}

/// User name → settings.
pub type UsersConfig = BTreeMap<String, UserConfig>;

pub fn spec() -> TaskSpec {
    TaskSpec::typed(TASK_KEY, Some("users.toml"), build_tasks)
}

/// One task per user, in name order.
pub fn build_tasks(cfg: UsersConfig) -> anyhow::Result<Vec<BoxedTask>> {
    let mut tasks: Vec<BoxedTask> = Vec::with_capacity(cfg.len());
    for (name, mut user) in cfg {
        validate_identifier("user", &name)?;
        user.groups = clean_list(&user.groups);
        user.authorized_keys = clean_list(&user.authorized_keys);
        for group in &user.groups {
            validate_identifier("group", group)?;
        }
        tasks.push(Box::new(UserTask::new(name, user)));
    }
    Ok(tasks)
}

pub fn sudoers_file_path(name: &str) -> String {
    format!(
        "{SUDOERS_DIR}/{SUDOERS_FILE_PREFIX}{}",
        sanitize_filename(name, "user")
    )
}

pub fn authorized_keys_path(home: &str) -> String {
    format!(
        "{}/{SSH_DIR_NAME}/{AUTHORIZED_KEYS_FILE_NAME}",
        home.trim_end_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct UserTask {
    name: String,
    config: UserConfig,
}

#[derive(Serialize)]
struct UserScript<'a> {
    name: &'a str,
    groups: &'a [String],
    sudo: bool,
    sudoers_dir: &'a str,
    sudoers_file: String,
    sudoers_line: String,
    sudoers_mode: &'a str,
    authorized_keys: &'a [String],
    ssh_dir_name: &'a str,
    authorized_keys_name: &'a str,
    ssh_dir_mode: &'a str,
    authorized_keys_mode: &'a str,
}

impl UserTask {
    pub fn new(name: impl Into<String>, config: UserConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn sudoers_line(&self) -> String {
        if self.config.sudo_nopasswd {
            format!("{} ALL=(ALL) NOPASSWD:ALL", self.name)
        } else {
            format!("{} ALL=(ALL) ALL", self.name)
        }
    }

    fn render_script(&self) -> anyhow::Result<String> {
        script::render(
            "users.sh",
            UserScript {
                name: &self.name,
                groups: &self.config.groups,
                sudo: self.config.sudo,
                sudoers_dir: SUDOERS_DIR,
                sudoers_file: sudoers_file_path(&self.name),
                sudoers_line: self.sudoers_line(),
                sudoers_mode: SUDOERS_FILE_MODE,
                authorized_keys: &self.config.authorized_keys,
                ssh_dir_name: SSH_DIR_NAME,
                authorized_keys_name: AUTHORIZED_KEYS_FILE_NAME,
                ssh_dir_mode: SSH_DIR_MODE,
                authorized_keys_mode: AUTHORIZED_KEYS_MODE,
            },
        )
    }

    async fn needs_group_update(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        if self.config.groups.is_empty() {
            return Ok(false);
        }
        let current = lookup_groups(ctx, host, &self.name).await?;
        Ok(self.config.groups.iter().any(|g| !current.contains(g)))
    }

    async fn sudoers_matches(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
        prefix: &str,
    ) -> anyhow::Result<bool> {
        let contents = read_file_if_exists(ctx, host, prefix, &sudoers_file_path(&self.name))
            .await
            .with_context(|| format!("read sudoers for {:?}", self.name))?;
        Ok(contents.is_some_and(|c| has_exact_line(&c, &self.sudoers_line())))
    }

    async fn authorized_keys_match(
        &self,
        ctx: &RunContext,
        host: &dyn RemoteHost,
        prefix: &str,
        home: &str,
    ) -> anyhow::Result<bool> {
        if home.trim().is_empty() {
            anyhow::bail!("empty home directory for {:?}", self.name);
        }
        let contents = read_file_if_exists(ctx, host, prefix, &authorized_keys_path(home))
            .await
            .with_context(|| format!("read authorized_keys for {:?}", self.name))?;
        let Some(contents) = contents else {
            return Ok(false);
        };
        let present = line_set(&contents);
        Ok(self
            .config
            .authorized_keys
            .iter()
            .all(|key| present.contains(key.as_str())))
    }
}

#[async_trait]
impl Task for UserTask {
    fn name(&self) -> String {
        format!("user: {}", self.name)
    }

    async fn needs_execution(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<bool> {
        let Some(entry) = lookup_user(ctx, host, &self.name).await? else {
            return Ok(true);
        };

        if self.needs_group_update(ctx, host).await? {
            return Ok(true);
        }

        let wants_sudo = self.config.sudo;
        let wants_keys = !self.config.authorized_keys.is_empty();
        if !wants_sudo && !wants_keys {
            return Ok(false);
        }
        let prefix = sudo_prefix(ctx, host).await?;

        if wants_sudo && !self.sudoers_matches(ctx, host, prefix).await? {
            return Ok(true);
        }
        if wants_keys && !self.authorized_keys_match(ctx, host, prefix, &entry.home).await? {
            return Ok(true);
        }
        Ok(false)
    }

    async fn execute(&self, ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<()> {
        let prefix = sudo_prefix(ctx, host).await?;
        let script = self.render_script()?;
        run_script(ctx, host, prefix, &script).await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct UserEntry {
    home: String,
}

/// `None` when the account does not exist. `getent` exits non-zero with no output for a
/// missing user, which is not an error.
async fn lookup_user(
    ctx: &RunContext,
    host: &dyn RemoteHost,
    name: &str,
) -> anyhow::Result<Option<UserEntry>> {
    let output = match host
        .execute(ctx, &format!("getent passwd {}", shell_escape(name)))
        .await
    {
        Ok(output) => output,
        Err(err) if err.output().is_some_and(|o| o.trim().is_empty()) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("lookup user {name:?}")),
    };

    let line = output.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 6 {
        anyhow::bail!("unexpected passwd entry for {name:?}: {line}");
    }
    Ok(Some(UserEntry {
        home: fields[5].to_string(),
    }))
}

async fn lookup_groups(
    ctx: &RunContext,
    host: &dyn RemoteHost,
    name: &str,
) -> anyhow::Result<HashSet<String>> {
    let output = host
        .execute(ctx, &format!("id -nG {}", shell_escape(name)))
        .await
        .with_context(|| format!("lookup groups for {name:?}"))?;
    Ok(output.split_whitespace().map(str::to_string).collect())
}
