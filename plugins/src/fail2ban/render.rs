use std::collections::BTreeMap;
use std::fmt::Write;

use settled_core::task::ConfigValue;
use settled_core::util::{clean_list, validate_identifier};

use super::config::{JailDuration, Rule};

pub const CONTINUATION_INDENT: &str = "          ";

const KEY_ENABLED: &str = "enabled";
const KEY_FILTER: &str = "filter";
const KEY_PORT: &str = "port";
const KEY_PROTOCOL: &str = "protocol";
const KEY_LOGPATH: &str = "logpath";
const KEY_BACKEND: &str = "backend";
const KEY_MAXRETRY: &str = "maxretry";
const KEY_FINDTIME: &str = "findtime";
const KEY_BANTIME: &str = "bantime";
const KEY_ACTION: &str = "action";
const KEY_IGNOREIP: &str = "ignoreip";

const RESERVED_OPTION_KEYS: &[&str] = &[
    KEY_ENABLED,
    KEY_FILTER,
    KEY_PORT,
    KEY_PROTOCOL,
    KEY_LOGPATH,
    KEY_BACKEND,
    KEY_MAXRETRY,
    KEY_FINDTIME,
    KEY_BANTIME,
    KEY_ACTION,
    KEY_IGNOREIP,
];

/// A validated jail, ready to render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JailRule {
    pub name: String,
    pub enabled: bool,
    pub filter: String,
    pub port: String,
    pub protocol: String,
    pub logpath: Vec<String>,
    pub backend: String,
    pub max_retry: Option<i64>,
    pub find_time: Option<i64>,
    pub ban_time: Option<i64>,
    pub action: Vec<String>,
    pub ignore_ip: Vec<String>,
    /// Sorted by key.
    pub options: Vec<(String, String)>,
}

fn rule_error(rule: &str, message: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("fail2ban rule {rule:?} {message}")
}

/// Validates every rule; the result is sorted by jail name.
pub fn normalize_rules(raw: &BTreeMap<String, Rule>) -> anyhow::Result<Vec<JailRule>> {
    raw.iter()
        .map(|(name, rule)| normalize_rule(name, rule))
        .collect()
}

pub fn normalize_rule(name: &str, rule: &Rule) -> anyhow::Result<JailRule> {
    validate_identifier("fail2ban rule", name)?;

    let filter = rule.filter.trim();
    let normalized = JailRule {
        name: name.to_string(),
        enabled: rule.enabled.unwrap_or(true),
        filter: if filter.is_empty() { name } else { filter }.to_string(),
        port: rule.port.trim().to_string(),
        protocol: rule.protocol.trim().to_string(),
        logpath: clean_list(&rule.logpath.0),
        backend: rule.backend.trim().to_string(),
        max_retry: rule.max_retry,
        find_time: rule.find_time.map(|JailDuration(s)| s),
        ban_time: rule.ban_time.map(|JailDuration(s)| s),
        action: clean_list(&rule.action.0),
        ignore_ip: clean_list(&rule.ignore_ip.0),
        options: normalize_options(name, &rule.options)?,
    };
    validate_values(&normalized)?;
    Ok(normalized)
}

fn validate_values(rule: &JailRule) -> anyhow::Result<()> {
    let name = rule.name.as_str();
    if rule.max_retry.is_some_and(|n| n <= 0) {
        return Err(rule_error(name, "max_retry must be positive"));
    }
    for (field, value) in [("find_time", rule.find_time), ("ban_time", rule.ban_time)] {
        if value.is_some_and(|s| s <= 0) {
            return Err(rule_error(name, format!("{field} must be positive")));
        }
    }

    let singles = [
        ("filter", &rule.filter),
        ("port", &rule.port),
        ("protocol", &rule.protocol),
        ("backend", &rule.backend),
    ];
    for (field, value) in singles {
        single_line(name, field, value)?;
    }
    let lists = [
        ("logpath", &rule.logpath),
        ("action", &rule.action),
        ("ignore_ip", &rule.ignore_ip),
    ];
    for (field, values) in lists {
        for value in values {
            single_line(name, field, value)?;
        }
    }
    Ok(())
}

fn single_line(rule: &str, field: &str, value: &str) -> anyhow::Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(rule_error(rule, format!("{field} cannot contain newlines")));
    }
    Ok(())
}

fn normalize_options(
    rule: &str,
    options: &BTreeMap<String, ConfigValue>,
) -> anyhow::Result<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(options.len());
    for (key, value) in options {
        let key = key.trim();
        if key.is_empty() {
            return Err(rule_error(rule, "option key cannot be empty"));
        }
        validate_identifier("fail2ban option", key)?;
        if RESERVED_OPTION_KEYS.contains(&key.to_lowercase().as_str()) {
            return Err(rule_error(
                rule,
                format!("option {key:?} conflicts with built-in settings"),
            ));
        }
        let value = format_option_value(value)
            .map_err(|e| rule_error(rule, format!("option {key:?}: {e}")))?;
        if value.contains(['\r', '\n']) {
            return Err(rule_error(rule, format!("option {key:?} cannot contain newlines")));
        }
        out.push((key.to_string(), value));
    }
    out.sort();
    Ok(out)
}

fn format_option_value(value: &ConfigValue) -> Result<String, String> {
    match value {
        ConfigValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err("option value cannot be empty".to_string());
            }
            Ok(trimmed.to_string())
        }
        ConfigValue::Number(n) => Ok(n.to_string()),
        ConfigValue::Bool(b) => Ok(b.to_string()),
        ConfigValue::Null => Err("option value cannot be empty".to_string()),
        ConfigValue::Array(_) => Err("unsupported option value type list".to_string()),
        ConfigValue::Object(_) => Err("unsupported option value type map".to_string()),
    }
}

/// Renders `jail.d` content. Output is deterministic for a given rule set.
pub fn render_jail_config(rules: &[JailRule]) -> String {
    let mut buf = String::from("# Managed by settled. Manual changes may be overwritten.\n");
    for (idx, rule) in rules.iter().enumerate() {
        if idx > 0 {
            buf.push('\n');
        }
        let _ = writeln!(buf, "[{}]", rule.name);
        write_value(&mut buf, KEY_ENABLED, &rule.enabled.to_string());
        write_string(&mut buf, KEY_FILTER, &rule.filter);
        write_string(&mut buf, KEY_PORT, &rule.port);
        write_string(&mut buf, KEY_PROTOCOL, &rule.protocol);
        write_list(&mut buf, KEY_LOGPATH, &rule.logpath);
        write_string(&mut buf, KEY_BACKEND, &rule.backend);
        write_number(&mut buf, KEY_MAXRETRY, rule.max_retry);
        write_number(&mut buf, KEY_FINDTIME, rule.find_time);
        write_number(&mut buf, KEY_BANTIME, rule.ban_time);
        write_list(&mut buf, KEY_ACTION, &rule.action);
        if !rule.ignore_ip.is_empty() {
            write_value(&mut buf, KEY_IGNOREIP, &rule.ignore_ip.join(" "));
        }
        for (key, value) in &rule.options {
            write_value(&mut buf, key, value);
        }
    }
    buf
}

fn write_value(buf: &mut String, key: &str, value: &str) {
    let _ = writeln!(buf, "{key} = {value}");
}

fn write_string(buf: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        write_value(buf, key, value);
    }
}

fn write_number(buf: &mut String, key: &str, value: Option<i64>) {
    if let Some(value) = value {
        write_value(buf, key, &value.to_string());
    }
}

/// First value on the key line, the rest on indented continuation lines.
fn write_list(buf: &mut String, key: &str, values: &[String]) {
    let Some((first, rest)) = values.split_first() else {
        return;
    };
    write_value(buf, key, first);
    for value in rest {
        let _ = writeln!(buf, "{CONTINUATION_INDENT}{value}");
    }
}
