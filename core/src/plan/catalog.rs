use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::error::PlanError;
use crate::task::ConfigTree;

const BUILTIN_DEFAULTS: &[(&str, &str)] = &[
    ("users.toml", include_str!("../../defaults/users.toml")),
    ("root_login.toml", include_str!("../../defaults/root_login.toml")),
    (
        "ssh_password_auth.toml",
        include_str!("../../defaults/ssh_password_auth.toml"),
    ),
    ("fail2ban.toml", include_str!("../../defaults/fail2ban.toml")),
];

lazy_static! {
    static ref BUILTIN: DefaultsCatalog = DefaultsCatalog::from_entries(BUILTIN_DEFAULTS);
}

/// Read-only table of per-key default trees, keyed by resource id.
///
/// Resources are parsed once when the catalog is built; a resource that fails to parse is
/// kept as an error and reported to whichever spec asks for it.
#[derive(Debug, Clone, Default)]
pub struct DefaultsCatalog {
    entries: HashMap<String, Result<ConfigTree, String>>,
}

impl DefaultsCatalog {
    /// Defaults compiled into the binary.
    pub fn builtin() -> &'static DefaultsCatalog {
        &BUILTIN
    }

    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        let entries = entries
            .iter()
            .map(|(id, source)| (id.to_string(), parse_defaults(source)))
            .collect();
        Self { entries }
    }

    /// Defaults for `key` stored under `id`. An empty resource yields an empty map.
    pub fn load(&self, key: &str, id: &str) -> Result<ConfigTree, PlanError> {
        match self.entries.get(id) {
            Some(Ok(tree)) => Ok(tree.clone()),
            Some(Err(reason)) => Err(PlanError::Defaults {
                key: key.to_string(),
                reason: format!("parse {id}: {reason}"),
            }),
            None => Err(PlanError::Defaults {
                key: key.to_string(),
                reason: format!("no defaults resource named {id:?}"),
            }),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

fn parse_defaults(source: &str) -> Result<ConfigTree, String> {
    if source.trim().is_empty() {
        return Ok(ConfigTree::new());
    }
    toml::from_str::<ConfigTree>(source).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_resources_all_parse() {
        let catalog = DefaultsCatalog::builtin();
        for (id, _) in BUILTIN_DEFAULTS {
            assert!(catalog.load("test", id).is_ok(), "{id} failed to parse");
        }
    }

    #[test]
    fn empty_resource_is_empty_map() {
        let catalog = DefaultsCatalog::from_entries(&[("empty.toml", "# nothing\n")]);
        assert!(catalog.load("k", "empty.toml").unwrap().is_empty());
    }

    #[test]
    fn nested_tables_become_maps() {
        let catalog =
            DefaultsCatalog::from_entries(&[("d.toml", "disable = true\n[rules.sshd]\nport = \"ssh\"\n")]);
        let tree = catalog.load("k", "d.toml").unwrap();
        assert_eq!(tree["disable"], json!(true));
        assert_eq!(tree["rules"]["sshd"]["port"], json!("ssh"));
    }

    #[test]
    fn missing_or_broken_resources_name_the_key() {
        let catalog = DefaultsCatalog::from_entries(&[("bad.toml", "= nope")]);
        let err = catalog.load("users", "missing.toml").unwrap_err();
        assert_eq!(err.key(), "users");
        let err = catalog.load("fail2ban", "bad.toml").unwrap_err();
        assert!(matches!(err, PlanError::Defaults { ref key, .. } if key == "fail2ban"));
    }
}
