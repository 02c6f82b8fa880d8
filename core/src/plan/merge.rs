use crate::task::{ConfigTree, ConfigValue};

/// Merges an override onto a key's defaults.
///
/// A null override counts as absent and an empty defaults map counts as no defaults. A
/// non-map override replaces the defaults outright. Two maps merge key by key, recursing
/// only where both sides hold maps; lists are replaced, never appended. The result never
/// aliases either input.
pub fn merge_config(
    defaults: Option<&ConfigTree>,
    override_value: Option<&ConfigValue>,
) -> Option<ConfigValue> {
    let defaults = defaults.filter(|d| !d.is_empty());
    match override_value {
        None | Some(ConfigValue::Null) => defaults.map(|d| ConfigValue::Object(d.clone())),
        Some(ConfigValue::Object(over)) => match defaults {
            Some(base) => Some(ConfigValue::Object(merge_maps(base, over))),
            None => Some(ConfigValue::Object(over.clone())),
        },
        Some(other) => Some(other.clone()),
    }
}

fn merge_maps(base: &ConfigTree, over: &ConfigTree) -> ConfigTree {
    let mut out = base.clone();
    for (key, value) in over {
        let merged = match (out.get(key), value) {
            (Some(ConfigValue::Object(b)), ConfigValue::Object(o)) => {
                ConfigValue::Object(merge_maps(b, o))
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}
