use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;

use settled_core::task::ConfigValue;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fail2banConfig {
    /// Jail name → rule.
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Unset means enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub filter: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub port: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub logpath: StringList,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub max_retry: Option<i64>,
    #[serde(default)]
    pub find_time: Option<JailDuration>,
    #[serde(default)]
    pub ban_time: Option<JailDuration>,
    #[serde(default)]
    pub action: StringList,
    #[serde(default)]
    pub ignore_ip: StringList,
    /// Extra jail settings written verbatim after the built-in ones.
    #[serde(default)]
    pub options: BTreeMap<String, ConfigValue>,
}

/// Accepts a single string or a list of strings. A blank string is an empty list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringList(pub Vec<String>);

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringListVisitor;

        impl<'de> Visitor<'de> for StringListVisitor {
            type Value = StringList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or a list of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let v = v.trim();
                if v.is_empty() {
                    return Ok(StringList::default());
                }
                Ok(StringList(vec![v.to_string()]))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StringList::default())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringList(values))
            }
        }

        deserializer.deserialize_any(StringListVisitor)
    }
}

/// A duration in seconds, given as an integer or a string such as `"90"`, `"10m"` or `"1h30m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JailDuration(pub i64);

impl<'de> Deserialize<'de> for JailDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = JailDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("seconds as integer, or a string with an s/m/h/d suffix")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(JailDuration(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                i64::try_from(v)
                    .map(JailDuration)
                    .map_err(|_| E::custom(format!("duration {v} out of range")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                parse_duration(v).map(JailDuration).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Parses `"90"`, `"90s"`, `"10m"`, `"1h30m"`, `"2d"` into whole seconds.
pub fn parse_duration(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(format!("invalid duration {value:?}: unknown unit {c:?}")),
        };
        if digits.is_empty() {
            return Err(format!("invalid duration {value:?}: missing number before {c:?}"));
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {value:?}"))?;
        total = n
            .checked_mul(unit)
            .and_then(|s| total.checked_add(s))
            .ok_or_else(|| format!("duration {value:?} out of range"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration {value:?}: missing unit after {digits}"));
    }
    Ok(total)
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarVisitor;

    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or an integer")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}
