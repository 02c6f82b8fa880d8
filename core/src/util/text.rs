use std::collections::{HashMap, HashSet};

/// Trims, drops empties and removes duplicates, keeping first occurrences in order.
pub fn clean_list<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.as_ref().trim();
        if value.is_empty() || !seen.insert(value.to_string()) {
            continue;
        }
        out.push(value.to_string());
    }
    out
}

pub fn has_exact_line(output: &str, line: &str) -> bool {
    output.lines().any(|l| l == line)
}

pub fn line_set(output: &str) -> HashSet<&str> {
    output.lines().collect()
}

/// Reads `key value` lines into a lowercased map, skipping blanks and `#` comments.
///
/// Only the first two fields are read, so trailing inline comments are ignored. Later lines
/// overwrite earlier ones.
pub fn parse_key_value_settings(output: &str) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        if let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            settings.insert(key.to_lowercase(), value.to_lowercase());
        }
    }
    settings
}
