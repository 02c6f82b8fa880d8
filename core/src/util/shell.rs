/// Single-quoted shell literal for `value`.
pub fn shell_escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// `<prefix>sh -c '<script>'`, where `prefix` is empty or a sudo marker.
pub fn sh_command(prefix: &str, script: &str) -> String {
    format!("{prefix}sh -c {}", shell_escape(script))
}
