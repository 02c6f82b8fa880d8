fn is_safe_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        return fallback.to_string();
    }
    value
        .chars()
        .map(|c| if is_safe_name_char(c) { c } else { '_' })
        .collect()
}

/// Accepts only non-empty names made of `[A-Za-z0-9._-]`.
pub fn validate_identifier(kind: &str, value: &str) -> anyhow::Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{kind} name cannot be empty");
    }
    if trimmed != value {
        anyhow::bail!("{kind} name {value:?} has leading/trailing whitespace");
    }
    if let Some(bad) = value.chars().find(|c| !is_safe_name_char(*c)) {
        anyhow::bail!("{kind} name {value:?} contains invalid character {bad:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_filename("alice", "x"), "alice");
        assert_eq!(sanitize_filename("a b/c", "x"), "a_b_c");
        assert_eq!(sanitize_filename("", "fallback"), "fallback");
    }

    #[test]
    fn identifiers() {
        assert!(validate_identifier("user", "deploy-1.x_y").is_ok());
        assert!(validate_identifier("user", "").is_err());
        assert!(validate_identifier("user", " bob").is_err());
        let err = validate_identifier("group", "wh;eel").unwrap_err();
        assert_eq!(err.to_string(), "group name \"wh;eel\" contains invalid character ';'");
    }
}
