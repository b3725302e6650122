// Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

fn env_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("static regex"))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]{3}_$").expect("static regex"))
}

/// A configuration key must be a bare identifier: no `=`, whitespace or line breaks,
/// otherwise the flat `KEY=value` format cannot round-trip it.
pub fn is_valid_env_key(key: &str) -> bool {
    env_key_re().is_match(key)
}

/// Values must stay on one line.
pub fn is_valid_env_value(value: &str) -> bool {
    !value.contains('\n') && !value.contains('\r')
}

/// Shape of a generated table prefix (`abc_`).
pub fn is_generated_prefix(prefix: &str) -> bool {
    prefix_re().is_match(prefix)
}

/// Validate database host (non-empty, no whitespace)
pub fn validate_db_host(host: &str) -> Result<(), String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("Database host is required.".to_string());
    }
    if host.chars().any(char::is_whitespace) {
        return Err("Database host must not contain whitespace.".to_string());
    }
    Ok(())
}

/// Validate database name (1-64 chars, no path or quote characters)
pub fn validate_db_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Database name is required.".to_string());
    }
    if name.len() > 64 {
        return Err("Database name must be 64 characters or fewer.".to_string());
    }
    let invalid_chars = ['/', '\\', '.', '"', '\'', '`', '\0'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return Err("Database name contains invalid characters.".to_string());
    }
    Ok(())
}
