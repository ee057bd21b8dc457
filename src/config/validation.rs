//! Configuration validation utilities.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),

    /// A job entry of a module file is invalid.
    #[error("module '{module}': {message}")]
    InvalidJob { module: String, message: String },
}

/// Parse a duration string using humantime.
///
/// Supports `30s`, `1m`, `5m30s`, `1h`, `100ms` and friends.
///
/// # Examples
///
/// ```
/// use chartd::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
    })
}

/// Expand environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}`; an unset variable without a
/// default expands to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    env_var_regex()
        .replace_all(input, |caps: &regex::Captures| {
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Expand environment variables in every string of a config bag.
pub fn expand_env_vars_in_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) if s.contains("${") => *s = expand_env_vars(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(expand_env_vars_in_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(expand_env_vars_in_value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration_valid() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 1m ").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2h 30m").unwrap(), Duration::from_secs(9000));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("Bearer ${CHARTD_TEST_UNSET_TOKEN:-anonymous}");
        assert_eq!(result, "Bearer anonymous");
        assert_eq!(expand_env_vars("${CHARTD_TEST_UNSET_TOKEN}"), "");
        assert_eq!(expand_env_vars("plain $HOME"), "plain $HOME");
    }

    #[test]
    fn test_expand_env_vars_in_value() {
        // SAFETY: test-specific variable, not read by any other test.
        unsafe {
            std::env::set_var("CHARTD_TEST_BIND_HOST", "10.0.0.5");
        }
        let mut bag = json!({
            "url": "http://${CHARTD_TEST_BIND_HOST}:8653/json/v1",
            "headers": {"X-Token": "${CHARTD_TEST_UNSET_SECRET:-none}"},
            "ports": [22, "${CHARTD_TEST_UNSET_PORT:-80}"],
            "timeout": 1,
        });
        expand_env_vars_in_value(&mut bag);
        assert_eq!(bag["url"], "http://10.0.0.5:8653/json/v1");
        assert_eq!(bag["headers"]["X-Token"], "none");
        assert_eq!(bag["ports"][1], "80");
        assert_eq!(bag["timeout"], 1);
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("CHARTD_TEST_BIND_HOST");
        }
    }
}
