//! Environment variable substitution for config values.
//!
//! Inside any string value, `${NAME}` expands to the variable or fails the
//! load, `${NAME:-default}` falls back to the default, and the legacy bare
//! `$NAME` form behaves like `${NAME}`.

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;

static BRACED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap());

static LEGACY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Substitute environment variables in every string nested in `value`.
/// `path` is the originating file, used for error reporting.
pub fn substitute_env(value: &mut Value, path: &Path) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_str(s, path)?;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item, path)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_env(item, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn substitute_str(input: &str, path: &Path) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;

    let braced = BRACED_PATTERN.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            },
        }
    });

    let result = LEGACY_PATTERN.replace_all(&braced, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::Environment {
            name,
            path: path.to_path_buf(),
        }),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn subst(mut value: Value) -> Result<Value, ConfigError> {
        substitute_env(&mut value, &PathBuf::from("test.json"))?;
        Ok(value)
    }

    #[test]
    fn test_braced_substitution() {
        std::env::set_var("IRCWATCH_TEST_TOKEN", "s3cret");
        let result = subst(json!({"authToken": "${IRCWATCH_TEST_TOKEN}"})).unwrap();
        assert_eq!(result, json!({"authToken": "s3cret"}));
    }

    #[test]
    fn test_default_fallback() {
        std::env::remove_var("IRCWATCH_TEST_UNSET");
        let result = subst(json!("${IRCWATCH_TEST_UNSET:-fallback}")).unwrap();
        assert_eq!(result, json!("fallback"));
    }

    #[test]
    fn test_missing_required_fails() {
        std::env::remove_var("IRCWATCH_TEST_UNSET2");
        let err = subst(json!("${IRCWATCH_TEST_UNSET2}")).unwrap_err();
        assert!(matches!(err, ConfigError::Environment { name, .. } if name == "IRCWATCH_TEST_UNSET2"));
    }

    #[test]
    fn test_legacy_form() {
        std::env::set_var("IRCWATCH_TEST_LEGACY", "v");
        let result = subst(json!("$IRCWATCH_TEST_LEGACY/logs")).unwrap();
        assert_eq!(result, json!("v/logs"));
    }

    #[test]
    fn test_nested_values_and_non_strings() {
        std::env::set_var("IRCWATCH_TEST_NEST", "x");
        let result = subst(json!({
            "list": ["${IRCWATCH_TEST_NEST}", 42],
            "deep": {"v": "${IRCWATCH_TEST_NEST:-y}"},
            "number": 7
        }))
        .unwrap();
        assert_eq!(
            result,
            json!({"list": ["x", 42], "deep": {"v": "x"}, "number": 7})
        );
    }
}
