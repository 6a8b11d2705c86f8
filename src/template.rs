//! Template engine
//!
//! Resolves `{{dotted.path}}` placeholders inside strings against a JSON
//! context. Paths are dot-separated keys with optional non-negative array
//! indices (`users.0.nickname`). A lookup that fails, or resolves to null,
//! leaves the placeholder untouched so partially-resolved templates survive
//! round trips through the pipeline.
//!
//! # Examples
//!
//! ```ignore
//! let ctx = serde_json::json!({"server": {"displayName": "Libera"}});
//! assert_eq!(process("[{{server.displayName}}]", &ctx), "[Libera]");
//! assert_eq!(process("{{missing.path}}", &ctx), "{{missing.path}}");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap());

/// Resolve a dotted path against a JSON value.
///
/// Keys are matched case-sensitively; segments that parse as a non-negative
/// integer index into arrays. Returns `None` as soon as an intermediate
/// segment is missing.
pub fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Substitute every `{{path}}` occurrence in `input` that resolves to a
/// non-null value. Unresolved placeholders are kept literally.
pub fn process(input: &str, context: &Value) -> String {
    VARIABLE_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let path = &caps[1];
            match resolve_path(context, path) {
                Some(value) if !value.is_null() => value_to_string(value),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Apply [`process`] recursively to every string nested inside a JSON value.
/// Structure is preserved; non-string leaves pass through unchanged.
pub fn process_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(process(s, context)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| process_value(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), process_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Whether the string contains at least one `{{path}}` placeholder.
pub fn has_variables(input: &str) -> bool {
    VARIABLE_PATTERN.is_match(input)
}

/// Extract the paths of all placeholders in order of appearance.
pub fn extract_variables(input: &str) -> Vec<String> {
    VARIABLE_PATTERN
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// String form of a resolved value. Strings render bare (no quotes),
/// scalars via their display form, and composites as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
