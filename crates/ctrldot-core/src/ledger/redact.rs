//! Structural redaction of sensitive values.
//!
//! Redaction walks the decoded value once and rewrites leaves by key-path
//! membership; it never relies on textual filtering of serialised output.
//! A key is sensitive when its lowercase name contains any of the redaction
//! tokens as a substring.

use serde_json::{Map, Value};

/// The redaction keyset, recorded in every bundle manifest.
pub const REDACT_KEYS: [&str; 5] = ["api_key", "token", "password", "secret", "key"];

/// Replacement sentinel for redacted values.
const SENTINEL: &str = "[redacted]";

/// Redacts sensitive keys in a map; values under matching keys become the
/// sentinel, recursively through nested maps and sequences.
#[must_use]
pub fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        if is_sensitive(key) {
            out.insert(key.clone(), Value::String(SENTINEL.to_string()));
        } else {
            out.insert(key.clone(), redact_value(value));
        }
    }
    out
}

/// Redacts sensitive keys inside an arbitrary JSON value.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_lowercase();
    REDACT_KEYS.iter().any(|token| lower.contains(token))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn exact_and_substring_keys_are_redacted() {
        let input = as_map(json!({
            "api_key": "sk-123",
            "github_token": "ghp_abc",
            "PASSWORD": "hunter2",
            "keychain": "also hit, contains 'key'",
            "path": "/tmp/x",
        }));
        let out = redact_map(&input);
        assert_eq!(out["api_key"], json!("[redacted]"));
        assert_eq!(out["github_token"], json!("[redacted]"));
        assert_eq!(out["PASSWORD"], json!("[redacted]"));
        assert_eq!(out["keychain"], json!("[redacted]"));
        assert_eq!(out["path"], json!("/tmp/x"));
    }

    #[test]
    fn redaction_recurses_through_maps_and_arrays() {
        let input = as_map(json!({
            "config": {
                "nested": {"secret_value": "x", "name": "ok"},
                "list": [{"token": "t"}, {"plain": 1}],
            }
        }));
        let out = redact_map(&input);
        assert_eq!(out["config"]["nested"]["secret_value"], json!("[redacted]"));
        assert_eq!(out["config"]["nested"]["name"], json!("ok"));
        assert_eq!(out["config"]["list"][0]["token"], json!("[redacted]"));
        assert_eq!(out["config"]["list"][1]["plain"], json!(1));
    }

    #[test]
    fn no_sensitive_leaf_survives_anywhere() {
        let input = as_map(json!({
            "a": {"b": [{"c": {"api_key": "leak"}}]},
            "secrets": ["entire value replaced when the key matches"],
        }));
        let out = redact_map(&input);
        let rendered = serde_json::to_string(&out).unwrap();
        assert!(!rendered.contains("leak"));
        assert_eq!(out["secrets"], json!("[redacted]"));
    }

    #[test]
    fn non_object_values_pass_through() {
        assert_eq!(redact_value(&json!(42)), json!(42));
        assert_eq!(redact_value(&json!("plain")), json!("plain"));
        assert_eq!(redact_value(&json!(null)), json!(null));
    }
}
