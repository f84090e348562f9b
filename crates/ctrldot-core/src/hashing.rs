//! Canonical JSON serialisation and action hashing.
//!
//! The loop detector identifies repeats by hashing the parts of a proposal
//! that make it "the same action": agent, action type, target, and inputs.
//! Canonical form sorts object keys lexicographically at every level and
//! emits no insignificant whitespace, so two structurally equal proposals
//! always hash identically regardless of field order on the wire.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::ActionProposal;

/// Renders a JSON value in canonical form: object keys sorted
/// lexicographically at every level, no insignificant whitespace.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String renders with JSON escaping applied.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 over the canonical form of a JSON value.
#[must_use]
pub fn canonical_sha256(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_string(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// The identity hash of a proposal for loop detection.
///
/// Uses the proposal-supplied `context.hash` when present, otherwise the
/// SHA-256 of the canonical `{agent_id, action_type, target, inputs}`
/// serialisation.
#[must_use]
pub fn action_hash(proposal: &ActionProposal) -> String {
    if !proposal.context.hash.is_empty() {
        return proposal.context.hash.clone();
    }
    let probe = serde_json::json!({
        "agent_id": proposal.agent_id,
        "action_type": proposal.action.action_type,
        "target": proposal.action.target,
        "inputs": proposal.action.inputs,
    });
    canonical_sha256(&probe)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "y": [1, {"k": "v"}]}});
        assert_eq!(
            canonical_string(&v),
            r#"{"a":{"y":[1,{"k":"v"}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn canonical_has_no_whitespace() {
        let v = json!({"x": [1, 2, 3], "s": "a b"});
        let s = canonical_string(&v);
        assert_eq!(s, r#"{"s":"a b","x":[1,2,3]}"#);
    }

    #[test]
    fn field_order_does_not_change_hash() {
        let a = json!({"agent_id": "a1", "action_type": "git.push"});
        let b = json!({"action_type": "git.push", "agent_id": "a1"});
        assert_eq!(canonical_sha256(&a), canonical_sha256(&b));
    }

    #[test]
    fn supplied_hash_wins() {
        let mut proposal = ActionProposal {
            agent_id: "a1".to_string(),
            ..ActionProposal::default()
        };
        proposal.context.hash = "deadbeef".to_string();
        assert_eq!(action_hash(&proposal), "deadbeef");
    }

    #[test]
    fn computed_hash_is_stable() {
        let mut proposal = ActionProposal {
            agent_id: "a1".to_string(),
            ..ActionProposal::default()
        };
        proposal.action.action_type = "filesystem.read".to_string();
        let first = action_hash(&proposal);
        let second = action_hash(&proposal);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
