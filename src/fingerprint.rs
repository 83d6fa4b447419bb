//! Content-addressed identity for simulation requests.
//!
//! A fingerprint is the lowercase hex SHA-256 of the canonical JSON form of a
//! request's submitted document: object keys sorted recursively, compact
//! separators. Defaults are filled in and unknown settings dropped before
//! hashing, so every spelling of the same request shares one fingerprint.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::manifest::ManifestEntry;
use crate::model::SimulationRequest;

/// Serialize `value` with every object's keys sorted, at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (idx, (key, item)) in sorted.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint of a raw JSON document.
///
/// Anything that is not an object is hashed as `{"expression": "<text>"}`.
pub fn fingerprint_value(value: &Value) -> String {
    let normalized;
    let target = match value {
        Value::Object(_) => value,
        Value::String(text) => {
            normalized = serde_json::json!({ "expression": text });
            &normalized
        }
        other => {
            normalized = serde_json::json!({ "expression": other.to_string() });
            &normalized
        }
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(target).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a parsed request, taken over the document it submits.
/// This is the value stored in checkpoints.
pub fn fingerprint(request: &SimulationRequest) -> String {
    fingerprint_value(&request.to_document())
}

/// Entries whose fingerprint is not in `completed`, in their original order.
pub fn filter_pending(entries: &[ManifestEntry], completed: &HashSet<String>) -> Vec<ManifestEntry> {
    entries
        .iter()
        .filter(|entry| !completed.contains(&entry.fingerprint))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimulationSettings;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_fingerprint() {
        let a: Value = serde_json::from_str(
            r#"{"type":"REGULAR","settings":{"region":"USA","delay":1},"regular":"rank(close)"}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"regular":"rank(close)","settings":{"delay":1,"region":"USA"},"type":"REGULAR"}"#,
        )
        .unwrap();
        assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": true, "x": null} ]}, "a": "s"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn non_objects_are_normalized_to_expression_documents() {
        let bare = fingerprint_value(&json!("rank(close)"));
        let wrapped = fingerprint_value(&json!({"expression": "rank(close)"}));
        assert_eq!(bare, wrapped);

        let number = fingerprint_value(&json!(7));
        assert_eq!(number, fingerprint_value(&json!({"expression": "7"})));
    }

    #[test]
    fn fingerprints_are_hex_sha256() {
        let fp = fingerprint_value(&json!({"regular": "x"}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_matches_known_sha256() {
        assert_eq!(
            fingerprint_value(&json!("rank(close)")),
            "99ec35cdee79e2e655d329263490d38a61a31b98c6994c4186e5b64df41d1838"
        );
    }

    #[test]
    fn different_requests_differ() {
        let a = SimulationRequest::regular("rank(close)", SimulationSettings::default());
        let b = SimulationRequest::regular("rank(open)", SimulationSettings::default());
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
    }

    #[test]
    fn filter_pending_keeps_order_and_drops_completed() {
        let entries: Vec<ManifestEntry> = (0..6)
            .map(|i| {
                ManifestEntry::from_value(&json!({"regular": format!("alpha_{}", i)})).unwrap()
            })
            .collect();
        let completed: HashSet<String> = [&entries[1], &entries[4]]
            .iter()
            .map(|entry| entry.fingerprint.clone())
            .collect();

        let pending = filter_pending(&entries, &completed);
        let expressions: Vec<String> = pending
            .iter()
            .map(|entry| entry.request.payload().describe())
            .collect();
        assert_eq!(expressions, vec!["alpha_0", "alpha_2", "alpha_3", "alpha_5"]);

        let again = filter_pending(&pending, &completed);
        assert_eq!(again.len(), pending.len());
    }
}
