//! Deterministic cache key derivation.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sort array elements by their canonical JSON text, recursively.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(canonicalize).collect();
            items.sort_by_cached_key(|v| v.to_string());
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect(),
        ),
        other => other,
    }
}

/// `{prefix}:{sha256 hex}` over the compact JSON of the non-null fields,
/// sorted by name with collections sorted. Field order and element order do
/// not affect the key.
pub fn derive_key(prefix: &str, fields: &BTreeMap<String, Value>) -> String {
    let canonical: BTreeMap<&str, Value> = fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.as_str(), canonicalize(v.clone())))
        .collect();
    // BTreeMap keys serialize in order; the map cannot fail to serialize.
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(json.as_bytes());
    format!("{}:{}", prefix, hex::encode(digest))
}
