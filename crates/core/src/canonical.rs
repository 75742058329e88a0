//! Canonical (sorted-key) JSON serialization.
//!
//! Signatures over command payloads must be reproducible: two structurally
//! identical payloads have to serialize to byte-identical input no matter in
//! which order their fields were inserted. We achieve this by recursively
//! rebuilding every JSON object with its keys in ascending lexicographic
//! order before serializing with `serde_json` (compact, no insignificant
//! whitespace).

use serde_json::Value;

/// Serialize `value` canonically: all object keys sorted, compact output.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&sorted(value))
}

/// Canonical serialization as UTF-8 bytes, the exact input that gets signed.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    canonical_json(value).map(String::into_bytes)
}

/// Recursively rebuild `value` with object keys in sorted order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            // Inserting in sorted order keeps the output sorted for both
            // map backends of serde_json (BTreeMap and preserve_order).
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (key, val) in entries {
                out.insert(key.clone(), sorted(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
