//! Content fingerprints
//!
//! A fingerprint is a deterministic hash of the *semantic* content of a
//! desired spec. Object keys are visited in sorted order regardless of how
//! the input was built or parsed, so field order never changes the result.
//! The digest is truncated to 160 bits and hex encoded, which keeps it a
//! valid label value.

use crate::labels::FINGERPRINT_LABEL;
use crate::meta::ObjectMeta;
use serde::Serialize;
use serde_json::Value;

/// Digest bytes kept from the blake3 output
const FINGERPRINT_BYTES: usize = 20;

/// Fingerprint any serializable value.
///
/// # Panics
///
/// Panics if `spec` cannot be represented as JSON (e.g. a map with
/// non-string keys). That is a programming error; a wrong hash would be
/// worse than a crash.
pub fn fingerprint<T: Serialize + ?Sized>(spec: &T) -> String {
    let value = serde_json::to_value(spec)
        .unwrap_or_else(|e| panic!("cannot fingerprint non-serializable value: {e}"));

    let mut hasher = blake3::Hasher::new();
    hash_canonical(&value, &mut hasher);
    let digest = hasher.finalize();

    digest.as_bytes()[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn hash_canonical(value: &Value, hasher: &mut blake3::Hasher) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_canonical(&Value::String(key.clone()), hasher);
                hasher.update(b":");
                hash_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        // Scalars have a single JSON encoding
        scalar => {
            hasher.update(scalar.to_string().as_bytes());
        }
    }
}

/// Store a fingerprint on an object's labels
pub fn set_fingerprint_label(meta: &mut ObjectMeta, fingerprint: &str) {
    meta.labels
        .insert(FINGERPRINT_LABEL.to_string(), fingerprint.to_string());
}

/// Fingerprint stored on a live object, if any
pub fn fingerprint_label(meta: &ObjectMeta) -> Option<&str> {
    meta.labels.get(FINGERPRINT_LABEL).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_fingerprint_is_label_safe() {
        let fp = fingerprint(&json!({"tag": "v1"}));
        assert_eq!(fp.len(), FINGERPRINT_BYTES * 2);
        assert!(fp.len() <= 63);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let v1 = fingerprint(&json!({"type": "webservice", "tag": "v1"}));
        let v2 = fingerprint(&json!({"type": "webservice", "tag": "v2"}));
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(fingerprint(&json!(["a", "b"])), fingerprint(&json!(["b", "a"])));
    }

    #[test]
    fn test_string_and_number_differ() {
        assert_ne!(fingerprint(&json!({"port": 80})), fingerprint(&json!({"port": "80"})));
    }

    #[test]
    fn test_hash_map_order_does_not_matter() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("key-{i}"), i);
        }
        for i in (0..32).rev() {
            b.insert(format!("key-{i}"), i);
        }
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    #[should_panic(expected = "cannot fingerprint")]
    fn test_non_string_map_keys_panic() {
        let mut map = HashMap::new();
        map.insert(vec![1u8, 2], "value");
        fingerprint(&map);
    }

    #[test]
    fn test_fingerprint_label_round_trip() {
        let mut meta = ObjectMeta::new("default", "web");
        assert_eq!(fingerprint_label(&meta), None);

        set_fingerprint_label(&mut meta, "abc123");
        assert_eq!(fingerprint_label(&meta), Some("abc123"));
    }

    proptest! {
        #[test]
        fn prop_serialized_field_order_is_irrelevant(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..16)
        ) {
            let forward: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", k, v))
                .collect();
            let mut backward = forward.clone();
            backward.reverse();

            let first: Value = serde_json::from_str(&format!("{{{}}}", forward.join(","))).unwrap();
            let second: Value = serde_json::from_str(&format!("{{{}}}", backward.join(","))).unwrap();

            prop_assert_eq!(fingerprint(&first), fingerprint(&second));
        }
    }
}
