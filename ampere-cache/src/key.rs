//! Deterministic cache key derivation.
//!
//! Keys have the shape `"{query_name}:{params}"` where `params` is the JSON
//! rendering of the parameter structure after every object's keys have been
//! sorted. Keys longer than [`MAX_KEY_LEN`] characters are replaced by the SHA-256 hex
//! digest of the full key, so the key space stays bounded no matter how large
//! a filter gets.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Longest key stored verbatim, in characters.
pub const MAX_KEY_LEN: usize = 100;

/// Length of a digested key (hex-encoded SHA-256).
pub const DIGEST_KEY_LEN: usize = 64;

/// Recursively sort object keys. Array element order is preserved.
///
/// The output does not depend on the insertion order of any object in the
/// input, which is what makes two structurally equal parameter bags derive the
/// same key.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k.clone(), normalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Derive a cache key from a query name and optional parameters.
///
/// Never fails: parameters that cannot be represented as JSON (for example
/// maps with non-string keys) fall back to their `Debug` rendering.
pub fn generate_key<P>(query_name: &str, params: Option<&P>) -> String
where
    P: Serialize + Debug + ?Sized,
{
    let serialized = match params {
        None => String::new(),
        Some(params) => match serde_json::to_value(params) {
            Ok(value) => normalize(&value).to_string(),
            Err(e) => {
                tracing::warn!(
                    query = query_name,
                    error = %e,
                    "Cache key parameters not serializable, using debug form"
                );
                format!("{:?}", params)
            }
        },
    };

    bound_key(format!("{}:{}", query_name, serialized))
}

/// Key for a query without parameters: `"{query_name}:"`.
pub fn bare_key(query_name: &str) -> String {
    bound_key(format!("{}:", query_name))
}

/// Replace keys over [`MAX_KEY_LEN`] characters by their digest.
fn bound_key(raw: String) -> String {
    if raw.chars().count() <= MAX_KEY_LEN {
        return raw;
    }
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_key_order_independence() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(generate_key("find", Some(&a)), generate_key("find", Some(&b)));
        assert_eq!(generate_key("find", Some(&a)), r#"find:{"a":1,"b":2}"#);
    }

    #[test]
    fn test_nested_objects_sorted_arrays_kept() {
        let a = json!({"filter": {"zone": "north", "active": true}, "ids": [3, 1, 2]});
        let b = json!({"ids": [3, 1, 2], "filter": {"active": true, "zone": "north"}});
        assert_eq!(generate_key("q", Some(&a)), generate_key("q", Some(&b)));

        let c = json!({"ids": [1, 2, 3], "filter": {"active": true, "zone": "north"}});
        assert_ne!(generate_key("q", Some(&a)), generate_key("q", Some(&c)));
    }

    #[test]
    fn test_missing_params() {
        assert_eq!(generate_key::<Value>("countAll", None), "countAll:");
        assert_eq!(bare_key("countAll"), "countAll:");
    }

    #[test]
    fn test_long_key_is_digested_and_stable() {
        let params = json!({
            "filter": {"customer": "x".repeat(120)},
            "sort": "createdAt",
        });
        let first = generate_key("find", Some(&params));
        let second = generate_key("find", Some(&params));
        assert_eq!(first.len(), DIGEST_KEY_LEN);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_boundary_length_kept_verbatim() {
        // "q:" + quoted string of 96 chars = 100 chars exactly
        let params = json!("y".repeat(96));
        let key = generate_key("q", Some(&params));
        assert_eq!(key.len(), MAX_KEY_LEN);
        assert!(key.starts_with("q:"));
    }

    #[test]
    fn test_unserializable_params_degrade() {
        let mut params: HashMap<(i32, i32), &str> = HashMap::new();
        params.insert((1, 2), "tuple key");
        let key = generate_key("weird", Some(&params));
        assert!(key.starts_with("weird:"));
        assert!(key.contains("tuple key"));
    }

    #[test]
    fn test_struct_params() {
        #[derive(Debug, Serialize)]
        struct Params {
            zone: &'static str,
            page: u32,
        }
        let key = generate_key("paginate", Some(&Params { zone: "z1", page: 2 }));
        assert_eq!(key, r#"paginate:{"page":2,"zone":"z1"}"#);
    }

    fn arb_object() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..8)
    }

    #[test]
    fn test_multibyte_key_bounded_by_characters() {
        // 90 characters, well over 100 bytes.
        let name = "ñ".repeat(90);
        let key = generate_key("q", Some(&name));
        assert_eq!(key, format!("q:\"{}\"", name));
        assert!(key.len() > MAX_KEY_LEN);

        let long = "ñ".repeat(120);
        assert_eq!(generate_key("q", Some(&long)).len(), DIGEST_KEY_LEN);
    }

    proptest! {
        #[test]
        fn prop_insertion_order_never_changes_key(entries in arb_object()) {
            let mut forward = Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in entries.iter().rev() {
                // Later duplicates win in `forward`; keep that winner here too.
                if forward.get(k) == Some(&json!(v)) {
                    backward.insert(k.clone(), json!(v));
                }
            }
            let a = Value::Object(forward);
            let b = Value::Object(backward);
            prop_assert_eq!(generate_key("p", Some(&a)), generate_key("p", Some(&b)));
        }

        #[test]
        fn prop_normalize_is_idempotent(entries in arb_object()) {
            let value = Value::Object(
                entries.into_iter().map(|(k, v)| (k, json!(v))).collect(),
            );
            let once = normalize(&value);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_key_length_bounded_in_chars(s in ".{0,300}") {
            let key = generate_key("q", Some(&s));
            prop_assert!(key.chars().count() <= MAX_KEY_LEN);
        }
    }
}
