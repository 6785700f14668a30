//! Filter sanitization.
//!
//! Client-supplied filters may reach regex operators, so every string value is
//! escaped before it is used, either for the store or for the cache key.
//! Identifier-like fields are left alone: escaping never changes a hex id, and
//! reference fields must compare exactly.

use serde_json::{Map, Value};

/// True for `_id`, `id`, and names ending in `Id` or `_id` (`meterId`,
/// `customer_id`).
pub fn is_identifier_field(name: &str) -> bool {
    name == "_id" || name == "id" || name.ends_with("Id") || name.ends_with("_id")
}

/// Escape regex metacharacters in every string value of `filter`.
///
/// Objects and arrays are walked recursively. Values under an
/// identifier-like key are copied through untouched, including nested
/// operator objects such as `{"meterId": {"$in": [...]}}`.
pub fn sanitize_filter(filter: &Value) -> Value {
    match filter {
        Value::Object(map) => Value::Object(sanitize_object(map)),
        other => sanitize_value(other),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let value = if is_identifier_field(key) {
                value.clone()
            } else {
                sanitize_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(regex::escape(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(sanitize_object(map)),
        other => other.clone(),
    }
}
