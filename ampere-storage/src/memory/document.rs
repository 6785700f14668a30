//! Path access, ordering and projection over JSON documents.

use std::cmp::Ordering;

use ampere_core::ID_FIELD;
use serde_json::{Map, Value};

/// Resolve a dotted path. Numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set a dotted path, creating intermediate objects as needed.
///
/// Returns false if an intermediate segment is a non-object value.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Remove a dotted path, returning the removed value.
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.as_object_mut()?.remove(path),
        Some((parent, leaf)) => get_path_mut(doc, parent)?.as_object_mut()?.remove(leaf),
    }
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        _ => None,
    })
}

// Cross-type order: null < numbers < strings < objects < arrays < booleans.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values used by sorting and range operators.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Equality where `1` and `1.0` are the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b).is_eq(),
        _ => a == b,
    }
}

/// Apply a `select` list to a document.
///
/// All entries prefixed with `-` means exclusion; otherwise the listed fields
/// are kept along with `_id` (unless `-_id` is also listed).
pub fn project(doc: &Value, select: &[String]) -> Value {
    if select.is_empty() || !doc.is_object() {
        return doc.clone();
    }

    let (excluded, included): (Vec<&String>, Vec<&String>) =
        select.iter().partition(|f| f.starts_with('-'));

    if included.is_empty() {
        let mut out = doc.clone();
        for field in excluded {
            remove_path(&mut out, &field[1..]);
        }
        return out;
    }

    let keep_id = !excluded.iter().any(|f| f.as_str() == "-_id");
    let mut out = Value::Object(Map::new());
    if keep_id {
        if let Some(id) = doc.get(ID_FIELD) {
            set_path(&mut out, ID_FIELD, id.clone());
        }
    }
    for field in included {
        if let Some(value) = get_path(doc, field) {
            set_path(&mut out, field, value.clone());
        }
    }
    out
}
