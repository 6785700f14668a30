//! Filter evaluation for the in-memory driver.
//!
//! Supports the common subset of document-store query operators:
//! equality on (dotted) paths, `$eq $ne $gt $gte $lt $lte $in $nin $exists
//! $regex` with `$options`, and the `$and` / `$or` combinators. An array field
//! matches a scalar condition when any element matches.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::document::{compare_values, get_path, values_equal};

/// Evaluate `filter` against `doc`. `null` and `{}` match everything.
pub fn matches(doc: &Value, filter: &Value) -> Result<bool, String> {
    match filter {
        Value::Null => Ok(true),
        Value::Object(clauses) => matches_clauses(doc, clauses),
        other => Err(format!("filter must be an object, got {}", other)),
    }
}

fn matches_clauses(doc: &Value, clauses: &Map<String, Value>) -> Result<bool, String> {
    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => return Err(format!("unsupported operator {}", op)),
            path => matches_field(get_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> Result<&'a Vec<Value>, String> {
    condition
        .as_array()
        .ok_or_else(|| format!("{} expects an array of filters", op))
}

fn is_operator_object(condition: &Value) -> Option<&Map<String, Value>> {
    condition
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_field(actual: Option<&Value>, condition: &Value) -> Result<bool, String> {
    let Some(operators) = is_operator_object(condition) else {
        return Ok(equals(actual, condition));
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => range(actual, operand, |o| o == Ordering::Greater),
            "$gte" => range(actual, operand, |o| o != Ordering::Less),
            "$lt" => range(actual, operand, |o| o == Ordering::Less),
            "$lte" => range(actual, operand, |o| o != Ordering::Greater),
            "$in" => candidates(op, operand)?.iter().any(|c| equals(actual, c)),
            "$nin" => !candidates(op, operand)?.iter().any(|c| equals(actual, c)),
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                actual.is_some() == wanted
            }
            "$regex" => {
                let flags = operators.get("$options").and_then(Value::as_str).unwrap_or("");
                let regex = build_regex(operand, flags)?;
                any_element(actual, |v| v.as_str().is_some_and(|s| regex.is_match(s)))
            }
            "$options" => true,
            other => return Err(format!("unsupported operator {}", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn candidates<'a>(op: &str, operand: &'a Value) -> Result<&'a Vec<Value>, String> {
    operand
        .as_array()
        .ok_or_else(|| format!("{} expects an array", op))
}

/// Equality with document-store semantics: `null` also matches a missing
/// field, and an array field matches if it equals the value or contains it.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) => {
            values_equal(value, expected)
                || value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| values_equal(item, expected)))
        }
    }
}

// Range operators only compare values of the same kind.
fn range(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    any_element(actual, |value| {
        comparable(value, operand) && accept(compare_values(value, operand))
    })
}

fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

fn any_element(actual: Option<&Value>, test: impl Fn(&Value) -> bool) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&test),
        Some(value) => test(value),
    }
}

fn build_regex(pattern: &Value, flags: &str) -> Result<Regex, String> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| "$regex expects a string pattern".to_string())?;
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| format!("invalid $regex: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meter() -> Value {
        json!({
            "_id": "65a1b2c3d4e5f60718293a4b",
            "serial": "MTR-0042",
            "zone": "north",
            "kwh": 412.5,
            "phases": 3,
            "tags": ["smart", "residential"],
            "location": {"city": "Quito", "lat": -0.18},
            "active": true
        })
    }

    fn check(filter: Value) -> bool {
        matches(&meter(), &filter).unwrap()
    }

    #[test]
    fn test_empty_and_null_filters_match() {
        assert!(check(json!({})));
        assert!(check(Value::Null));
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        assert!(check(json!({"zone": "north"})));
        assert!(check(json!({"location.city": "Quito"})));
        assert!(check(json!({"phases": 3.0})));
        assert!(!check(json!({"zone": "south"})));
        assert!(check(json!({"missing": null})));
    }

    #[test]
    fn test_array_membership() {
        assert!(check(json!({"tags": "smart"})));
        assert!(check(json!({"tags": ["smart", "residential"]})));
        assert!(!check(json!({"tags": "industrial"})));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(json!({"kwh": {"$gt": 400}})));
        assert!(check(json!({"kwh": {"$gte": 412.5, "$lt": 413}})));
        assert!(!check(json!({"kwh": {"$lte": 100}})));
        // Different kinds never compare.
        assert!(!check(json!({"kwh": {"$gt": "100"}})));
        assert!(check(json!({"zone": {"$ne": "south"}})));
    }

    #[test]
    fn test_set_operators() {
        assert!(check(json!({"zone": {"$in": ["north", "east"]}})));
        assert!(check(json!({"zone": {"$nin": ["south"]}})));
        assert!(check(json!({"tags": {"$in": ["industrial", "smart"]}})));
        assert!(matches(&meter(), &json!({"zone": {"$in": "north"}})).is_err());
    }

    #[test]
    fn test_exists() {
        assert!(check(json!({"location": {"$exists": true}})));
        assert!(check(json!({"deleted": {"$exists": false}})));
    }

    #[test]
    fn test_regex_with_options() {
        assert!(check(json!({"serial": {"$regex": "^mtr-", "$options": "i"}})));
        assert!(!check(json!({"serial": {"$regex": "^mtr-"}})));
        assert!(check(json!({"tags": {"$regex": "dent"}})));
        assert!(matches(&meter(), &json!({"serial": {"$regex": "("}})).is_err());
    }

    #[test]
    fn test_logical_combinators() {
        assert!(check(json!({"$or": [{"zone": "south"}, {"phases": 3}]})));
        assert!(!check(json!({"$and": [{"zone": "north"}, {"active": false}]})));
        assert!(matches(&meter(), &json!({"$or": {"zone": "north"}})).is_err());
        assert!(matches(&meter(), &json!({"$where": "1"})).is_err());
    }

    #[test]
    fn test_literal_object_equality() {
        let doc = json!({"meta": {"v": 1}});
        assert!(matches(&doc, &json!({"meta": {"v": 1}})).unwrap());
        assert!(!matches(&doc, &json!({"meta": {"v": 2}})).unwrap());
    }
}
