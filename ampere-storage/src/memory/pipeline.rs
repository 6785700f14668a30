//! Aggregation pipeline evaluation for the in-memory driver.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use super::document::{compare_values, get_path, project, values_equal};
use super::filter;

/// Run `pipeline` over `docs`, stage by stage.
pub fn run(mut docs: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>, String> {
    for stage in pipeline {
        let (name, spec) = single_entry(stage)?;
        docs = match name {
            "$match" => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if filter::matches(&doc, spec)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => sort_stage(docs, spec)?,
            "$skip" => docs.into_iter().skip(count_arg(name, spec)?).collect(),
            "$limit" => docs.into_iter().take(count_arg(name, spec)?).collect(),
            "$project" => project_stage(&docs, spec)?,
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|f| !f.is_empty() && !f.starts_with('$'))
                    .ok_or_else(|| "$count expects a field name".to_string())?;
                let mut out = Map::new();
                out.insert(field.to_string(), Value::from(docs.len() as u64));
                vec![Value::Object(out)]
            }
            "$group" => group_stage(&docs, spec)?,
            other => return Err(format!("unsupported pipeline stage {}", other)),
        };
    }
    Ok(docs)
}

fn single_entry(stage: &Value) -> Result<(&str, &Value), String> {
    match stage.as_object() {
        Some(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| "empty pipeline stage".to_string()),
        _ => Err(format!("pipeline stage must be a single-key object: {}", stage)),
    }
}

fn count_arg(stage: &str, spec: &Value) -> Result<usize, String> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| format!("{} expects a non-negative integer", stage))
}

/// Sort keys as `(path, descending)` pairs from a `{field: 1 | -1}` object.
pub fn sort_keys(spec: &Value) -> Result<Vec<(String, bool)>, String> {
    let map = spec
        .as_object()
        .ok_or_else(|| "$sort expects an object".to_string())?;
    map.iter()
        .map(|(field, dir)| match dir.as_i64() {
            Some(1) => Ok((field.clone(), false)),
            Some(-1) => Ok((field.clone(), true)),
            _ => Err(format!("invalid sort direction for {}", field)),
        })
        .collect()
}

/// Stable multi-key sort. Missing fields sort as `null`.
pub fn sort_documents(docs: &mut [Value], keys: &[(String, bool)]) {
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(path, descending)| {
                let left = get_path(a, path).unwrap_or(&Value::Null);
                let right = get_path(b, path).unwrap_or(&Value::Null);
                let ord = compare_values(left, right);
                if *descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

fn sort_stage(mut docs: Vec<Value>, spec: &Value) -> Result<Vec<Value>, String> {
    let keys = sort_keys(spec)?;
    sort_documents(&mut docs, &keys);
    Ok(docs)
}

fn project_stage(docs: &[Value], spec: &Value) -> Result<Vec<Value>, String> {
    let map = spec
        .as_object()
        .ok_or_else(|| "$project expects an object".to_string())?;
    let mut select = Vec::with_capacity(map.len());
    for (field, flag) in map {
        let include = match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            _ => return Err(format!("$project value for {} must be 0/1", field)),
        };
        select.push(if include {
            field.clone()
        } else {
            format!("-{}", field)
        });
    }
    Ok(docs.iter().map(|doc| project(doc, &select)).collect())
}

// ============================================================================
// $group
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
}

impl Accumulator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "$sum" => Some(Self::Sum),
            "$avg" => Some(Self::Avg),
            "$min" => Some(Self::Min),
            "$max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// `"$field"` reads a path from the document; anything else is a constant.
fn evaluate(doc: &Value, expr: &Value) -> Value {
    match expr.as_str().and_then(|s| s.strip_prefix('$')) {
        Some(path) => get_path(doc, path).cloned().unwrap_or(Value::Null),
        None => expr.clone(),
    }
}

struct GroupField {
    name: String,
    accumulator: Accumulator,
    expr: Value,
}

fn group_stage(docs: &[Value], spec: &Value) -> Result<Vec<Value>, String> {
    let map = spec
        .as_object()
        .ok_or_else(|| "$group expects an object".to_string())?;
    let key_expr = map
        .get("_id")
        .ok_or_else(|| "$group requires an _id".to_string())?;

    let mut fields = Vec::new();
    for (name, acc) in map.iter().filter(|(k, _)| k.as_str() != "_id") {
        let (op, expr) = acc
            .as_object()
            .filter(|m| m.len() == 1)
            .and_then(|m| m.iter().next())
            .ok_or_else(|| format!("$group field {} needs one accumulator", name))?;
        let accumulator =
            Accumulator::parse(op).ok_or_else(|| format!("unsupported accumulator {}", op))?;
        fields.push(GroupField {
            name: name.clone(),
            accumulator,
            expr: expr.clone(),
        });
    }

    // Groups in order of first appearance.
    let mut groups: Vec<(Value, Vec<&Value>)> = Vec::new();
    for doc in docs {
        let key = evaluate(doc, key_expr);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            Some((_, members)) => members.push(doc),
            None => groups.push((key, vec![doc])),
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Map::new();
            out.insert("_id".to_string(), key);
            for field in &fields {
                let values: Vec<Value> = members.iter().map(|d| evaluate(d, &field.expr)).collect();
                out.insert(field.name.clone(), accumulate(field.accumulator, &values));
            }
            Value::Object(out)
        })
        .collect())
}

fn accumulate(accumulator: Accumulator, values: &[Value]) -> Value {
    let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    match accumulator {
        Accumulator::Sum => {
            if values.iter().all(|v| v.is_i64() || !v.is_number()) {
                Value::from(values.iter().filter_map(Value::as_i64).sum::<i64>())
            } else {
                number(numbers.iter().sum())
            }
        }
        Accumulator::Avg => {
            if numbers.is_empty() {
                Value::Null
            } else {
                number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Accumulator::Min => extreme(values, Ordering::Less),
        Accumulator::Max => extreme(values, Ordering::Greater),
    }
}

fn extreme(values: &[Value], wanted: Ordering) -> Value {
    values
        .iter()
        .filter(|v| !v.is_null())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if compare_values(v, b) != wanted => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
