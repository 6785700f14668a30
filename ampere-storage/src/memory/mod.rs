//! In-memory document store driver.
//!
//! Collections are plain vectors of JSON documents behind one `RwLock`, kept
//! in insertion order. Intended for tests and local runs; lookups are linear.

pub mod document;
pub mod filter;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::RwLock;

use ::async_trait::async_trait;
use ampere_core::{
    AmpereResult, Document, EntityId, FindOptions, Populate, StorageError, ID_FIELD,
};
use chrono::Utc;
use serde_json::{Map, Value};

use crate::driver::DocumentStore;
use document::{project, remove_path, set_path};

pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

type Collections = HashMap<String, Vec<Document>>;

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<Collections>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> AmpereResult<usize> {
        let collections = self.read()?;
        Ok(collections.get(collection).map(Vec::len).unwrap_or(0))
    }

    /// Names of all collections that have held a document, sorted.
    pub fn collection_names(&self) -> AmpereResult<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Remove every document from every collection.
    pub fn clear(&self) -> AmpereResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>, StorageError> {
        self.collections
            .read()
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>, StorageError> {
        self.collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)
    }
}

fn query_failed(collection: &str, reason: String) -> StorageError {
    StorageError::QueryFailed {
        collection: collection.to_string(),
        reason,
    }
}

fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

fn now_rfc3339() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

/// Shape a stored document for output: projection first, then relation
/// expansion against the other collections.
fn shape(collections: &Collections, doc: &Document, options: &FindOptions) -> Document {
    let mut out = project(doc, &options.select);
    for populate in &options.populate {
        expand(collections, &mut out, populate);
    }
    out
}

fn expand(collections: &Collections, doc: &mut Document, populate: &Populate) {
    let Some(current) = document::get_path(doc, &populate.path).cloned() else {
        return;
    };
    let lookup = |id: &str| -> Option<Document> {
        collections
            .get(&populate.collection)?
            .iter()
            .find(|d| id_of(d).is_some_and(|d_id| d_id.eq_ignore_ascii_case(id)))
            .map(|d| project(d, &populate.select))
    };
    let replacement = match current {
        Value::String(id) => lookup(&id).unwrap_or(Value::Null),
        // Dangling references are dropped from arrays.
        Value::Array(ids) => Value::Array(
            ids.iter()
                .filter_map(Value::as_str)
                .filter_map(|id| lookup(id))
                .collect(),
        ),
        _ => return,
    };
    set_path(doc, &populate.path, replacement);
}

/// Apply an update document. Operators are `$set`, `$unset` and `$inc`; a
/// patch without operators is treated as `$set`.
fn apply_update(doc: &mut Document, patch: &Value) -> Result<(), String> {
    let ops = patch
        .as_object()
        .ok_or_else(|| "update must be an object".to_string())?;

    let has_operators = ops.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        return apply_set(doc, ops);
    }

    for (op, fields) in ops {
        let fields = fields
            .as_object()
            .ok_or_else(|| format!("{} expects an object", op))?;
        match op.as_str() {
            "$set" => apply_set(doc, fields)?,
            "$unset" => {
                for path in fields.keys() {
                    if path == ID_FIELD {
                        return Err("_id is immutable".to_string());
                    }
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, by) in fields {
                    let current = document::get_path(doc, path).cloned().unwrap_or(Value::from(0));
                    let next = increment(&current, by)
                        .ok_or_else(|| format!("cannot increment {} by {}", path, by))?;
                    set_path(doc, path, next);
                }
            }
            other => return Err(format!("unsupported update operator {}", other)),
        }
    }
    Ok(())
}

fn apply_set(doc: &mut Document, fields: &Map<String, Value>) -> Result<(), String> {
    for (path, value) in fields {
        if path == ID_FIELD {
            if id_of(doc) != value.as_str() {
                return Err("_id is immutable".to_string());
            }
            continue;
        }
        if path.starts_with('$') {
            return Err(format!("mixed operators and fields in update: {}", path));
        }
        if !set_path(doc, path, value.clone()) {
            return Err(format!("cannot set {} through a non-object", path));
        }
    }
    Ok(())
}

// Integer arithmetic is kept when both sides are integers.
fn increment(current: &Value, by: &Value) -> Option<Value> {
    match (current.as_i64(), by.as_i64()) {
        (Some(a), Some(b)) => Some(Value::from(a.checked_add(b)?)),
        _ => serde_json::Number::from_f64(current.as_f64()? + by.as_f64()?).map(Value::Number),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, document: Document) -> AmpereResult<Document> {
        let insert_failed = |reason: &str| StorageError::InsertFailed {
            collection: collection.to_string(),
            reason: reason.to_string(),
        };

        let Value::Object(mut fields) = document else {
            return Err(insert_failed("document must be an object").into());
        };

        let id = match fields.get(ID_FIELD) {
            None => EntityId::generate(),
            Some(Value::String(raw)) => {
                EntityId::parse(raw).map_err(|_| insert_failed("malformed _id"))?
            }
            Some(_) => return Err(insert_failed("_id must be a string").into()),
        };

        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| id_of(d) == Some(id.as_str())) {
            return Err(insert_failed("duplicate _id").into());
        }

        let now = now_rfc3339();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        fields.insert(CREATED_AT_FIELD.to_string(), now.clone());
        fields.insert(UPDATED_AT_FIELD.to_string(), now);
        let stored = Value::Object(fields);
        docs.push(stored.clone());

        tracing::debug!(collection, id = %id, "Document inserted");
        Ok(stored)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &FindOptions,
    ) -> AmpereResult<Option<Document>> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| id_of(d) == Some(id.as_str())))
            .map(|doc| shape(&collections, doc, options)))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> AmpereResult<Vec<Document>> {
        let collections = self.read()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for doc in docs {
            if filter::matches(doc, filter).map_err(|r| query_failed(collection, r))? {
                matched.push(doc.clone());
            }
        }

        if let Some(sort) = &options.sort {
            let keys = [(sort.field.clone(), sort.direction.as_i32() < 0)];
            pipeline::sort_documents(&mut matched, &keys);
        }

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matched
            .iter()
            .skip(skip)
            .take(limit)
            .map(|doc| shape(&collections, doc, options))
            .collect())
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        patch: &Value,
    ) -> AmpereResult<Option<Document>> {
        let mut collections = self.write()?;
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| id_of(d) == Some(id.as_str())))
        else {
            return Ok(None);
        };

        // Work on a copy so a rejected patch leaves the document untouched.
        let mut updated = doc.clone();
        apply_update(&mut updated, patch).map_err(|reason| StorageError::UpdateFailed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason,
        })?;
        set_path(&mut updated, UPDATED_AT_FIELD, now_rfc3339());
        *doc = updated.clone();

        tracing::debug!(collection, id = %id, "Document updated");
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, collection: &str, id: &EntityId) -> AmpereResult<bool> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| id_of(d) != Some(id.as_str()));
        let removed = docs.len() < before;
        if removed {
            tracing::debug!(collection, id = %id, "Document deleted");
        }
        Ok(removed)
    }

    async fn count(&self, collection: &str, filter: &Value) -> AmpereResult<u64> {
        let collections = self.read()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(0);
        };
        let mut total = 0u64;
        for doc in docs {
            if filter::matches(doc, filter).map_err(|r| query_failed(collection, r))? {
                total += 1;
            }
        }
        Ok(total)
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AmpereResult<Vec<Document>> {
        let docs = {
            let collections = self.read()?;
            collections.get(collection).cloned().unwrap_or_default()
        };
        pipeline::run(docs, pipeline).map_err(|r| query_failed(collection, r).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_core::{AmpereError, Sort};
    use serde_json::json;

    async fn seeded() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        for (name, zone, kwh) in [("ana", "north", 10), ("luis", "south", 30), ("eva", "north", 20)] {
            store
                .insert("customers", json!({"name": name, "zone": zone, "kwh": kwh}))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamps() {
        let store = InMemoryDocumentStore::new();
        let doc = store.insert("customers", json!({"name": "ana"})).await.unwrap();
        let id = doc["_id"].as_str().unwrap();
        assert!(EntityId::is_valid(id));
        assert!(doc.get(CREATED_AT_FIELD).is_some());
        assert_eq!(doc[CREATED_AT_FIELD], doc[UPDATED_AT_FIELD]);
        assert_eq!(store.len("customers").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_documents() {
        let store = InMemoryDocumentStore::new();
        let err = store.insert("c", json!([1, 2])).await.unwrap_err();
        assert!(err.is_storage());

        let err = store.insert("c", json!({"_id": "nope"})).await.unwrap_err();
        assert!(matches!(err, AmpereError::Storage(StorageError::InsertFailed { .. })));

        let id = EntityId::generate();
        store.insert("c", json!({"_id": id.as_str()})).await.unwrap();
        assert!(store.insert("c", json!({"_id": id.as_str()})).await.is_err());
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit_select() {
        let store = seeded().await;
        let opts = FindOptions::new()
            .with_sort(Sort::desc("kwh"))
            .with_skip(1)
            .with_limit(1)
            .with_select(&["name"]);
        let docs = store.find("customers", &json!({}), &opts).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("eva"));
        assert!(docs[0].get("kwh").is_none());
        assert!(docs[0].get("_id").is_some());
    }

    #[tokio::test]
    async fn test_find_unknown_collection_is_empty() {
        let store = InMemoryDocumentStore::new();
        let docs = store.find("nothing", &json!({}), &FindOptions::new()).await.unwrap();
        assert!(docs.is_empty());
        assert_eq!(store.count("nothing", &json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_filter_is_query_failure() {
        let store = seeded().await;
        let err = store
            .count("customers", &json!({"$where": "true"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AmpereError::Storage(StorageError::QueryFailed { .. })));
    }

    #[tokio::test]
    async fn test_update_operators() {
        let store = seeded().await;
        let ana = store
            .find("customers", &json!({"name": "ana"}), &FindOptions::new())
            .await
            .unwrap()
            .remove(0);
        let id = EntityId::parse(ana["_id"].as_str().unwrap()).unwrap();

        let updated = store
            .update_by_id(
                "customers",
                &id,
                &json!({"$set": {"zone": "east"}, "$inc": {"kwh": 5}, "$unset": {"name": ""}}),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["zone"], json!("east"));
        assert_eq!(updated["kwh"], json!(15));
        assert!(updated.get("name").is_none());

        let merged = store
            .update_by_id("customers", &id, &json!({"plan": "flat"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged["plan"], json!("flat"));
        assert_eq!(merged["zone"], json!("east"));
    }

    #[tokio::test]
    async fn test_update_rejects_id_change_and_leaves_document() {
        let store = seeded().await;
        let doc = store
            .find("customers", &json!({}), &FindOptions::new())
            .await
            .unwrap()
            .remove(0);
        let id = EntityId::parse(doc["_id"].as_str().unwrap()).unwrap();
        let other = EntityId::generate();

        let err = store
            .update_by_id("customers", &id, &json!({"_id": other.as_str(), "zone": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AmpereError::Storage(StorageError::UpdateFailed { .. })));

        let fresh = store
            .find_by_id("customers", &id, &FindOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh["zone"], doc["zone"]);

        let missing = store
            .update_by_id("customers", &other, &json!({"zone": "x"}))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = seeded().await;
        let doc = store
            .find("customers", &json!({"name": "luis"}), &FindOptions::new())
            .await
            .unwrap()
            .remove(0);
        let id = EntityId::parse(doc["_id"].as_str().unwrap()).unwrap();
        assert!(store.delete_by_id("customers", &id).await.unwrap());
        assert!(!store.delete_by_id("customers", &id).await.unwrap());
        assert_eq!(store.len("customers").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_populate_single_and_array() {
        let store = InMemoryDocumentStore::new();
        let owner = store
            .insert("customers", json!({"name": "ana", "email": "ana@example.com"}))
            .await
            .unwrap();
        let owner_id = owner["_id"].as_str().unwrap().to_string();
        let ghost = EntityId::generate();
        let meter = store
            .insert(
                "meters",
                json!({"serial": "M1", "owner": owner_id, "shared": [owner_id, ghost.as_str()]}),
            )
            .await
            .unwrap();
        let meter_id = EntityId::parse(meter["_id"].as_str().unwrap()).unwrap();

        let opts = FindOptions::new()
            .with_populate(Populate::new("owner", "customers").with_select(&["name"]))
            .with_populate(Populate::new("shared", "customers"));
        let doc = store
            .find_by_id("meters", &meter_id, &opts)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc["owner"]["name"], json!("ana"));
        assert!(doc["owner"].get("email").is_none());
        assert_eq!(doc["shared"].as_array().unwrap().len(), 1);
        assert_eq!(doc["shared"][0]["email"], json!("ana@example.com"));
    }

    #[tokio::test]
    async fn test_aggregate() {
        let store = seeded().await;
        let out = store
            .aggregate(
                "customers",
                &[
                    json!({"$match": {"zone": "north"}}),
                    json!({"$group": {"_id": "$zone", "total": {"$sum": "$kwh"}}}),
                ],
            )
            .await
            .unwrap();
        assert_eq!(out, vec![json!({"_id": "north", "total": 30})]);

        let err = store
            .aggregate("customers", &[json!({"$out": "x"})])
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }
}
