//! Document store driver boundary.
//!
//! The data access service never talks to a concrete database; it is generic
//! over [`DocumentStore`]. Drivers report failures as `AmpereError::Storage`,
//! which the service propagates unchanged.

use ::async_trait::async_trait;
use ampere_core::{AmpereResult, Document, EntityId, FindOptions};
use serde_json::Value;

/// Async document store driver.
///
/// Filters and aggregation pipelines use the usual document-store JSON
/// operator syntax (`{"status": {"$in": ["active"]}}`,
/// `[{"$match": ...}, {"$group": ...}]`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document. A missing `_id` is generated. Returns the stored
    /// document including `_id` and timestamps.
    async fn insert(&self, collection: &str, document: Document) -> AmpereResult<Document>;

    /// Fetch one document by id, applying `select` and `populate`.
    async fn find_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &FindOptions,
    ) -> AmpereResult<Option<Document>>;

    /// Fetch documents matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> AmpereResult<Vec<Document>>;

    /// Apply `patch` to one document. Returns the updated document, or
    /// `None` if no document has that id.
    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        patch: &Value,
    ) -> AmpereResult<Option<Document>>;

    /// Delete one document. Returns whether a document was removed.
    async fn delete_by_id(&self, collection: &str, id: &EntityId) -> AmpereResult<bool>;

    /// Count documents matching `filter`.
    async fn count(&self, collection: &str, filter: &Value) -> AmpereResult<u64>;

    /// Run an aggregation pipeline.
    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AmpereResult<Vec<Document>>;
}
