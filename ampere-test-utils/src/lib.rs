//! Ampere Test Utilities
//!
//! Shared test infrastructure for the Ampere workspace:
//! - Proptest generators for identifiers and parameter objects
//! - Fixtures for utility-domain documents (customers, meters, readings)
//! - Driver wrappers that count calls or fail on demand
//! - Assertions for Ampere error kinds
//! - A tracing initializer for test output

pub use ampere_cache::{CacheManager, StatsReport, WrapOptions};
pub use ampere_core::{
    AmpereError, AmpereResult, CacheSettings, Document, EntityId, FindOptions, NamespaceSettings,
    StorageError, ValidationError,
};
pub use ampere_storage::{DataAccessService, DocumentStore, InMemoryDocumentStore};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Install a fmt subscriber honoring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Service over a fresh in-memory driver and a fresh cache manager.
pub fn memory_service(collection: &str) -> DataAccessService<InMemoryDocumentStore> {
    DataAccessService::new(
        collection,
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(CacheManager::new(CacheSettings::default())),
    )
}

// ============================================================================
// DRIVER WRAPPERS
// ============================================================================

/// Driver operation, for per-operation call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Insert,
    FindById,
    Find,
    UpdateById,
    DeleteById,
    Count,
    Aggregate,
}

impl StoreOp {
    pub const ALL: [Self; 7] = [
        Self::Insert,
        Self::FindById,
        Self::Find,
        Self::UpdateById,
        Self::DeleteById,
        Self::Count,
        Self::Aggregate,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Wraps a driver and counts every call that reaches it.
///
/// Reads can be delayed before they reach the driver, which widens the window
/// for concurrent-miss tests, or after the driver answered, which lets a write
/// commit while a read result is still on its way back.
#[derive(Debug, Default)]
pub struct CountingStore<D> {
    inner: D,
    calls: [AtomicUsize; 7],
    read_delay: Option<Duration>,
    settle_delay: Option<Duration>,
}

impl<D: DocumentStore> CountingStore<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            calls: Default::default(),
            read_delay: None,
            settle_delay: None,
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Calls of one operation so far.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Calls of all operations so far.
    pub fn total_calls(&self) -> usize {
        StoreOp::ALL.iter().map(|op| self.calls(*op)).sum()
    }

    pub fn reset(&self) {
        for counter in &self.calls {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn record(&self, op: StoreOp) {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
    }

    async fn read(&self, op: StoreOp) {
        self.record(op);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn settle<T>(&self, result: T) -> T {
        if let Some(delay) = self.settle_delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl<D: DocumentStore> DocumentStore for CountingStore<D> {
    async fn insert(&self, collection: &str, document: Document) -> AmpereResult<Document> {
        self.record(StoreOp::Insert);
        self.inner.insert(collection, document).await
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &FindOptions,
    ) -> AmpereResult<Option<Document>> {
        self.read(StoreOp::FindById).await;
        let result = self.inner.find_by_id(collection, id, options).await;
        self.settle(result).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> AmpereResult<Vec<Document>> {
        self.read(StoreOp::Find).await;
        let result = self.inner.find(collection, filter, options).await;
        self.settle(result).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        patch: &Value,
    ) -> AmpereResult<Option<Document>> {
        self.record(StoreOp::UpdateById);
        self.inner.update_by_id(collection, id, patch).await
    }

    async fn delete_by_id(&self, collection: &str, id: &EntityId) -> AmpereResult<bool> {
        self.record(StoreOp::DeleteById);
        self.inner.delete_by_id(collection, id).await
    }

    async fn count(&self, collection: &str, filter: &Value) -> AmpereResult<u64> {
        self.read(StoreOp::Count).await;
        let result = self.inner.count(collection, filter).await;
        self.settle(result).await
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AmpereResult<Vec<Document>> {
        self.read(StoreOp::Aggregate).await;
        let result = self.inner.aggregate(collection, pipeline).await;
        self.settle(result).await
    }
}

/// Wraps a driver and fails calls on demand with `StorageError::Unavailable`.
#[derive(Debug, Default)]
pub struct FailingStore<D> {
    inner: D,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
}

impl<D: DocumentStore> FailingStore<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            fail_next: AtomicUsize::new(0),
            fail_always: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Fail the next `n` calls, whatever the operation.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched off.
    pub fn fail_always(&self, enabled: bool) {
        self.fail_always.store(enabled, Ordering::SeqCst);
    }

    fn check(&self) -> AmpereResult<()> {
        let take_one = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if take_one || self.fail_always.load(Ordering::SeqCst) {
            return Err(injected_failure().into());
        }
        Ok(())
    }
}

/// The error every [`FailingStore`] failure carries.
pub fn injected_failure() -> StorageError {
    StorageError::Unavailable {
        reason: "injected failure".to_string(),
    }
}

#[async_trait]
impl<D: DocumentStore> DocumentStore for FailingStore<D> {
    async fn insert(&self, collection: &str, document: Document) -> AmpereResult<Document> {
        self.check()?;
        self.inner.insert(collection, document).await
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &FindOptions,
    ) -> AmpereResult<Option<Document>> {
        self.check()?;
        self.inner.find_by_id(collection, id, options).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> AmpereResult<Vec<Document>> {
        self.check()?;
        self.inner.find(collection, filter, options).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        patch: &Value,
    ) -> AmpereResult<Option<Document>> {
        self.check()?;
        self.inner.update_by_id(collection, id, patch).await
    }

    async fn delete_by_id(&self, collection: &str, id: &EntityId) -> AmpereResult<bool> {
        self.check()?;
        self.inner.delete_by_id(collection, id).await
    }

    async fn count(&self, collection: &str, filter: &Value) -> AmpereResult<u64> {
        self.check()?;
        self.inner.count(collection, filter).await
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AmpereResult<Vec<Document>> {
        self.check()?;
        self.inner.aggregate(collection, pipeline).await
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for identifiers and query parameter objects.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Number};

    /// Generate a well-formed 24-hex identifier string.
    pub fn arb_entity_id() -> impl Strategy<Value = String> {
        "[0-9a-f]{24}"
    }

    /// Generate a string that is not a valid identifier.
    pub fn arb_malformed_id() -> impl Strategy<Value = String> {
        prop_oneof![
            "[0-9a-f]{0,23}",
            "[0-9a-f]{25,30}",
            "[g-z]{24}",
            "[0-9a-f]{11}[ .-][0-9a-f]{12}",
        ]
    }

    /// Generate a JSON scalar.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| Value::from(n)),
            (-1.0e6f64..1.0e6f64).prop_map(|f| {
                Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            }),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Generate a parameter object up to two levels deep.
    pub fn arb_params() -> impl Strategy<Value = Value> {
        let leaf = prop::collection::vec(("[a-z]{1,8}", arb_scalar()), 0..6);
        prop::collection::vec(
            (
                "[a-z]{1,8}",
                prop_oneof![
                    arb_scalar(),
                    leaf.prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
                    prop::collection::vec(arb_scalar(), 0..4).prop_map(Value::Array),
                ],
            ),
            0..6,
        )
        .prop_map(|entries| Value::Object(entries.into_iter().collect()))
    }

    /// Rebuild an object with its keys inserted in reverse order, recursively.
    pub fn reversed_insertion(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map.iter().rev() {
                    out.insert(k.clone(), reversed_insertion(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(reversed_insertion).collect()),
            other => other.clone(),
        }
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Utility-domain documents for service tests.

    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;

    pub const ZONES: [&str; 3] = ["north", "south", "east"];

    pub fn customer(name: &str, zone: &str) -> Document {
        json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "zone": zone,
            "plan": "residential",
            "active": true
        })
    }

    pub fn meter(serial: &str, customer_id: &str, zone: &str) -> Document {
        json!({
            "serial": serial,
            "customerId": customer_id,
            "zone": zone,
            "phases": 1,
            "tags": ["smart"]
        })
    }

    /// Reading `day` days after 2024-01-01, at midnight UTC.
    pub fn reading(meter_id: &str, day: u32, kwh: f64) -> Document {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
        let taken_at = start + ChronoDuration::days(i64::from(day));
        json!({
            "meterId": meter_id,
            "day": day,
            "kwh": kwh,
            "takenAt": taken_at.to_rfc3339()
        })
    }

    /// `count` readings for one meter, one per day, with kwh 1.0, 2.0, ...
    pub fn readings(meter_id: &str, count: u32) -> Vec<Document> {
        (0..count)
            .map(|day| reading(meter_id, day, f64::from(day + 1)))
            .collect()
    }

    /// Insert documents one by one, returning the stored versions.
    pub async fn seed<D: DocumentStore>(
        store: &D,
        collection: &str,
        documents: Vec<Document>,
    ) -> AmpereResult<Vec<Document>> {
        let mut stored = Vec::with_capacity(documents.len());
        for doc in documents {
            stored.push(store.insert(collection, doc).await?);
        }
        Ok(stored)
    }

    /// The `_id` of a stored document.
    pub fn id_of(document: &Document) -> String {
        document
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Ampere error kinds.

    use super::*;

    /// Assert that a result is a malformed identifier rejection.
    #[track_caller]
    pub fn assert_invalid_identifier<T: std::fmt::Debug>(result: &AmpereResult<T>) {
        match result {
            Err(AmpereError::Validation(ValidationError::InvalidIdentifier { .. })) => {}
            other => panic!("Expected InvalidIdentifier, got: {:?}", other),
        }
    }

    /// Assert that a result is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &AmpereResult<T>) {
        match result {
            Err(AmpereError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a result is the failure injected by `FailingStore`.
    #[track_caller]
    pub fn assert_injected_failure<T: std::fmt::Debug>(result: &AmpereResult<T>) {
        match result {
            Err(AmpereError::Storage(err)) if *err == injected_failure() => {}
            other => panic!("Expected injected failure, got: {:?}", other),
        }
    }

    /// Assert hit and miss counts of one namespace.
    #[track_caller]
    pub fn assert_hits_misses(cache: &CacheManager, namespace: &str, hits: u64, misses: u64) {
        let stats = cache.namespace_stats(namespace);
        assert_eq!(
            (stats.hits, stats.misses),
            (hits, misses),
            "hits/misses for {}",
            namespace
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_counting_store_counts_by_operation() {
        let store = CountingStore::new(InMemoryDocumentStore::new());
        let stored = fixtures::seed(&store, "customers", vec![fixtures::customer("Ana", "north")])
            .await
            .unwrap();
        let id = EntityId::parse(&fixtures::id_of(&stored[0])).unwrap();
        store
            .find_by_id("customers", &id, &FindOptions::new())
            .await
            .unwrap();
        store.count("customers", &json!({})).await.unwrap();

        assert_eq!(store.calls(StoreOp::Insert), 1);
        assert_eq!(store.calls(StoreOp::FindById), 1);
        assert_eq!(store.calls(StoreOp::Count), 1);
        assert_eq!(store.total_calls(), 3);
        store.reset();
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_store_modes() {
        let store = FailingStore::new(InMemoryDocumentStore::new());
        store.fail_next(1);
        assertions::assert_injected_failure(&store.count("c", &json!({})).await);
        assert_eq!(store.count("c", &json!({})).await.unwrap(), 0);

        store.fail_always(true);
        assertions::assert_storage_error(&store.insert("c", json!({})).await);
        store.fail_always(false);
        assert!(store.insert("c", json!({})).await.is_ok());
    }

    #[test]
    fn test_fixtures_shape() {
        let customer = fixtures::customer("Ana", "north");
        assert_eq!(customer["email"], json!("ana@example.com"));

        let readings = fixtures::readings("65a1b2c3d4e5f60718293a4b", 3);
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[2]["kwh"], json!(3.0));
        assert!(readings[1]["takenAt"].as_str().unwrap().starts_with("2024-01-02"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_ids_are_valid(id in generators::arb_entity_id()) {
            prop_assert!(EntityId::is_valid(&id));
        }

        #[test]
        fn prop_malformed_ids_are_rejected(id in generators::arb_malformed_id()) {
            prop_assert!(EntityId::parse(&id).is_err());
        }

        #[test]
        fn prop_params_are_objects(params in generators::arb_params()) {
            prop_assert!(params.is_object());
            prop_assert_eq!(generators::reversed_insertion(&params).as_object().map(|m| m.len()),
                params.as_object().map(|m| m.len()));
        }
    }
}
