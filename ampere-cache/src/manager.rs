//! Namespace registry and the cache-aside `wrap` operation.
//!
//! A [`CacheManager`] is constructed explicitly and shared by `Arc`; there is
//! no process-global instance. Namespaces are created lazily on first use and
//! live until [`CacheManager::clear_all`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ampere_core::{CacheError, CacheSettings, NamespaceSettings};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::stats::{CacheReport, CacheStats, NamespaceStats, StatsReport};
use crate::store::{CacheStore, EvictionListener, EvictionReason};

/// Manager-wide eviction callback: `(namespace, key, reason)`.
pub type NamespaceEvictionListener = Arc<dyn Fn(&str, &str, EvictionReason) + Send + Sync>;

/// Per-call options for [`CacheManager::wrap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrapOptions {
    /// Overrides the namespace TTL for the stored result.
    pub ttl: Option<Duration>,
    /// Always run the producer, ignoring any live entry.
    pub bypass_cache: bool,
    /// With `bypass_cache`, do not store the produced value either.
    pub skip_cache: bool,
}

impl WrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn bypass(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Bypass and do not store: the call leaves the cache untouched.
    pub fn uncached(mut self) -> Self {
        self.bypass_cache = true;
        self.skip_cache = true;
        self
    }
}

// ============================================================================
// NAMESPACE
// ============================================================================

type FlightTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// One namespace: its store, counters, and in-flight producer table.
///
/// `generation` is bumped by every invalidation. A producer that started
/// under an older generation may have read data the invalidation was meant to
/// discard, so its result is returned but not stored. The lock is held across
/// check-and-store and across bump-and-delete.
struct Namespace {
    name: String,
    store: Arc<CacheStore<Value>>,
    stats: CacheStats,
    flights: FlightTable,
    generation: Mutex<u64>,
}

impl Namespace {
    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                CacheError::Deserialization {
                    namespace: self.name.clone(),
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Store `value` unless an invalidation ran since `seen` was read.
    ///
    /// Returns whether the value was stored.
    fn store_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        seen: u64,
    ) -> Result<bool, CacheError> {
        let json = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            namespace: self.name.clone(),
            reason: e.to_string(),
        })?;
        let generation = self.generation.lock();
        if *generation != seen {
            tracing::debug!(namespace = %self.name, key, "Invalidated while producing, not stored");
            return Ok(false);
        }
        self.store.set(key, json, ttl);
        drop(generation);
        tracing::debug!(namespace = %self.name, key, "Cached value stored");
        Ok(true)
    }

    /// Run `f` after bumping the generation, under the generation lock.
    fn invalidating<R>(&self, f: impl FnOnce(&CacheStore<Value>) -> R) -> R {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        f(&self.store)
    }

    fn snapshot(&self) -> NamespaceStats {
        NamespaceStats::capture(
            &self.stats,
            self.store.len(),
            self.store.capacity(),
            self.store.evictions(),
        )
    }
}

/// Claim on a key's in-flight slot.
///
/// Dropping the ticket removes the slot once no other caller holds it, which
/// also covers callers whose future is dropped mid-flight.
struct FlightTicket<'a> {
    flights: &'a FlightTable,
    key: String,
    slot: Arc<AsyncMutex<()>>,
}

impl<'a> FlightTicket<'a> {
    fn claim(flights: &'a FlightTable, key: &str) -> Self {
        let slot = {
            let mut table = flights.lock();
            Arc::clone(
                table
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        Self {
            flights,
            key: key.to_string(),
            slot,
        }
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut table = self.flights.lock();
        // One reference in the table, one here: nobody else is waiting.
        if Arc::strong_count(&self.slot) <= 2 {
            table.remove(&self.key);
        }
    }
}

// ============================================================================
// CACHE MANAGER
// ============================================================================

/// Registry of named cache namespaces.
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(CacheManager::new(CacheSettings::from_env()));
///
/// let readings = cache
///     .wrap("readings:find", &key, || async { store.find(...).await }, WrapOptions::new())
///     .await?;
///
/// // After a write
/// cache.invalidate_pattern("readings:byId", &meter_id);
/// ```
pub struct CacheManager {
    namespaces: DashMap<String, Arc<Namespace>>,
    settings: CacheSettings,
    listener: Option<NamespaceEvictionListener>,
}

impl CacheManager {
    /// Create a manager with the given settings.
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            namespaces: DashMap::new(),
            settings,
            listener: None,
        }
    }

    /// Create a manager with default settings.
    pub fn with_defaults() -> Self {
        Self::new(CacheSettings::default())
    }

    /// Attach a listener notified of every eviction in every namespace.
    ///
    /// Only namespaces created after this call report to the listener.
    /// The listener runs while the namespace is storing a value and must not
    /// invalidate or clear that namespace.
    pub fn with_eviction_listener(mut self, listener: NamespaceEvictionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Names of all live namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Get or create a namespace's store.
    ///
    /// Idempotent: the first call fixes the configuration, later calls return
    /// the existing store and ignore `settings`.
    pub fn get_cache(
        &self,
        namespace: &str,
        settings: Option<NamespaceSettings>,
    ) -> Arc<CacheStore<Value>> {
        Arc::clone(&self.namespace(namespace, settings).store)
    }

    fn namespace(&self, name: &str, settings: Option<NamespaceSettings>) -> Arc<Namespace> {
        if let Some(existing) = self.namespaces.get(name) {
            return Arc::clone(existing.value());
        }

        // The entry API holds the shard lock, so two racing callers cannot
        // both create the namespace.
        let entry = self.namespaces.entry(name.to_string()).or_insert_with(|| {
            let settings = settings.unwrap_or(self.settings.default_namespace);
            tracing::info!(
                namespace = name,
                ttl_secs = settings.ttl.as_secs(),
                max_items = settings.max_items,
                "Cache namespace created"
            );
            Arc::new(Namespace {
                name: name.to_string(),
                store: Arc::new(self.build_store(name, settings)),
                stats: CacheStats::new(),
                flights: Mutex::new(HashMap::new()),
                generation: Mutex::new(0),
            })
        });
        Arc::clone(entry.value())
    }

    fn build_store(&self, name: &str, settings: NamespaceSettings) -> CacheStore<Value> {
        let store = CacheStore::new(name, settings);
        match &self.listener {
            None => store,
            Some(listener) => {
                let listener = Arc::clone(listener);
                let namespace = name.to_string();
                let forward: EvictionListener =
                    Arc::new(move |key: &str, reason: EvictionReason| {
                        listener(&namespace, key, reason)
                    });
                store.with_listener(forward)
            }
        }
    }

    /// Cache-aside resolution of `key` in `namespace`.
    ///
    /// - Always counts a query and accumulates elapsed time, on every branch.
    /// - `bypass_cache`: runs the producer; stores the result (counted as a
    ///   miss) unless `skip_cache` is also set.
    /// - Otherwise a live entry is returned as a hit; on a miss the producer
    ///   runs and its result is stored.
    ///
    /// A producer error is returned unchanged and nothing is stored. A value
    /// produced while the namespace was invalidated is returned to the caller
    /// but not stored. With
    /// single flight enabled, concurrent misses on the same key wait for the
    /// first producer and then read its result.
    pub async fn wrap<T, E, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        producer: F,
        options: WrapOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ns = self.namespace(namespace, None);
        let started = Instant::now();
        ns.stats.record_query();

        let result = self.resolve(&ns, key, producer, options).await;

        ns.stats.record_elapsed(started.elapsed());
        result
    }

    async fn resolve<T, E, F, Fut>(
        &self,
        ns: &Namespace,
        key: &str,
        producer: F,
        options: WrapOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if options.bypass_cache {
            let seen = ns.generation();
            let value = Self::produce(ns, key, producer).await?;
            if !options.skip_cache {
                ns.store_value(key, &value, options.ttl, seen)?;
                ns.stats.record_miss();
            }
            return Ok(value);
        }

        if let Some(value) = ns.lookup::<T>(key)? {
            ns.stats.record_hit();
            tracing::debug!(namespace = %ns.name, key, "Cache hit");
            return Ok(value);
        }

        if !self.settings.single_flight {
            ns.stats.record_miss();
            tracing::debug!(namespace = %ns.name, key, "Cache miss");
            let seen = ns.generation();
            let value = Self::produce(ns, key, producer).await?;
            ns.store_value(key, &value, options.ttl, seen)?;
            return Ok(value);
        }

        // Declared before the guard so the guard is released first.
        let ticket = FlightTicket::claim(&ns.flights, key);
        let _guard = Arc::clone(&ticket.slot).lock_owned().await;

        // Another caller may have filled the entry while we waited.
        if let Some(value) = ns.lookup::<T>(key)? {
            ns.stats.record_hit();
            tracing::debug!(namespace = %ns.name, key, "Cache hit after in-flight wait");
            return Ok(value);
        }

        ns.stats.record_miss();
        tracing::debug!(namespace = %ns.name, key, "Cache miss");
        let seen = ns.generation();
        let value = Self::produce(ns, key, producer).await?;
        ns.store_value(key, &value, options.ttl, seen)?;
        Ok(value)
    }

    async fn produce<T, E, F, Fut>(ns: &Namespace, key: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = producer().await;
        if result.is_err() {
            tracing::warn!(namespace = %ns.name, key, "Cache producer failed, nothing stored");
        }
        result
    }

    /// Read a live cached value without running anything or touching stats.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>, CacheError> {
        match self.namespaces.get(namespace) {
            Some(ns) => ns.lookup(key),
            None => Ok(None),
        }
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.store.has(key))
            .unwrap_or(false)
    }

    /// Delete a single entry. Returns whether something was removed.
    ///
    /// Producers already running in the namespace will not store their result.
    pub fn invalidate(&self, namespace: &str, key: &str) -> bool {
        let removed = self
            .namespaces
            .get(namespace)
            .map(|ns| ns.invalidating(|store| store.delete(key)))
            .unwrap_or(false);
        if removed {
            tracing::debug!(namespace, key, "Cache entry invalidated");
        }
        removed
    }

    /// Delete every key in `namespace` that contains `pattern`.
    ///
    /// This is a linear scan over a snapshot of the namespace's keys, O(n) in
    /// the namespace size; there is no secondary index.
    pub fn invalidate_pattern(&self, namespace: &str, pattern: &str) -> usize {
        let Some(ns) = self.namespaces.get(namespace).map(|e| Arc::clone(e.value())) else {
            return 0;
        };
        let removed = ns.invalidating(|store| {
            store
                .keys()
                .into_iter()
                .filter(|key| key.contains(pattern))
                .filter(|key| store.delete(key))
                .count()
        });
        if removed > 0 {
            tracing::debug!(namespace, pattern, removed, "Cache entries invalidated by pattern");
        }
        removed
    }

    /// Drop all entries of a namespace and reset its statistics.
    ///
    /// Returns false if the namespace does not exist.
    pub fn clear(&self, namespace: &str) -> bool {
        match self.namespaces.get(namespace) {
            Some(ns) => {
                let removed = ns.invalidating(|store| store.clear());
                ns.stats.reset();
                tracing::info!(namespace, removed, "Cache namespace cleared");
                true
            }
            None => false,
        }
    }

    /// Drop every entry and every namespace.
    pub fn clear_all(&self) {
        let count = self.namespaces.len();
        for ns in self.namespaces.iter() {
            ns.invalidating(|store| store.clear());
        }
        self.namespaces.clear();
        tracing::info!(namespaces = count, "All cache namespaces cleared");
    }

    /// Statistics for one namespace, or totals across all of them.
    ///
    /// An unknown namespace reports all-zero statistics.
    pub fn get_stats(&self, namespace: Option<&str>) -> StatsReport {
        match namespace {
            Some(name) => StatsReport::Namespace(self.namespace_stats(name)),
            None => StatsReport::All(self.report()),
        }
    }

    /// Statistics for a single namespace.
    pub fn namespace_stats(&self, namespace: &str) -> NamespaceStats {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.snapshot())
            .unwrap_or_else(NamespaceStats::empty)
    }

    /// Totals across all namespaces plus the per-namespace breakdown.
    pub fn report(&self) -> CacheReport {
        let breakdown: BTreeMap<String, NamespaceStats> = self
            .namespaces
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        CacheReport::from_namespaces(breakdown)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("namespaces", &self.namespaces())
            .field("single_flight", &self.settings.single_flight)
            .finish()
    }
}
