//! Bounded LRU store with per-entry TTL for a single namespace.
//!
//! Expiry is lazy: an entry past its TTL is dropped the next time it is looked
//! up, or when capacity pressure evicts it. There is no background sweeper.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ampere_core::NamespaceSettings;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

/// Why an entry left the store without being explicitly deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Pushed out as least recently used to make room.
    Capacity,
    /// Found past its TTL on access.
    Expired,
}

/// Callback fired once per eviction, after the store lock is released.
pub type EvictionListener = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

/// A cached value and its lifetime bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Wall-clock insertion time, for diagnostics.
    pub inserted_at: DateTime<Utc>,
    created: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: Utc::now(),
            created: now,
            expires_at: now + ttl,
        }
    }

    /// Check if this entry has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time since insertion.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

/// Thread-safe bounded key/value store for one namespace.
pub struct CacheStore<V> {
    name: String,
    settings: NamespaceSettings,
    inner: Mutex<LruCache<String, CacheEntry<V>>>,
    evictions: AtomicU64,
    listener: Option<EvictionListener>,
}

impl<V: Clone> CacheStore<V> {
    /// Create a store. A `max_items` of zero is treated as one.
    pub fn new(name: impl Into<String>, settings: NamespaceSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(LruCache::new(capacity)),
            evictions: AtomicU64::new(0),
            listener: None,
        }
    }

    /// Attach an eviction listener.
    pub fn with_listener(mut self, listener: EvictionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &NamespaceSettings {
        &self.settings
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Evictions since creation or the last `clear`.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get a live value. Refreshes recency when `touch_on_get` is set.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let found = {
            let mut inner = self.inner.lock();
            let lookup = if self.settings.touch_on_get {
                inner.get(key)
            } else {
                inner.peek(key)
            };
            match lookup.map(|entry| (!entry.is_expired_at(now)).then(|| entry.value.clone())) {
                Some(Some(value)) => Some(value),
                Some(None) => {
                    inner.pop(key);
                    None
                }
                None => return None,
            }
        };

        if found.is_none() {
            self.notify(key, EvictionReason::Expired);
        }
        found
    }

    /// Presence check with `get`'s expiry semantics. Never refreshes recency.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let expired = {
            let mut inner = self.inner.lock();
            match inner.peek(key).map(|entry| entry.is_expired_at(now)) {
                Some(false) => return true,
                Some(true) => {
                    inner.pop(key);
                    true
                }
                None => false,
            }
        };
        if expired {
            self.notify(key, EvictionReason::Expired);
        }
        false
    }

    /// Insert or overwrite. At capacity the least recently used entry is
    /// evicted first.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.settings.ttl));
        let evicted = {
            let mut inner = self.inner.lock();
            // `push` hands back the old entry when the key already existed,
            // which is an overwrite rather than an eviction.
            match inner.push(key.clone(), entry) {
                Some((old_key, _)) if old_key != key => Some(old_key),
                _ => None,
            }
        };
        if let Some(old_key) = evicted {
            self.notify(&old_key, EvictionReason::Capacity);
        }
    }

    /// Remove an entry. Returns whether something was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.len();
        inner.clear();
        self.evictions.store(0, Ordering::Relaxed);
        removed
    }

    /// Snapshot of all stored keys, most recently used first.
    ///
    /// The snapshot is detached from the store, so callers may delete while
    /// iterating it.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Age of a live entry.
    pub fn entry_age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .peek(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(CacheEntry::age)
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut inner = self.inner.lock();
            let keys: Vec<String> = inner
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                inner.pop(key.as_str());
            }
            keys
        };
        for key in &expired {
            self.notify(key, EvictionReason::Expired);
        }
        expired.len()
    }

    fn notify(&self, key: &str, reason: EvictionReason) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(namespace = %self.name, key, ?reason, "Cache entry evicted");
        if let Some(listener) = &self.listener {
            listener(key, reason);
        }
    }
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("ttl", &self.settings.ttl)
            .field("max_items", &self.settings.max_items)
            .field("touch_on_get", &self.settings.touch_on_get)
            .field("len", &self.inner.lock().len())
            .finish()
    }
}
