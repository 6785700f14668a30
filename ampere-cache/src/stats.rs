//! Cache statistics tracking

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Per-namespace counters for cache performance monitoring.
///
/// All counters are monotonic until [`reset`](Self::reset), which only an
/// explicit clear of the namespace performs.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of lookups answered from the cache
    hits: AtomicU64,
    /// Number of lookups that had to run the producer
    misses: AtomicU64,
    /// Number of `wrap` calls, whatever the branch
    queries: AtomicU64,
    /// Cumulative wall time spent in `wrap`, in microseconds
    total_time_micros: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_elapsed(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_time_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_micros(self.total_time_micros.load(Ordering::Relaxed))
    }

    /// Hits divided by queries (0.0 to 1.0); 0 when nothing was queried.
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits(), self.queries())
    }

    /// Mean time per query in milliseconds; 0 when nothing was queried.
    pub fn avg_response_time_ms(&self) -> f64 {
        avg_ms(self.total_time(), self.queries())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.queries.store(0, Ordering::Relaxed);
        self.total_time_micros.store(0, Ordering::Relaxed);
    }
}

fn ratio(hits: u64, queries: u64) -> f64 {
    if queries == 0 {
        0.0
    } else {
        hits as f64 / queries as f64
    }
}

fn avg_ms(total: Duration, queries: u64) -> f64 {
    if queries == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / queries as f64
    }
}

/// Point-in-time view of one namespace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub queries: u64,
    pub hit_ratio: f64,
    /// Milliseconds
    pub avg_response_time: f64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
}

impl NamespaceStats {
    /// Snapshot counters together with the store's occupancy.
    pub fn capture(stats: &CacheStats, size: usize, max_size: usize, evictions: u64) -> Self {
        Self {
            hits: stats.hits(),
            misses: stats.misses(),
            queries: stats.queries(),
            hit_ratio: stats.hit_ratio(),
            avg_response_time: stats.avg_response_time_ms(),
            size,
            max_size,
            evictions,
        }
    }

    /// Stats of a namespace that has never been created.
    pub fn empty() -> Self {
        Self {
            hits: 0,
            misses: 0,
            queries: 0,
            hit_ratio: 0.0,
            avg_response_time: 0.0,
            size: 0,
            max_size: 0,
            evictions: 0,
        }
    }
}

/// Totals across all namespaces plus the per-namespace breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub namespace_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub queries: u64,
    pub hit_ratio: f64,
    pub avg_response_time: f64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl CacheReport {
    /// Aggregate a per-namespace breakdown.
    pub fn from_namespaces(namespaces: BTreeMap<String, NamespaceStats>) -> Self {
        let hits = namespaces.values().map(|s| s.hits).sum();
        let misses = namespaces.values().map(|s| s.misses).sum();
        let queries = namespaces.values().map(|s| s.queries).sum();
        // Weighted by query count so busy namespaces dominate the mean.
        let total_ms: f64 = namespaces
            .values()
            .map(|s| s.avg_response_time * s.queries as f64)
            .sum();
        Self {
            namespace_count: namespaces.len(),
            hits,
            misses,
            queries,
            hit_ratio: ratio(hits, queries),
            avg_response_time: if queries == 0 {
                0.0
            } else {
                total_ms / queries as f64
            },
            size: namespaces.values().map(|s| s.size).sum(),
            max_size: namespaces.values().map(|s| s.max_size).sum(),
            evictions: namespaces.values().map(|s| s.evictions).sum(),
            namespaces,
        }
    }
}

/// Result of `CacheManager::get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsReport {
    Namespace(NamespaceStats),
    All(CacheReport),
}
