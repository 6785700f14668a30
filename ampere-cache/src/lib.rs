//! Ampere Cache - Namespaced Query Cache
//!
//! In-memory LRU/TTL stores grouped into named namespaces, with a cache-aside
//! `wrap` operation, pattern invalidation and per-namespace statistics.
//! Nothing here knows about documents or collections; the storage crate
//! builds its read paths on top of [`CacheManager`].

pub mod key;
pub mod manager;
pub mod stats;
pub mod store;

pub use key::{bare_key, generate_key, normalize, DIGEST_KEY_LEN, MAX_KEY_LEN};
pub use manager::{CacheManager, NamespaceEvictionListener, WrapOptions};
pub use stats::{CacheReport, CacheStats, NamespaceStats, StatsReport};
pub use store::{CacheEntry, CacheStore, EvictionListener, EvictionReason};
