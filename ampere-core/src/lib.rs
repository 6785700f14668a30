//! Ampere Core - Shared Types
//!
//! Errors, identifiers, query shapes and configuration shared by the cache and
//! storage crates. This crate holds data types only.

pub mod config;
pub mod error;
pub mod identity;
pub mod query;

pub use config::{CacheSettings, CategoryTtls, NamespaceSettings};
pub use error::{
    AmpereError, AmpereResult, CacheError, ConfigError, StorageError, ValidationError,
};
pub use identity::{EntityId, Timestamp, ENTITY_ID_LEN};
pub use query::{
    Document, FindOptions, Page, PaginationMeta, Populate, Sort, SortDirection, ID_FIELD,
};
