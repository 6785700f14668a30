//! Ampere Storage - Document Store Driver and Cached Data Access
//!
//! Defines the [`DocumentStore`] driver trait, an in-memory driver, and the
//! [`DataAccessService`] that puts the namespaced cache in front of a driver.

pub mod driver;
pub mod memory;
pub mod sanitize;
pub mod service;

pub use driver::DocumentStore;
pub use memory::{InMemoryDocumentStore, CREATED_AT_FIELD, UPDATED_AT_FIELD};
pub use sanitize::{is_identifier_field, sanitize_filter};
pub use service::{
    AggregateOptions, CacheCategory, CountOptions, DataAccessService, GetOptions,
    PaginateOptions, QueryOptions, UpdateOptions,
};
