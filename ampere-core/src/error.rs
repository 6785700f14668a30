//! Error types for Ampere operations

use thiserror::Error;

/// Storage layer errors, raised by document store drivers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Document not found in {collection} with id {id}")]
    NotFound { collection: String, id: String },

    #[error("Insert failed for {collection}: {reason}")]
    InsertFailed { collection: String, reason: String },

    #[error("Update failed for {collection} with id {id}: {reason}")]
    UpdateFailed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Delete failed for {collection} with id {id}: {reason}")]
    DeleteFailed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Query failed on {collection}: {reason}")]
    QueryFailed { collection: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors, raised before any store or cache access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid identifier: {value:?}")]
    InvalidIdentifier { value: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Cache layer errors.
///
/// Cached values are held as JSON, so the only failures the cache itself can
/// produce are (de)serialization failures at the namespace boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Failed to serialize value for namespace {namespace}: {reason}")]
    Serialization { namespace: String, reason: String },

    #[error("Failed to deserialize cached value {key} in namespace {namespace}: {reason}")]
    Deserialization {
        namespace: String,
        key: String,
        reason: String,
    },
}

/// Master error type for all Ampere errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmpereError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl AmpereError {
    /// Returns true if this is a malformed identifier rejection.
    pub fn is_invalid_identifier(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::InvalidIdentifier { .. })
        )
    }

    /// Returns true if this error originated in the store driver.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for Ampere operations.
pub type AmpereResult<T> = Result<T, AmpereError>;

// =============================================================================
// TESTS
// =============================================================================
