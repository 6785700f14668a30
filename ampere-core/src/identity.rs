//! Identity types for stored documents
//!
//! Documents are addressed by 12-byte object identifiers rendered as 24 hex
//! characters: a 4-byte big-endian creation timestamp, 5 random bytes and a
//! 3-byte process-wide counter.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Length of an identifier in hex characters.
pub const ENTITY_ID_LEN: usize = 24;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A validated document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse and validate an identifier.
    ///
    /// Accepts exactly 24 hex digits in either case; the stored form is
    /// lowercase so that equal ids always derive equal cache keys.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if Self::is_valid(value) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(ValidationError::InvalidIdentifier {
                value: value.to_string(),
            })
        }
    }

    /// Check whether a string is a well-formed identifier.
    pub fn is_valid(value: &str) -> bool {
        value.len() == ENTITY_ID_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Generate a new identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];

        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());

        // Bytes 10..15 of a v7 uuid are pure random (rand_b, after the variant byte).
        let random = Uuid::now_v7();
        bytes[4..9].copy_from_slice(&random.as_bytes()[10..15]);

        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);

        Self(hex::encode(bytes))
    }

    /// Creation time embedded in the identifier, at second resolution.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let secs = u32::from_str_radix(&self.0[0..8], 16).ok()?;
        DateTime::from_timestamp(secs as i64, 0)
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
