//! Record model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a record within one collection.
///
/// Identifiers minted locally are UUID v7 strings (time-sortable); identifiers
/// received from the remote store are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Mint a new identifier for a record created on this replica
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is blank (rejected by validation)
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One identified, timestamped payload of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the collection
    pub id: RecordId,
    /// Last mutation time (Unix ms) on the replica that made the change.
    /// `None` only for malformed input; such records are maximally stale.
    #[serde(default)]
    pub updated_at: Option<i64>,
    /// Collection-specific fields
    pub payload: Value,
}

impl Record {
    /// Create a record with a fresh id, stamped now
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            id: RecordId::generate(),
            updated_at: Some(crate::util::now_millis()),
            payload,
        }
    }

    /// Create a record with explicit id and timestamp
    #[must_use]
    pub fn with_id(id: impl Into<RecordId>, updated_at: i64, payload: Value) -> Self {
        Self {
            id: id.into(),
            updated_at: Some(updated_at),
            payload,
        }
    }

    /// Timestamp used for ordering; a missing timestamp sorts before everything.
    pub fn effective_updated_at(&self) -> i64 {
        self.updated_at.unwrap_or(i64::MIN)
    }

    /// Copy of this record carrying a new timestamp
    #[must_use]
    pub fn restamped(&self, updated_at: i64) -> Self {
        Self {
            id: self.id.clone(),
            updated_at: Some(updated_at),
            payload: self.payload.clone(),
        }
    }
}
