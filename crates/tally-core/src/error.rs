//! Error types for tally-core

use thiserror::Error;

use crate::models::{CollectionKey, RecordId};

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or collection not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store failure (connectivity or server rejection)
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Resolution targeted a conflict that is no longer current
    #[error("Stale conflict for {collection}/{record_id}: {reason}")]
    StaleConflict {
        collection: CollectionKey,
        record_id: RecordId,
        reason: String,
    },

    /// Record rejected by validation
    #[error("Malformed record in {collection}: {reason}")]
    MalformedRecord {
        collection: CollectionKey,
        reason: String,
    },
}

impl Error {
    pub(crate) fn stale(
        collection: CollectionKey,
        record_id: &RecordId,
        reason: impl Into<String>,
    ) -> Self {
        Self::StaleConflict {
            collection,
            record_id: record_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Errors raised at the remote store boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transient: the remote store could not be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The remote store rejected the request.
    #[error("Remote error: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the failure should park the collection in the offline phase.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
