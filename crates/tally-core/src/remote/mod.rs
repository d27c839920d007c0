//! Remote store boundary
//!
//! The remote store is the authoritative replica. Both operations may fail
//! with a transient [`RemoteError::Connectivity`] or a server-side
//! [`RemoteError::Rejected`]; the orchestrator owns retry policy.

mod http;
mod memory;

use async_trait::async_trait;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

use crate::error::RemoteError;
use crate::models::{CollectionKey, CollectionSnapshot, Record};

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Authoritative replica shared by every device of a user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the remote snapshot of a collection
    async fn fetch_collection(&self, collection: CollectionKey) -> RemoteResult<CollectionSnapshot>;

    /// Upsert records into a remote collection
    async fn push_records(&self, collection: CollectionKey, records: &[Record]) -> RemoteResult<()>;
}
