//! In-process remote store with fault injection

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RemoteResult, RemoteStore};
use crate::error::RemoteError;
use crate::models::{CollectionKey, CollectionSnapshot, Record};

#[derive(Default)]
struct RemoteState {
    collections: HashMap<CollectionKey, CollectionSnapshot>,
    offline: bool,
    latency: Option<Duration>,
    fetch_faults: VecDeque<RemoteError>,
    push_faults: VecDeque<RemoteError>,
    fetches: usize,
    pushes: Vec<(CollectionKey, Vec<Record>)>,
}

/// Remote replica held in memory.
///
/// Used by tests and offline demos. Failures can be queued per operation,
/// and the whole store can be switched offline.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a remote collection's contents
    pub fn seed(&self, collection: CollectionKey, records: Vec<Record>) {
        let (snapshot, _) = CollectionSnapshot::from_records(collection, records);
        self.state.lock().collections.insert(collection, snapshot);
    }

    /// Current remote contents of a collection
    pub fn snapshot(&self, collection: CollectionKey) -> CollectionSnapshot {
        self.state
            .lock()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every request fail with a connectivity error while offline
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Delay every request by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Fail the next `count` fetches with `error`
    pub fn fail_fetches(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state
            .fetch_faults
            .extend(std::iter::repeat(error).take(count));
    }

    /// Fail the next `count` pushes with `error`
    pub fn fail_pushes(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state.push_faults.extend(std::iter::repeat(error).take(count));
    }

    /// Number of fetch attempts, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Every successful push, in order
    pub fn pushes(&self) -> Vec<(CollectionKey, Vec<Record>)> {
        self.state.lock().pushes.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_collection(&self, collection: CollectionKey) -> RemoteResult<CollectionSnapshot> {
        self.simulate_latency().await;

        let mut state = self.state.lock();
        state.fetches += 1;
        if state.offline {
            return Err(RemoteError::Connectivity("remote store is offline".to_string()));
        }
        if let Some(error) = state.fetch_faults.pop_front() {
            return Err(error);
        }
        Ok(state
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn push_records(&self, collection: CollectionKey, records: &[Record]) -> RemoteResult<()> {
        self.simulate_latency().await;

        let mut state = self.state.lock();
        if state.offline {
            return Err(RemoteError::Connectivity("remote store is offline".to_string()));
        }
        if let Some(error) = state.push_faults.pop_front() {
            return Err(error);
        }

        let snapshot = state.collections.entry(collection).or_default();
        for record in records {
            snapshot.insert(record.clone());
        }
        state.pushes.push((collection, records.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn push_then_fetch_roundtrip() {
        let remote = MemoryRemoteStore::new();
        let record = Record::with_id("1", 10, json!({"amt": 1}));

        remote
            .push_records(CollectionKey::Goals, &[record.clone()])
            .await
            .unwrap();
        let snapshot = remote.fetch_collection(CollectionKey::Goals).await.unwrap();

        assert_eq!(snapshot.get(&"1".into()), Some(&record));
        assert_eq!(remote.pushes().len(), 1);
    }

    #[tokio::test]
    async fn queued_faults_fail_in_order() {
        let remote = MemoryRemoteStore::new();
        remote.fail_fetches(1, RemoteError::Rejected("boom".to_string()));

        let error = remote
            .fetch_collection(CollectionKey::Accounts)
            .await
            .unwrap_err();
        assert_eq!(error, RemoteError::Rejected("boom".to_string()));
        assert!(remote.fetch_collection(CollectionKey::Accounts).await.is_ok());
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn offline_store_reports_connectivity() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);

        let error = remote
            .push_records(CollectionKey::Accounts, &[])
            .await
            .unwrap_err();
        assert!(error.is_connectivity());
        assert!(remote.pushes().is_empty());
    }
}
