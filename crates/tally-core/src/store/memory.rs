//! In-memory local store for tests and ephemeral sessions

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{LocalStore, RemoteVersions};
use crate::error::Result;
use crate::models::{CollectionKey, CollectionSnapshot, Conflict, RecordId, SettledResolution};

#[derive(Default)]
struct Tables {
    records: HashMap<CollectionKey, CollectionSnapshot>,
    conflicts: HashMap<CollectionKey, Vec<Conflict>>,
    remote_versions: HashMap<CollectionKey, RemoteVersions>,
    settled: HashMap<(CollectionKey, RecordId), SettledResolution>,
}

/// Volatile `LocalStore`; each write swaps whole values under one mutex.
#[derive(Default)]
pub struct MemoryLocalStore {
    tables: Mutex<Tables>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn read_collection(&self, collection: CollectionKey) -> Result<CollectionSnapshot> {
        Ok(self
            .tables
            .lock()
            .records
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    fn write_collection(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
    ) -> Result<()> {
        self.tables
            .lock()
            .records
            .insert(collection, snapshot.clone());
        Ok(())
    }

    fn load_conflicts(&self, collection: CollectionKey) -> Result<Vec<Conflict>> {
        Ok(self
            .tables
            .lock()
            .conflicts
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    fn save_conflicts(&self, collection: CollectionKey, conflicts: &[Conflict]) -> Result<()> {
        self.tables
            .lock()
            .conflicts
            .insert(collection, conflicts.to_vec());
        Ok(())
    }

    fn load_remote_versions(&self, collection: CollectionKey) -> Result<RemoteVersions> {
        Ok(self
            .tables
            .lock()
            .remote_versions
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    fn save_remote_versions(
        &self,
        collection: CollectionKey,
        versions: &RemoteVersions,
    ) -> Result<()> {
        self.tables
            .lock()
            .remote_versions
            .insert(collection, versions.clone());
        Ok(())
    }

    fn persist_merge(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        versions: &RemoteVersions,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.records.insert(collection, snapshot.clone());
        tables.conflicts.insert(collection, conflicts.to_vec());
        tables.remote_versions.insert(collection, versions.clone());
        Ok(())
    }

    fn load_settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Result<Option<SettledResolution>> {
        Ok(self
            .tables
            .lock()
            .settled
            .get(&(collection, record_id.clone()))
            .cloned())
    }

    fn save_settled(&self, settled: &SettledResolution) -> Result<()> {
        let key = (settled.conflict.collection, settled.conflict.record_id.clone());
        self.tables.lock().settled.insert(key, settled.clone());
        Ok(())
    }

    fn persist_resolution(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        settled: &SettledResolution,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.records.insert(collection, snapshot.clone());
        tables.conflicts.insert(collection, conflicts.to_vec());
        let key = (collection, settled.conflict.record_id.clone());
        tables.settled.insert(key, settled.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::json;

    #[test]
    fn unknown_collection_reads_empty() {
        let store = MemoryLocalStore::new();
        assert!(store
            .read_collection(CollectionKey::Goals)
            .unwrap()
            .is_empty());
        assert!(store.load_conflicts(CollectionKey::Goals).unwrap().is_empty());
    }

    #[test]
    fn collections_are_independent() {
        let store = MemoryLocalStore::new();
        let mut snapshot = CollectionSnapshot::new();
        snapshot.insert(Record::with_id("a", 1, json!({})));

        store
            .write_collection(CollectionKey::Accounts, &snapshot)
            .unwrap();

        assert_eq!(
            store.read_collection(CollectionKey::Accounts).unwrap(),
            snapshot
        );
        assert!(store
            .read_collection(CollectionKey::Transactions)
            .unwrap()
            .is_empty());
    }
}
