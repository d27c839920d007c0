//! Local store boundary and the single-writer discipline around it.

mod memory;
mod records;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

pub use memory::MemoryLocalStore;
pub use records::LocalRecords;

use crate::error::Result;
use crate::models::{CollectionKey, CollectionSnapshot, Conflict, RecordId, SettledResolution};

/// Last `updated_at` known to be held by the remote store, per record id.
pub type RemoteVersions = BTreeMap<RecordId, i64>;

/// Device-local persistence, assumed fast and in-process.
///
/// Every write replaces a whole collection (or a whole per-collection side
/// table) and must be atomic.
pub trait LocalStore: Send + Sync {
    /// Read the current local snapshot of a collection
    fn read_collection(&self, collection: CollectionKey) -> Result<CollectionSnapshot>;

    /// Replace a collection atomically
    fn write_collection(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
    ) -> Result<()>;

    /// Pending conflicts persisted for a collection
    fn load_conflicts(&self, collection: CollectionKey) -> Result<Vec<Conflict>>;

    /// Replace the pending conflicts of a collection
    fn save_conflicts(&self, collection: CollectionKey, conflicts: &[Conflict]) -> Result<()>;

    /// Last-known remote versions of a collection's records
    fn load_remote_versions(&self, collection: CollectionKey) -> Result<RemoteVersions>;

    /// Replace the last-known remote versions of a collection
    fn save_remote_versions(
        &self,
        collection: CollectionKey,
        versions: &RemoteVersions,
    ) -> Result<()>;

    /// The last resolution applied to a record, if any
    fn load_settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Result<Option<SettledResolution>>;

    /// Record a resolution, replacing any earlier one for the same record
    fn save_settled(&self, settled: &SettledResolution) -> Result<()>;

    /// Persist a merge result. Stores that can group the three writes in
    /// one transaction should override this.
    fn persist_merge(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        versions: &RemoteVersions,
    ) -> Result<()> {
        self.write_collection(collection, snapshot)?;
        self.save_conflicts(collection, conflicts)?;
        self.save_remote_versions(collection, versions)
    }

    /// Persist a committed resolution: the collection with the chosen
    /// record, the remaining conflicts and the settled entry.
    fn persist_resolution(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        settled: &SettledResolution,
    ) -> Result<()> {
        self.write_collection(collection, snapshot)?;
        self.save_conflicts(collection, conflicts)?;
        self.save_settled(settled)
    }
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn read_collection(&self, collection: CollectionKey) -> Result<CollectionSnapshot> {
        (**self).read_collection(collection)
    }

    fn write_collection(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
    ) -> Result<()> {
        (**self).write_collection(collection, snapshot)
    }

    fn load_conflicts(&self, collection: CollectionKey) -> Result<Vec<Conflict>> {
        (**self).load_conflicts(collection)
    }

    fn save_conflicts(&self, collection: CollectionKey, conflicts: &[Conflict]) -> Result<()> {
        (**self).save_conflicts(collection, conflicts)
    }

    fn load_remote_versions(&self, collection: CollectionKey) -> Result<RemoteVersions> {
        (**self).load_remote_versions(collection)
    }

    fn save_remote_versions(
        &self,
        collection: CollectionKey,
        versions: &RemoteVersions,
    ) -> Result<()> {
        (**self).save_remote_versions(collection, versions)
    }

    fn persist_merge(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        versions: &RemoteVersions,
    ) -> Result<()> {
        (**self).persist_merge(collection, snapshot, conflicts, versions)
    }

    fn load_settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Result<Option<SettledResolution>> {
        (**self).load_settled(collection, record_id)
    }

    fn save_settled(&self, settled: &SettledResolution) -> Result<()> {
        (**self).save_settled(settled)
    }

    fn persist_resolution(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        settled: &SettledResolution,
    ) -> Result<()> {
        (**self).persist_resolution(collection, snapshot, conflicts, settled)
    }
}

/// One mutex per collection serializing read-modify-write of the local store.
///
/// The orchestrator (persist leg), the resolution applier and host edits all
/// go through these locks. Guards are held only around synchronous store
/// calls, never across an await.
#[derive(Default)]
pub struct WriterLocks {
    locks: Mutex<HashMap<CollectionKey, Arc<Mutex<()>>>>,
}

impl WriterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the writer lock of `collection`
    pub fn with_collection<T>(&self, collection: CollectionKey, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(collection);
        let _guard: MutexGuard<'_, ()> = lock.lock();
        f()
    }

    fn lock_for(&self, collection: CollectionKey) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(collection)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
