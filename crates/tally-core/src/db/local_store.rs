//! `SQLite` implementation of the local store

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension, Transaction};

use super::Database;
use crate::error::Result;
use crate::models::{CollectionKey, CollectionSnapshot, Conflict, Record, RecordId, SettledResolution};
use crate::store::{LocalStore, RemoteVersions};

/// Durable `LocalStore`; every write runs in one `SQLite` transaction.
pub struct SqliteLocalStore {
    db: Mutex<Database>,
}

impl SqliteLocalStore {
    /// Open (or create) the store at a filesystem path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn replace_records(
        tx: &Transaction<'_>,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
    ) -> Result<()> {
        tx.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![collection.as_str()],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO records (collection, id, updated_at, payload) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in snapshot.iter() {
            stmt.execute(params![
                collection.as_str(),
                record.id.as_str(),
                record.updated_at,
                serde_json::to_string(&record.payload)?,
            ])?;
        }
        Ok(())
    }

    fn replace_conflicts(
        tx: &Transaction<'_>,
        collection: CollectionKey,
        conflicts: &[Conflict],
    ) -> Result<()> {
        tx.execute(
            "DELETE FROM conflicts WHERE collection = ?1",
            params![collection.as_str()],
        )?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO conflicts (collection, record_id, detected_at, body)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for conflict in conflicts {
            stmt.execute(params![
                collection.as_str(),
                conflict.record_id.as_str(),
                conflict.detected_at,
                serde_json::to_string(conflict)?,
            ])?;
        }
        Ok(())
    }

    fn replace_remote_versions(
        tx: &Transaction<'_>,
        collection: CollectionKey,
        versions: &RemoteVersions,
    ) -> Result<()> {
        tx.execute(
            "DELETE FROM remote_versions WHERE collection = ?1",
            params![collection.as_str()],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO remote_versions (collection, record_id, updated_at) VALUES (?1, ?2, ?3)",
        )?;
        for (id, updated_at) in versions {
            stmt.execute(params![collection.as_str(), id.as_str(), updated_at])?;
        }
        Ok(())
    }

    fn upsert_settled(tx: &Transaction<'_>, settled: &SettledResolution) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO settled_resolutions (collection, record_id, body)
             VALUES (?1, ?2, ?3)",
            params![
                settled.conflict.collection.as_str(),
                settled.conflict.record_id.as_str(),
                serde_json::to_string(settled)?,
            ],
        )?;
        Ok(())
    }

    fn in_transaction(&self, f: impl FnOnce(&Transaction<'_>) -> Result<()>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.connection_mut().transaction()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

impl LocalStore for SqliteLocalStore {
    fn read_collection(&self, collection: CollectionKey) -> Result<CollectionSnapshot> {
        let db = self.db.lock();
        let mut stmt = db.connection().prepare(
            "SELECT id, updated_at, payload FROM records WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![collection.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, updated_at, payload) in rows {
            match serde_json::from_str(&payload) {
                Ok(payload) => records.push(Record {
                    id: id.into(),
                    updated_at,
                    payload,
                }),
                Err(error) => {
                    tracing::warn!("Skipping unreadable local record {collection}/{id}: {error}");
                }
            }
        }

        Ok(CollectionSnapshot::from_records(collection, records).0)
    }

    fn write_collection(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
    ) -> Result<()> {
        self.in_transaction(|tx| Self::replace_records(tx, collection, snapshot))
    }

    fn load_conflicts(&self, collection: CollectionKey) -> Result<Vec<Conflict>> {
        let db = self.db.lock();
        let mut stmt = db.connection().prepare(
            "SELECT record_id, body FROM conflicts
             WHERE collection = ?1 ORDER BY detected_at, record_id",
        )?;
        let rows = stmt
            .query_map(params![collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for (record_id, body) in rows {
            match serde_json::from_str(&body) {
                Ok(conflict) => conflicts.push(conflict),
                Err(error) => tracing::warn!(
                    "Skipping unreadable pending conflict {collection}/{record_id}: {error}"
                ),
            }
        }
        Ok(conflicts)
    }

    fn save_conflicts(&self, collection: CollectionKey, conflicts: &[Conflict]) -> Result<()> {
        self.in_transaction(|tx| Self::replace_conflicts(tx, collection, conflicts))
    }

    fn load_remote_versions(&self, collection: CollectionKey) -> Result<RemoteVersions> {
        let db = self.db.lock();
        let mut stmt = db.connection().prepare(
            "SELECT record_id, updated_at FROM remote_versions WHERE collection = ?1",
        )?;
        let versions = stmt
            .query_map(params![collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?.into(), row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<RemoteVersions>>()?;
        Ok(versions)
    }

    fn save_remote_versions(
        &self,
        collection: CollectionKey,
        versions: &RemoteVersions,
    ) -> Result<()> {
        self.in_transaction(|tx| Self::replace_remote_versions(tx, collection, versions))
    }

    fn persist_merge(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        versions: &RemoteVersions,
    ) -> Result<()> {
        self.in_transaction(|tx| {
            Self::replace_records(tx, collection, snapshot)?;
            Self::replace_conflicts(tx, collection, conflicts)?;
            Self::replace_remote_versions(tx, collection, versions)
        })
    }

    fn load_settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Result<Option<SettledResolution>> {
        let db = self.db.lock();
        let body = db
            .connection()
            .query_row(
                "SELECT body FROM settled_resolutions WHERE collection = ?1 AND record_id = ?2",
                params![collection.as_str(), record_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match body.map(|body| serde_json::from_str(&body)) {
            None => Ok(None),
            Some(Ok(settled)) => Ok(Some(settled)),
            Some(Err(error)) => {
                tracing::warn!("Ignoring unreadable resolution for {collection}/{record_id}: {error}");
                Ok(None)
            }
        }
    }

    fn save_settled(&self, settled: &SettledResolution) -> Result<()> {
        self.in_transaction(|tx| Self::upsert_settled(tx, settled))
    }

    fn persist_resolution(
        &self,
        collection: CollectionKey,
        snapshot: &CollectionSnapshot,
        conflicts: &[Conflict],
        settled: &SettledResolution,
    ) -> Result<()> {
        self.in_transaction(|tx| {
            Self::replace_records(tx, collection, snapshot)?;
            Self::replace_conflicts(tx, collection, conflicts)?;
            Self::upsert_settled(tx, settled)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictReason, ResolutionChoice};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn snapshot(records: Vec<Record>) -> CollectionSnapshot {
        CollectionSnapshot::from_records(CollectionKey::Transactions, records).0
    }

    fn conflict() -> Conflict {
        Conflict {
            collection: CollectionKey::Transactions,
            record_id: "1".into(),
            local: Record::with_id("1", 100, json!({"amt": 10})),
            remote: Record::with_id("1", 150, json!({"amt": 20})),
            reason: ConflictReason::NearTie,
            detected_at: 200,
        }
    }

    #[test]
    fn write_replaces_whole_collection() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let key = CollectionKey::Transactions;

        store
            .write_collection(
                key,
                &snapshot(vec![
                    Record::with_id("1", 1, json!({"amt": 1})),
                    Record::with_id("2", 1, json!({"amt": 2})),
                ]),
            )
            .unwrap();
        let replacement = snapshot(vec![Record::with_id("3", 5, json!({"amt": 3}))]);
        store.write_collection(key, &replacement).unwrap();

        assert_eq!(store.read_collection(key).unwrap(), replacement);
    }

    #[test]
    fn missing_timestamp_survives_roundtrip() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let key = CollectionKey::Goals;
        let stale = Record {
            id: "g".into(),
            updated_at: None,
            payload: json!({"name": "x"}),
        };

        store
            .write_collection(key, &CollectionSnapshot::from(vec![stale.clone()]))
            .unwrap();
        assert_eq!(store.read_collection(key).unwrap().get(&"g".into()), Some(&stale));
    }

    #[test]
    fn conflicts_and_versions_persist_across_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");
        let key = CollectionKey::Transactions;
        let versions: RemoteVersions = [("1".into(), 150)].into_iter().collect();

        {
            let store = SqliteLocalStore::open(&path).unwrap();
            store
                .persist_merge(
                    key,
                    &snapshot(vec![Record::with_id("1", 100, json!({"amt": 10}))]),
                    &[conflict()],
                    &versions,
                )
                .unwrap();
        }

        let reopened = SqliteLocalStore::open(&path).unwrap();
        assert_eq!(reopened.load_conflicts(key).unwrap(), vec![conflict()]);
        assert_eq!(reopened.load_remote_versions(key).unwrap(), versions);
        assert_eq!(reopened.read_collection(key).unwrap().len(), 1);
    }

    #[test]
    fn collections_do_not_share_rows() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        store
            .write_collection(
                CollectionKey::Accounts,
                &snapshot(vec![Record::with_id("a", 1, json!({}))]),
            )
            .unwrap();
        store
            .write_collection(CollectionKey::Goals, &CollectionSnapshot::new())
            .unwrap();

        assert_eq!(store.read_collection(CollectionKey::Accounts).unwrap().len(), 1);
    }

    #[test]
    fn unreadable_conflict_row_does_not_hide_the_others() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let key = CollectionKey::Transactions;
        store.save_conflicts(key, &[conflict()]).unwrap();
        store
            .db
            .lock()
            .connection()
            .execute(
                "INSERT INTO conflicts (collection, record_id, detected_at, body)
                 VALUES ('transactions', '2', 300, '{not json')",
                [],
            )
            .unwrap();

        assert_eq!(store.load_conflicts(key).unwrap(), vec![conflict()]);
    }

    #[test]
    fn settled_resolution_persists_across_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");
        let key = CollectionKey::Transactions;
        let record = Record::with_id("1", 1_000, json!({"amt": 20}));
        let settled = SettledResolution {
            conflict: conflict(),
            choice: ResolutionChoice::Remote,
            record: record.clone(),
        };

        {
            let store = SqliteLocalStore::open(&path).unwrap();
            store
                .persist_resolution(key, &snapshot(vec![record]), &[], &settled)
                .unwrap();
        }

        let reopened = SqliteLocalStore::open(&path).unwrap();
        assert_eq!(reopened.load_settled(key, &"1".into()).unwrap(), Some(settled));
        assert_eq!(reopened.load_settled(key, &"2".into()).unwrap(), None);
        assert!(reopened.load_conflicts(key).unwrap().is_empty());
    }
}
