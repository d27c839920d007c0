//! Host-application access to local records

use std::sync::Arc;

use serde_json::Value;

use super::{LocalStore, WriterLocks};
use crate::error::{Error, Result};
use crate::models::{validate_payload, CollectionKey, Payload, Record, RecordId};
use crate::util::now_millis_after;

/// Reads and edits local collections under the single-writer discipline.
///
/// Edits made here while a reconciliation cycle is waiting on the network
/// are picked up when that cycle merges, because the orchestrator re-reads
/// the collection under the same writer lock.
#[derive(Clone)]
pub struct LocalRecords {
    store: Arc<dyn LocalStore>,
    locks: Arc<WriterLocks>,
}

impl LocalRecords {
    pub fn new(store: Arc<dyn LocalStore>, locks: Arc<WriterLocks>) -> Self {
        Self { store, locks }
    }

    /// List a collection's records in id order
    pub fn list(&self, collection: CollectionKey) -> Result<Vec<Record>> {
        Ok(self.store.read_collection(collection)?.into_records())
    }

    /// Fetch one record
    pub fn get(&self, collection: CollectionKey, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.store.read_collection(collection)?.get(id).cloned())
    }

    /// Create or replace a record's payload, stamping it now.
    ///
    /// The payload is validated against the collection's typed shape. The
    /// new timestamp is strictly later than the replaced copy's.
    pub fn put(
        &self,
        collection: CollectionKey,
        id: Option<RecordId>,
        payload: Value,
    ) -> Result<Record> {
        let id = id.unwrap_or_else(RecordId::generate);
        if id.is_blank() {
            return Err(Error::InvalidInput("record id cannot be empty".to_string()));
        }

        self.locks.with_collection(collection, || {
            let mut snapshot = self.store.read_collection(collection)?;
            let previous = snapshot.get(&id).and_then(|record| record.updated_at);
            let record = Record {
                id,
                updated_at: Some(now_millis_after(previous)),
                payload,
            };
            validate_payload(collection, &record)?;

            snapshot.insert(record.clone());
            self.store.write_collection(collection, &snapshot)?;
            tracing::debug!("Stored local edit {}/{}", collection, record.id);
            Ok(record)
        })
    }

    /// Create or replace a typed record
    pub fn put_payload<P: Payload>(&self, id: Option<RecordId>, payload: P) -> Result<Record> {
        self.put(P::COLLECTION, id, serde_json::to_value(payload)?)
    }

    /// Decode every record of a typed collection, skipping malformed ones
    pub fn list_payloads<P: Payload>(&self) -> Result<Vec<(RecordId, P)>> {
        let records = self.list(P::COLLECTION)?;
        Ok(records
            .iter()
            .filter_map(|record| match P::from_record(record) {
                Ok(payload) => Some((record.id.clone(), payload)),
                Err(error) => {
                    tracing::warn!("{}", error);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountKind};
    use crate::store::MemoryLocalStore;
    use serde_json::json;

    fn records() -> LocalRecords {
        LocalRecords::new(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(WriterLocks::new()),
        )
    }

    fn account(balance_cents: i64) -> Account {
        Account {
            name: "Checking".to_string(),
            kind: AccountKind::Checking,
            currency: "USD".to_string(),
            balance_cents,
            archived: false,
        }
    }

    #[test]
    fn put_payload_then_list() {
        let records = records();
        let stored = records.put_payload(None, account(1_000)).unwrap();

        let listed = records.list_payloads::<Account>().unwrap();
        assert_eq!(listed, vec![(stored.id, account(1_000))]);
    }

    #[test]
    fn put_rejects_malformed_payload() {
        let records = records();
        let error = records
            .put(CollectionKey::Accounts, None, json!({"name": "x"}))
            .unwrap_err();
        assert!(matches!(error, Error::MalformedRecord { .. }));
        assert!(records.list(CollectionKey::Accounts).unwrap().is_empty());
    }

    #[test]
    fn replacing_a_record_advances_its_timestamp() {
        let records = records();
        let first = records.put_payload(None, account(1)).unwrap();
        let second = records
            .put_payload(Some(first.id.clone()), account(2))
            .unwrap();

        assert!(second.updated_at > first.updated_at);
        assert_eq!(records.list(CollectionKey::Accounts).unwrap().len(), 1);
    }

    #[test]
    fn put_rejects_blank_id() {
        let records = records();
        let error = records
            .put_payload(Some(RecordId::from(" ")), account(1))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }
}
