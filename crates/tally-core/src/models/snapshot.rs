//! Collection snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CollectionKey, Record, RecordId};
use crate::error::Error;

/// One replica's view of one collection at a point in time.
///
/// Backed by an ordered map, so ids are unique by construction and iteration
/// order is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Record>", into = "Vec<Record>")]
pub struct CollectionSnapshot {
    records: BTreeMap<RecordId, Record>,
}

impl CollectionSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from raw records, rejecting malformed ones.
    ///
    /// A record is rejected when its id is blank or its payload is not a JSON
    /// object. When an id repeats, the copy with the later `updated_at` is
    /// kept and the other is rejected. Rejections are logged and returned;
    /// they never fail the whole snapshot.
    pub fn from_records(
        collection: CollectionKey,
        records: impl IntoIterator<Item = Record>,
    ) -> (Self, Vec<Error>) {
        let mut snapshot = Self::new();
        let mut rejected = Vec::new();

        for record in records {
            if record.id.is_blank() {
                rejected.push(malformed(collection, "record id is blank".to_string()));
                continue;
            }
            if !record.payload.is_object() {
                rejected.push(malformed(
                    collection,
                    format!("payload of '{}' is not an object", record.id),
                ));
                continue;
            }

            match snapshot.records.get(&record.id) {
                Some(existing)
                    if existing.effective_updated_at() >= record.effective_updated_at() =>
                {
                    rejected.push(malformed(
                        collection,
                        format!("duplicate id '{}' (older copy dropped)", record.id),
                    ));
                }
                Some(_) => {
                    rejected.push(malformed(
                        collection,
                        format!("duplicate id '{}' (older copy dropped)", record.id),
                    ));
                    snapshot.records.insert(record.id.clone(), record);
                }
                None => {
                    snapshot.records.insert(record.id.clone(), record);
                }
            }
        }

        for error in &rejected {
            tracing::warn!("{}", error);
        }

        (snapshot, rejected)
    }

    /// Insert or replace a record, returning the previous copy
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.id.clone(), record)
    }

    /// Look up a record by id
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    /// Remove a record by id
    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        self.records.remove(id)
    }

    /// Whether the snapshot holds the given id
    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in id order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Iterate ids in order
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.records.keys()
    }

    /// Consume the snapshot into its records, in id order
    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

impl From<Vec<Record>> for CollectionSnapshot {
    /// Lenient conversion used by deserialization: last copy of an id wins.
    fn from(records: Vec<Record>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        }
    }
}

impl From<CollectionSnapshot> for Vec<Record> {
    fn from(snapshot: CollectionSnapshot) -> Self {
        snapshot.into_records()
    }
}

fn malformed(collection: CollectionKey, reason: String) -> Error {
    Error::MalformedRecord { collection, reason }
}
