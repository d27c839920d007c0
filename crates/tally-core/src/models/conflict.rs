//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::{CollectionKey, Record, RecordId};

/// Why a record pair could not be reconciled automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    /// Divergent edits whose timestamps are too close to order reliably
    #[serde(rename = "near-tie")]
    NearTie,
}

impl ConflictReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NearTie => "near-tie",
        }
    }
}

/// Which candidate a resolution keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    /// Keep this device's edit
    Local,
    /// Keep the remote store's edit
    Remote,
}

/// A pending, unresolved divergence for one record id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Collection the record belongs to
    pub collection: CollectionKey,
    /// Record involved in the conflict
    pub record_id: RecordId,
    /// This replica's candidate
    pub local: Record,
    /// The remote store's candidate
    pub remote: Record,
    /// Why the merge could not pick a winner
    pub reason: ConflictReason,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

impl Conflict {
    /// The candidate selected by a resolution choice
    pub const fn candidate(&self, choice: ResolutionChoice) -> &Record {
        match choice {
            ResolutionChoice::Local => &self.local,
            ResolutionChoice::Remote => &self.remote,
        }
    }

    /// Whether either candidate payload differs from `other`'s
    pub fn candidate_payloads_differ(&self, other: &Self) -> bool {
        self.local.payload != other.local.payload || self.remote.payload != other.remote.payload
    }

    /// Whether both candidates are identical to `other`'s, timestamps included
    pub fn same_candidates(&self, other: &Self) -> bool {
        self.collection == other.collection
            && self.record_id == other.record_id
            && self.local == other.local
            && self.remote == other.remote
    }

    /// Latest timestamp carried by either candidate
    pub fn latest_candidate_timestamp(&self) -> Option<i64> {
        self.local.updated_at.max(self.remote.updated_at)
    }
}

/// A conflict consumed by a resolution, kept so repeats return the same record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledResolution {
    pub conflict: Conflict,
    pub choice: ResolutionChoice,
    /// Record committed to the local store
    pub record: Record,
}

/// Notification delivered to conflict subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEvent {
    pub collection_key: CollectionKey,
    pub record_id: RecordId,
    pub local: Record,
    pub remote: Record,
    pub reason: ConflictReason,
}

impl From<&Conflict> for ConflictEvent {
    fn from(conflict: &Conflict) -> Self {
        Self {
            collection_key: conflict.collection,
            record_id: conflict.record_id.clone(),
            local: conflict.local.clone(),
            remote: conflict.remote.clone(),
            reason: conflict.reason,
        }
    }
}
