//! Per-collection sync state exposed to the host application

use serde::Serialize;

use crate::models::CollectionKey;

/// Where a collection is in its reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Pulling,
    Merging,
    Persisting,
    Pushing,
    /// Waiting for connectivity before retrying a network leg
    Offline,
    #[default]
    Stopped,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Merging => "merging",
            Self::Persisting => "persisting",
            Self::Pushing => "pushing",
            Self::Offline => "offline",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a collection's remote reconciliation is working
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncHealth {
    #[default]
    Healthy,
    /// Retries were exhausted; the reason is the last failure
    Degraded(String),
}

impl SyncHealth {
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CollectionStatus {
    pub phase: SyncPhase,
    pub health: SyncHealth,
    /// Failed network attempts since the last completed cycle
    pub consecutive_failures: u32,
    /// Completion time of the last successful cycle (Unix ms)
    pub last_synced_at: Option<i64>,
    pub pending_conflicts: usize,
}

/// Summary of one completed reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub collection: CollectionKey,
    /// Records in the merged collection
    pub merged: usize,
    /// Conflicts present after the merge
    pub conflicts: usize,
    /// Conflicts announced to subscribers this cycle
    pub new_conflicts: usize,
    /// Previously pending conflicts settled by newer data
    pub superseded: usize,
    /// Records sent to the remote store
    pub pushed: usize,
}

/// Why a cycle ended without completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleFailure {
    /// The remote store was unreachable
    Offline(String),
    /// The remote store kept rejecting requests
    Degraded(String),
    /// Reading or writing the local store failed
    Local(String),
}

impl std::fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline(reason) => write!(f, "offline: {reason}"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Local(reason) => write!(f, "local store: {reason}"),
        }
    }
}

/// Result of asking a collection to reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle for the collection was already in flight
    Coalesced,
    /// The orchestrator was stopped mid-cycle
    Cancelled,
    Failed(CycleFailure),
}

impl CycleOutcome {
    pub const fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}
