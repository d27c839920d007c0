//! Pending conflict registry and subscriber fan-out

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::models::{CollectionKey, Conflict, ConflictEvent, RecordId, SettledResolution};

const EVENT_CAPACITY: usize = 256;

type ConflictKey = (CollectionKey, RecordId);

/// What `publish` did with a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// First conflict for this id; subscribers were notified
    Announced,
    /// A candidate payload changed; subscribers were notified again
    Reannounced,
    /// Only candidate timestamps moved; the pending copy was refreshed
    Refreshed,
    /// Identical to the pending conflict
    Unchanged,
}

impl PublishOutcome {
    pub const fn notified(self) -> bool {
        matches!(self, Self::Announced | Self::Reannounced)
    }
}

#[derive(Default)]
struct State {
    pending: BTreeMap<ConflictKey, Conflict>,
    settled: HashMap<ConflictKey, SettledResolution>,
}

/// Holds unresolved conflicts and broadcasts them to subscribers.
///
/// Publishing never blocks: events go through a bounded broadcast channel
/// and a slow subscriber only lags itself.
pub struct ConflictNotifier {
    sender: broadcast::Sender<ConflictEvent>,
    state: Mutex<State>,
}

impl Default for ConflictNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender,
            state: Mutex::new(State::default()),
        }
    }

    /// Subscribe to conflict events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConflictEvent> {
        self.sender.subscribe()
    }

    /// Register a conflict detected by a merge.
    ///
    /// Subscribers hear about a conflict once. A conflict already pending for
    /// the same record is announced again only if a candidate payload changed.
    pub fn publish(&self, conflict: Conflict) -> PublishOutcome {
        let key = (conflict.collection, conflict.record_id.clone());
        let outcome = {
            let mut state = self.state.lock();
            state.settled.remove(&key);
            let outcome = match state.pending.get(&key) {
                None => PublishOutcome::Announced,
                Some(existing) if existing.same_candidates(&conflict) => {
                    return PublishOutcome::Unchanged;
                }
                Some(existing) if existing.candidate_payloads_differ(&conflict) => {
                    PublishOutcome::Reannounced
                }
                Some(_) => PublishOutcome::Refreshed,
            };
            state.pending.insert(key, conflict.clone());
            outcome
        };

        if outcome.notified() {
            self.announce(&conflict);
        }
        outcome
    }

    /// Reload conflicts persisted by an earlier session and announce them
    pub fn restore(&self, conflicts: Vec<Conflict>) -> usize {
        let mut restored = 0;
        for conflict in conflicts {
            {
                let mut state = self.state.lock();
                let key = (conflict.collection, conflict.record_id.clone());
                if state.pending.contains_key(&key) {
                    continue;
                }
                state.pending.insert(key, conflict.clone());
            }
            self.announce(&conflict);
            restored += 1;
        }
        restored
    }

    /// Pending conflicts of one collection, in record id order
    pub fn pending(&self, collection: CollectionKey) -> Vec<Conflict> {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|((key, _), _)| *key == collection)
            .map(|(_, conflict)| conflict.clone())
            .collect()
    }

    /// Every pending conflict
    pub fn pending_all(&self) -> Vec<Conflict> {
        self.state.lock().pending.values().cloned().collect()
    }

    pub fn pending_count(&self, collection: CollectionKey) -> usize {
        self.state
            .lock()
            .pending
            .keys()
            .filter(|(key, _)| *key == collection)
            .count()
    }

    /// The pending conflict for a record, if any
    pub fn get(&self, collection: CollectionKey, record_id: &RecordId) -> Option<Conflict> {
        self.state
            .lock()
            .pending
            .get(&(collection, record_id.clone()))
            .cloned()
    }

    pub fn is_pending(&self, collection: CollectionKey, record_id: &RecordId) -> bool {
        self.state
            .lock()
            .pending
            .contains_key(&(collection, record_id.clone()))
    }

    /// Remove the pending conflict for a record, but only if it is `expected`.
    ///
    /// Fails with `StaleConflict` when nothing is pending for the record or
    /// when a newer conflict replaced the expected one.
    pub fn take(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
        expected: &Conflict,
    ) -> Result<Conflict> {
        let mut state = self.state.lock();
        let key = (collection, record_id.clone());
        match state.pending.get(&key) {
            None => Err(Error::stale(collection, record_id, "conflict is no longer pending")),
            Some(current) if !current.same_candidates(expected) => Err(Error::stale(
                collection,
                record_id,
                "replaced by a newer conflict",
            )),
            Some(_) => state
                .pending
                .remove(&key)
                .ok_or_else(|| Error::stale(collection, record_id, "conflict is no longer pending")),
        }
    }

    /// Drop a pending conflict that a later merge settled on its own
    pub fn supersede(&self, collection: CollectionKey, record_id: &RecordId) -> Option<Conflict> {
        let removed = self
            .state
            .lock()
            .pending
            .remove(&(collection, record_id.clone()));
        if removed.is_some() {
            tracing::debug!("Conflict on {collection}/{record_id} superseded by newer data");
        }
        removed
    }

    pub(crate) fn settle(&self, settled: SettledResolution) {
        let key = (settled.conflict.collection, settled.conflict.record_id.clone());
        let mut state = self.state.lock();
        state.pending.remove(&key);
        state.settled.insert(key, settled);
    }

    pub(crate) fn settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Option<SettledResolution> {
        self.state
            .lock()
            .settled
            .get(&(collection, record_id.clone()))
            .cloned()
    }

    fn announce(&self, conflict: &Conflict) {
        tracing::info!(
            "Conflict on {}/{} needs attention ({})",
            conflict.collection,
            conflict.record_id,
            conflict.reason.as_str()
        );
        // No subscribers is fine; the conflict stays pending either way.
        let _ = self.sender.send(ConflictEvent::from(conflict));
    }
}
