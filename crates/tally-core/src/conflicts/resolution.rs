//! Committing human or policy decisions for near-tie conflicts

use std::sync::Arc;

use super::notifier::ConflictNotifier;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{CollectionKey, Conflict, Record, RecordId, ResolutionChoice, SettledResolution};
use crate::store::{LocalStore, WriterLocks};
use crate::util::now_millis_after;

/// Applies resolutions to the local store under the collection writer lock.
#[derive(Clone)]
pub struct ResolutionApplier {
    store: Arc<dyn LocalStore>,
    locks: Arc<WriterLocks>,
    notifier: Arc<ConflictNotifier>,
    config: Arc<SyncConfig>,
}

impl ResolutionApplier {
    pub fn new(
        store: Arc<dyn LocalStore>,
        locks: Arc<WriterLocks>,
        notifier: Arc<ConflictNotifier>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            store,
            locks,
            notifier,
            config,
        }
    }

    /// Commit `choice` for a pending conflict and return the stored record.
    ///
    /// The chosen payload gets a fresh timestamp that clears the collection's
    /// near-tie window past both candidates, so the next merge settles the
    /// record without raising the conflict again. The next push leg sends it.
    ///
    /// Repeating a resolution that already went through returns the
    /// committed record without writing, including after a restart since
    /// settled resolutions are kept in the local store.
    pub fn apply_resolution(&self, conflict: &Conflict, choice: ResolutionChoice) -> Result<Record> {
        let collection = conflict.collection;
        let record_id = &conflict.record_id;

        self.locks.with_collection(collection, || {
            if let Some(previous) = self.settled(collection, record_id)? {
                if previous.conflict.same_candidates(conflict) {
                    if previous.choice == choice {
                        tracing::debug!("Resolution for {collection}/{record_id} already applied");
                        return Ok(previous.record);
                    }
                    return Err(Error::stale(
                        collection,
                        record_id,
                        "already resolved with a different choice",
                    ));
                }
            }

            match self.notifier.get(collection, record_id) {
                None => {
                    return Err(Error::stale(
                        collection,
                        record_id,
                        "conflict is no longer pending",
                    ))
                }
                Some(current) if !current.same_candidates(conflict) => {
                    return Err(Error::stale(
                        collection,
                        record_id,
                        "replaced by a newer conflict",
                    ))
                }
                Some(_) => {}
            }

            let mut snapshot = self.store.read_collection(collection)?;
            if !snapshot.contains(record_id) {
                self.notifier.supersede(collection, record_id);
                return Err(Error::stale(
                    collection,
                    record_id,
                    "record no longer exists locally",
                ));
            }

            let record = conflict
                .candidate(choice)
                .restamped(self.resolution_timestamp(conflict));
            snapshot.insert(record.clone());

            let remaining: Vec<Conflict> = self
                .notifier
                .pending(collection)
                .into_iter()
                .filter(|pending| pending.record_id != *record_id)
                .collect();
            let settled = SettledResolution {
                conflict: conflict.clone(),
                choice,
                record: record.clone(),
            };
            self.store
                .persist_resolution(collection, &snapshot, &remaining, &settled)?;
            self.notifier.settle(settled);
            tracing::info!(
                "Resolved conflict on {collection}/{record_id} keeping the {} copy",
                match choice {
                    ResolutionChoice::Local => "local",
                    ResolutionChoice::Remote => "remote",
                }
            );
            Ok(record)
        })
    }

    /// Resolve whatever conflict is pending for a record id
    pub fn resolve_by_id(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
        choice: ResolutionChoice,
    ) -> Result<Record> {
        if let Some(conflict) = self.notifier.get(collection, record_id) {
            return self.apply_resolution(&conflict, choice);
        }
        match self.settled(collection, record_id)? {
            Some(previous) => self.apply_resolution(&previous.conflict, choice),
            None => Err(Error::stale(
                collection,
                record_id,
                "no conflict is pending for this record",
            )),
        }
    }

    /// Resolution already applied to a record, in this session or an earlier one
    fn settled(
        &self,
        collection: CollectionKey,
        record_id: &RecordId,
    ) -> Result<Option<SettledResolution>> {
        match self.notifier.settled(collection, record_id) {
            Some(settled) => Ok(Some(settled)),
            None => self.store.load_settled(collection, record_id),
        }
    }

    fn resolution_timestamp(&self, conflict: &Conflict) -> i64 {
        let threshold = self.config.policy_for(conflict.collection).threshold_ms;
        let window = i64::try_from(threshold).unwrap_or(i64::MAX);
        now_millis_after(
            conflict
                .latest_candidate_timestamp()
                .map(|latest| latest.saturating_add(window)),
        )
    }
}
