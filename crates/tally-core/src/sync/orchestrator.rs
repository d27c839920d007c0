//! Reconciliation lifecycle across collections

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connectivity::Connectivity;
use super::status::{
    CollectionStatus, CycleFailure, CycleOutcome, CycleReport, SyncHealth, SyncPhase,
};
use crate::config::SyncConfig;
use crate::conflicts::{ConflictNotifier, ResolutionApplier};
use crate::error::{Error, RemoteError, Result};
use crate::merge::{MergeEngine, ThresholdDetector};
use crate::models::{CollectionKey, CollectionSnapshot, Record, RecordId};
use crate::remote::{RemoteResult, RemoteStore};
use crate::store::{LocalRecords, LocalStore, WriterLocks};
use crate::util::now_millis;

type StatusMap = BTreeMap<CollectionKey, CollectionStatus>;

/// How a cycle reacts to network failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryMode {
    /// Background cycles wait out connectivity loss
    Scheduled,
    /// Manual cycles report connectivity loss immediately
    OneShot,
}

#[derive(Debug, Clone, Copy)]
enum Leg {
    Pull,
    Push,
}

impl Leg {
    const fn phase(self) -> SyncPhase {
        match self {
            Self::Pull => SyncPhase::Pulling,
            Self::Push => SyncPhase::Pushing,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

enum LegError {
    Cancelled,
    Failed(CycleFailure),
}

#[derive(Default)]
struct Slot {
    in_flight: AtomicBool,
    trigger: Notify,
}

/// Clears the in-flight flag when a cycle ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Session {
    user_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Persisted {
    merged: usize,
    conflicts: usize,
    new_conflicts: usize,
    superseded: usize,
    outgoing: Vec<Record>,
}

struct Inner {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    config: Arc<SyncConfig>,
    connectivity: Connectivity,
    locks: Arc<WriterLocks>,
    notifier: Arc<ConflictNotifier>,
    collections: Vec<CollectionKey>,
    slots: HashMap<CollectionKey, Slot>,
    status: watch::Sender<StatusMap>,
    session: Mutex<Option<Session>>,
}

/// Drives pull, merge, persist and push for every registered collection.
///
/// One orchestrator belongs to one signed-in session. `start` spawns a
/// task per collection that reconciles immediately, then on the configured
/// interval or whenever `trigger` is called. Collections never wait on each
/// other, and a collection never runs two cycles at once.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Orchestrator for every known collection
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        connectivity: Connectivity,
    ) -> Result<Self> {
        Self::with_collections(store, remote, config, connectivity, CollectionKey::ALL)
    }

    /// Orchestrator for a chosen set of collections
    pub fn with_collections(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        connectivity: Connectivity,
        collections: impl IntoIterator<Item = CollectionKey>,
    ) -> Result<Self> {
        config.validate()?;
        let collections: Vec<CollectionKey> = collections
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if collections.is_empty() {
            return Err(Error::InvalidInput(
                "at least one collection must be registered".to_string(),
            ));
        }

        let slots = collections.iter().map(|key| (*key, Slot::default())).collect();
        let initial: StatusMap = collections
            .iter()
            .map(|key| (*key, CollectionStatus::default()))
            .collect();
        let (status, _) = watch::channel(initial);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                remote,
                config: Arc::new(config),
                connectivity,
                locks: Arc::new(WriterLocks::new()),
                notifier: Arc::new(ConflictNotifier::new()),
                collections,
                slots,
                status,
                session: Mutex::new(None),
            }),
        })
    }

    pub fn collections(&self) -> &[CollectionKey] {
        &self.inner.collections
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Pending conflicts and their event stream
    pub fn notifier(&self) -> Arc<ConflictNotifier> {
        Arc::clone(&self.inner.notifier)
    }

    /// Applier sharing this orchestrator's writer locks
    pub fn applier(&self) -> ResolutionApplier {
        ResolutionApplier::new(
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.locks),
            Arc::clone(&self.inner.notifier),
            Arc::clone(&self.inner.config),
        )
    }

    /// Host-application edits, serialized with the persist leg
    pub fn local_records(&self) -> LocalRecords {
        LocalRecords::new(Arc::clone(&self.inner.store), Arc::clone(&self.inner.locks))
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// User of the running session
    pub fn user_id(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    /// Reload conflicts persisted by an earlier session into the notifier.
    ///
    /// Each restored conflict is announced to current subscribers.
    pub fn restore_conflicts(&self) -> usize {
        let mut total = 0;
        for key in &self.inner.collections {
            match self.inner.store.load_conflicts(*key) {
                Ok(conflicts) => {
                    let restored = self.inner.notifier.restore(conflicts);
                    if restored > 0 {
                        tracing::info!("Restored {restored} pending conflict(s) for {key}");
                    }
                    total += restored;
                }
                Err(error) => tracing::warn!("Failed to load pending conflicts for {key}: {error}"),
            }
        }
        total
    }

    /// Begin background reconciliation for a signed-in user.
    ///
    /// Conflicts persisted by an earlier session are restored and announced
    /// first. Calling this while already running does nothing. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user id cannot be empty".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::InvalidInput("sync requires a Tokio runtime".to_string()))?;

        let mut session = self.inner.session.lock();
        if let Some(running) = session.as_ref() {
            tracing::info!("Sync already running for user {}", running.user_id);
            return Ok(());
        }

        self.restore_conflicts();
        for key in &self.inner.collections {
            self.inner.update_status(*key, |status| status.phase = SyncPhase::Idle);
        }

        let cancel = CancellationToken::new();
        let tasks = self
            .inner
            .collections
            .iter()
            .map(|key| {
                let inner = Arc::clone(&self.inner);
                let cancel = cancel.clone();
                let key = *key;
                runtime.spawn(async move { inner.run_loop(key, cancel).await })
            })
            .collect();

        *session = Some(Session {
            user_id: user_id.to_string(),
            cancel,
            tasks,
        });
        tracing::info!(
            "Sync started for user {} ({} collections)",
            user_id,
            self.inner.collections.len()
        );
        Ok(())
    }

    /// Stop all background work and wait for the collection tasks to exit.
    ///
    /// In-flight network legs are cancelled. Safe to call in any phase and
    /// when not running.
    pub async fn stop(&self) {
        let session = self.inner.session.lock().take();
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        for task in session.tasks {
            if let Err(error) = task.await {
                tracing::warn!("Sync task ended abnormally: {error}");
            }
        }
        for key in &self.inner.collections {
            self.inner
                .update_status(*key, |status| status.phase = SyncPhase::Stopped);
        }
        tracing::info!("Sync stopped for user {}", session.user_id);
    }

    /// Ask a running collection task to reconcile now.
    ///
    /// Returns `false` when the trigger was coalesced into a cycle already
    /// in flight.
    pub fn trigger(&self, collection: CollectionKey) -> Result<bool> {
        let slot = self.inner.slot(collection)?;
        if !self.is_running() {
            return Err(Error::InvalidInput("sync is not running".to_string()));
        }
        if slot.in_flight.load(Ordering::Acquire) {
            tracing::debug!("Trigger for {collection} coalesced into the running cycle");
            return Ok(false);
        }
        slot.trigger.notify_one();
        Ok(true)
    }

    /// Run one full cycle for a collection now and report the outcome.
    ///
    /// Connectivity loss ends the cycle instead of waiting it out.
    pub async fn sync_once(&self, collection: CollectionKey) -> Result<CycleOutcome> {
        self.inner.slot(collection)?;
        let cancel = self.inner.session_token();
        Ok(self
            .inner
            .run_cycle(collection, &cancel, RetryMode::OneShot)
            .await)
    }

    /// Run one cycle for every registered collection, one after another
    pub async fn sync_all_once(&self) -> Vec<(CollectionKey, CycleOutcome)> {
        let cancel = self.inner.session_token();
        let mut outcomes = Vec::with_capacity(self.inner.collections.len());
        for key in &self.inner.collections {
            let outcome = self.inner.run_cycle(*key, &cancel, RetryMode::OneShot).await;
            outcomes.push((*key, outcome));
        }
        outcomes
    }

    /// Current status of one collection
    pub fn status(&self, collection: CollectionKey) -> Option<CollectionStatus> {
        let mut status = self.inner.status.borrow().get(&collection).cloned()?;
        status.pending_conflicts = self.inner.notifier.pending_count(collection);
        Some(status)
    }

    /// Current status of every registered collection
    pub fn statuses(&self) -> Vec<(CollectionKey, CollectionStatus)> {
        self.inner
            .collections
            .iter()
            .filter_map(|key| self.status(*key).map(|status| (*key, status)))
            .collect()
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<BTreeMap<CollectionKey, CollectionStatus>> {
        self.inner.status.subscribe()
    }
}

impl Inner {
    fn slot(&self, collection: CollectionKey) -> Result<&Slot> {
        self.slots
            .get(&collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection} is not registered")))
    }

    fn session_token(&self) -> CancellationToken {
        self.session
            .lock()
            .as_ref()
            .map_or_else(CancellationToken::new, |session| session.cancel.child_token())
    }

    fn update_status(&self, collection: CollectionKey, f: impl FnOnce(&mut CollectionStatus)) {
        self.status.send_modify(|statuses| {
            f(statuses.entry(collection).or_default());
        });
    }

    fn set_phase(&self, collection: CollectionKey, phase: SyncPhase) {
        tracing::debug!("{collection}: {phase}");
        self.update_status(collection, |status| status.phase = phase);
    }

    async fn run_loop(self: Arc<Self>, collection: CollectionKey, cancel: CancellationToken) {
        let Ok(slot) = self.slot(collection) else {
            return;
        };
        let interval = self.config.interval();

        loop {
            let outcome = self
                .run_cycle(collection, &cancel, RetryMode::Scheduled)
                .await;
            if let CycleOutcome::Failed(failure) = &outcome {
                tracing::warn!("Sync cycle for {collection} failed: {failure}");
            }
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = slot.trigger.notified() => {
                    tracing::debug!("{collection}: triggered");
                }
                () = sleep_or_pending(interval) => {}
            }
        }
    }

    async fn run_cycle(
        &self,
        collection: CollectionKey,
        cancel: &CancellationToken,
        mode: RetryMode,
    ) -> CycleOutcome {
        let Ok(slot) = self.slot(collection) else {
            return CycleOutcome::Failed(CycleFailure::Local(format!(
                "collection {collection} is not registered"
            )));
        };
        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CycleOutcome::Coalesced;
        }
        let _in_flight = InFlight(&slot.in_flight);

        match self.cycle(collection, cancel, mode).await {
            Ok(report) => {
                let pending = self.notifier.pending_count(collection);
                self.update_status(collection, |status| {
                    status.phase = SyncPhase::Idle;
                    status.health = SyncHealth::Healthy;
                    status.consecutive_failures = 0;
                    status.last_synced_at = Some(now_millis());
                    status.pending_conflicts = pending;
                });
                tracing::debug!(
                    "Sync cycle for {collection} complete: {} merged, {} conflict(s), {} pushed",
                    report.merged,
                    report.conflicts,
                    report.pushed
                );
                CycleOutcome::Completed(report)
            }
            Err(LegError::Cancelled) => {
                self.set_phase(collection, SyncPhase::Stopped);
                CycleOutcome::Cancelled
            }
            Err(LegError::Failed(failure)) => {
                self.update_status(collection, |status| {
                    status.phase = match failure {
                        CycleFailure::Offline(_) => SyncPhase::Offline,
                        _ => SyncPhase::Idle,
                    };
                    if let CycleFailure::Degraded(reason) | CycleFailure::Local(reason) = &failure
                    {
                        status.health = SyncHealth::Degraded(reason.clone());
                    }
                });
                CycleOutcome::Failed(failure)
            }
        }
    }

    async fn cycle(
        &self,
        collection: CollectionKey,
        cancel: &CancellationToken,
        mode: RetryMode,
    ) -> std::result::Result<CycleReport, LegError> {
        self.set_phase(collection, SyncPhase::Pulling);
        let remote = self
            .with_retries(collection, Leg::Pull, cancel, mode, || {
                self.remote.fetch_collection(collection)
            })
            .await?;

        self.set_phase(collection, SyncPhase::Merging);
        let persisted = self.merge_and_persist(collection, &remote).map_err(|error| {
            tracing::error!("Failed to persist merge of {collection}: {error}");
            LegError::Failed(CycleFailure::Local(error.to_string()))
        })?;

        let pushed = persisted.outgoing.len();
        if !persisted.outgoing.is_empty() {
            self.set_phase(collection, SyncPhase::Pushing);
            self.with_retries(collection, Leg::Push, cancel, mode, || {
                self.remote.push_records(collection, &persisted.outgoing)
            })
            .await?;
            self.record_pushed(collection, &persisted.outgoing)
                .map_err(|error| {
                    tracing::error!("Failed to record pushed versions for {collection}: {error}");
                    LegError::Failed(CycleFailure::Local(error.to_string()))
                })?;
        }

        Ok(CycleReport {
            collection,
            merged: persisted.merged,
            conflicts: persisted.conflicts,
            new_conflicts: persisted.new_conflicts,
            superseded: persisted.superseded,
            pushed,
        })
    }

    /// Merge against the current local snapshot and persist the result.
    ///
    /// Runs entirely under the collection writer lock. The local snapshot
    /// is read here, after the pull, so edits made while the pull was in
    /// flight take part in the merge.
    fn merge_and_persist(
        &self,
        collection: CollectionKey,
        remote: &CollectionSnapshot,
    ) -> Result<Persisted> {
        let detector = ThresholdDetector::from(self.config.policy_for(collection));

        self.locks.with_collection(collection, || {
            let local = self.store.read_collection(collection)?;
            let merged =
                MergeEngine::new(&detector).merge(&local, remote, collection, now_millis());

            self.set_phase(collection, SyncPhase::Persisting);
            let mut versions = self.store.load_remote_versions(collection)?;
            for record in remote.iter() {
                if let Some(updated_at) = record.updated_at {
                    versions.insert(record.id.clone(), updated_at);
                }
            }
            self.store
                .persist_merge(collection, &merged.records, &merged.conflicts, &versions)?;

            let detected: BTreeSet<&RecordId> =
                merged.conflicts.iter().map(|conflict| &conflict.record_id).collect();
            let superseded = self
                .notifier
                .pending(collection)
                .into_iter()
                .filter(|pending| !detected.contains(&pending.record_id))
                .filter(|pending| {
                    self.notifier
                        .supersede(collection, &pending.record_id)
                        .is_some()
                })
                .count();
            let new_conflicts = merged
                .conflicts
                .iter()
                .filter(|conflict| self.notifier.publish((*conflict).clone()).notified())
                .count();

            let outgoing: Vec<Record> = merged
                .records
                .iter()
                .filter(|record| {
                    record
                        .updated_at
                        .is_some_and(|updated_at| versions.get(&record.id) != Some(&updated_at))
                })
                .filter(|record| !self.notifier.is_pending(collection, &record.id))
                .cloned()
                .collect();

            Ok(Persisted {
                merged: merged.records.len(),
                conflicts: merged.conflicts.len(),
                new_conflicts,
                superseded,
                outgoing,
            })
        })
    }

    fn record_pushed(&self, collection: CollectionKey, pushed: &[Record]) -> Result<()> {
        self.locks.with_collection(collection, || {
            let mut versions = self.store.load_remote_versions(collection)?;
            for record in pushed {
                if let Some(updated_at) = record.updated_at {
                    versions.insert(record.id.clone(), updated_at);
                }
            }
            self.store.save_remote_versions(collection, &versions)
        })
    }

    /// Run one network leg with timeout, cancellation and backoff.
    ///
    /// Connectivity failures wait for the device to come back online (or end
    /// the cycle in one-shot mode). Rejections are retried until
    /// `max_remote_attempts`, after which the collection is degraded.
    async fn with_retries<T, F, Fut>(
        &self,
        collection: CollectionKey,
        leg: Leg,
        cancel: &CancellationToken,
        mode: RetryMode,
        mut attempt_leg: F,
    ) -> std::result::Result<T, LegError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut retries: u32 = 0;
        let mut rejections: u32 = 0;

        loop {
            if !self.connectivity.is_online() {
                self.set_phase(collection, SyncPhase::Offline);
                if mode == RetryMode::OneShot {
                    return Err(LegError::Failed(CycleFailure::Offline(
                        "device is offline".to_string(),
                    )));
                }
                tokio::select! {
                    () = cancel.cancelled() => return Err(LegError::Cancelled),
                    () = self.connectivity.wait_online() => {}
                }
                self.set_phase(collection, leg.phase());
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LegError::Cancelled),
                result = tokio::time::timeout(self.config.leg_timeout(), attempt_leg()) => {
                    result.unwrap_or_else(|_| {
                        Err(RemoteError::Connectivity(format!("{} timed out", leg.name())))
                    })
                }
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            self.update_status(collection, |status| status.consecutive_failures += 1);

            let connectivity = error.is_connectivity();
            if connectivity {
                self.set_phase(collection, SyncPhase::Offline);
                if mode == RetryMode::OneShot {
                    return Err(LegError::Failed(CycleFailure::Offline(error.to_string())));
                }
            } else {
                rejections += 1;
                if rejections >= self.config.max_remote_attempts {
                    tracing::warn!(
                        "{collection} {} rejected {rejections} time(s); marking sync degraded: {error}",
                        leg.name()
                    );
                    return Err(LegError::Failed(CycleFailure::Degraded(error.to_string())));
                }
            }

            let delay = self.config.backoff.delay(retries);
            retries = retries.saturating_add(1);
            tracing::warn!(
                "{collection} {} failed ({error}); retrying in {}ms",
                leg.name(),
                delay.as_millis()
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(LegError::Cancelled),
                () = tokio::time::sleep(delay) => {}
                () = self.connectivity.reconnected(), if connectivity => {}
            }
            self.set_phase(collection, leg.phase());
        }
    }
}

async fn sleep_or_pending(interval: Option<std::time::Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffPolicy;
    use crate::models::Conflict;
    use crate::remote::MemoryRemoteStore;
    use crate::store::MemoryLocalStore;
    use crate::models::ResolutionChoice;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const KEY: CollectionKey = CollectionKey::Transactions;

    struct Harness {
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        orchestrator: SyncOrchestrator,
    }

    fn harness_with(config: SyncConfig, collections: &[CollectionKey]) -> Harness {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let orchestrator = SyncOrchestrator::with_collections(
            local.clone(),
            remote.clone(),
            config,
            Connectivity::new(true),
            collections.iter().copied(),
        )
        .unwrap();
        Harness {
            local,
            remote,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(SyncConfig::default().without_auto_sync(), &[KEY])
    }

    fn tx(id: &str, amount: i64, updated_at: i64) -> Record {
        Record::with_id(id, updated_at, json!({"amt": amount}))
    }

    fn transaction_payload() -> serde_json::Value {
        json!({
            "account_id": "checking",
            "amount_cents": -1250,
            "currency": "USD",
            "description": "Coffee",
            "occurred_on": "2026-03-01"
        })
    }

    fn seed_local(harness: &Harness, records: Vec<Record>) {
        let (snapshot, _) = CollectionSnapshot::from_records(KEY, records);
        harness.local.write_collection(KEY, &snapshot).unwrap();
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cycle_merges_and_pushes_local_changes() {
        let h = harness();
        seed_local(&h, vec![tx("local", 1, 1_000)]);
        h.remote.seed(KEY, vec![tx("remote", 2, 2_000)]);

        let report = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!(report.merged, 2);
        assert_eq!(report.pushed, 1);

        let local = h.local.read_collection(KEY).unwrap();
        assert!(local.contains(&"remote".into()));
        assert!(h.remote.snapshot(KEY).contains(&"local".into()));

        let second = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!(second.pushed, 0);
        assert_eq!(h.remote.pushes().len(), 1);

        let status = h.orchestrator.status(KEY).unwrap();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn decisive_remote_edit_is_not_pushed_back() {
        let h = harness();
        seed_local(&h, vec![tx("1", 10, 1_000)]);
        h.remote.seed(KEY, vec![tx("1", 20, 2_000)]);

        let report = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!(report.pushed, 0);
        assert_eq!(
            h.local.read_collection(KEY).unwrap().get(&"1".into()),
            Some(&tx("1", 20, 2_000))
        );
    }

    #[tokio::test]
    async fn near_tie_is_announced_once_and_held_back_from_push() {
        let h = harness();
        let mut events = h.orchestrator.notifier().subscribe();
        seed_local(&h, vec![tx("1", 10, 1_000)]);
        h.remote.seed(KEY, vec![tx("1", 20, 1_100)]);

        let first = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!((first.conflicts, first.new_conflicts, first.pushed), (1, 1, 0));
        let second = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!((second.conflicts, second.new_conflicts), (1, 0));

        let event = events.try_recv().unwrap();
        assert_eq!(event.record_id, RecordId::from("1"));
        assert!(events.try_recv().is_err());
        assert_eq!(h.local.load_conflicts(KEY).unwrap().len(), 1);
        assert_eq!(h.orchestrator.status(KEY).unwrap().pending_conflicts, 1);
        assert!(h.remote.pushes().is_empty());
    }

    #[tokio::test]
    async fn resolved_conflict_is_pushed_on_next_cycle() {
        let h = harness();
        seed_local(&h, vec![tx("1", 10, 1_000)]);
        h.remote.seed(KEY, vec![tx("1", 20, 1_100)]);
        completed(h.orchestrator.sync_once(KEY).await.unwrap());

        let resolved = h
            .orchestrator
            .applier()
            .resolve_by_id(KEY, &"1".into(), ResolutionChoice::Remote)
            .unwrap();

        let report = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!((report.conflicts, report.pushed), (0, 1));
        assert_eq!(h.remote.snapshot(KEY).get(&"1".into()), Some(&resolved));
        assert!(h.orchestrator.notifier().pending_all().is_empty());
    }

    #[tokio::test]
    async fn newer_local_edit_supersedes_pending_conflict() {
        let h = harness();
        seed_local(&h, vec![tx("1", 10, 1_000)]);
        h.remote.seed(KEY, vec![tx("1", 20, 1_100)]);
        completed(h.orchestrator.sync_once(KEY).await.unwrap());

        seed_local(&h, vec![tx("1", 30, 9_000)]);
        let report = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!((report.conflicts, report.superseded, report.pushed), (0, 1, 1));
        assert_eq!(h.remote.snapshot(KEY).get(&"1".into()), Some(&tx("1", 30, 9_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn local_edit_during_pull_is_merged_not_lost() {
        let h = harness();
        h.remote.seed(KEY, vec![tx("remote", 1, 1_000)]);
        h.remote.set_latency(Some(Duration::from_secs(1)));

        let cycle = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.sync_once(KEY).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(h.orchestrator.status(KEY).unwrap().phase, SyncPhase::Pulling);

        h.orchestrator
            .local_records()
            .put(KEY, Some("edit".into()), transaction_payload())
            .unwrap();

        let report = completed(cycle.await.unwrap().unwrap());
        assert_eq!(report.merged, 2);
        let local = h.local.read_collection(KEY).unwrap();
        assert!(local.contains(&"edit".into()));
        assert!(local.contains(&"remote".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_cycle_mid_flight_is_coalesced() {
        let h = harness();
        h.remote.set_latency(Some(Duration::from_secs(1)));

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.sync_once(KEY).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            h.orchestrator.sync_once(KEY).await.unwrap(),
            CycleOutcome::Coalesced
        );
        completed(first.await.unwrap().unwrap());
        assert_eq!(h.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn one_shot_cycle_reports_offline_device() {
        let h = harness();
        h.orchestrator.connectivity().set_online(false);

        let outcome = h.orchestrator.sync_once(KEY).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed(CycleFailure::Offline(_))));
        assert_eq!(h.orchestrator.status(KEY).unwrap().phase, SyncPhase::Offline);
        assert_eq!(h.remote.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_leg_times_out_as_connectivity_failure() {
        let h = harness_with(
            SyncConfig::default()
                .without_auto_sync()
                .with_leg_timeout(Duration::from_secs(5)),
            &[KEY],
        );
        h.remote.set_latency(Some(Duration::from_secs(60)));

        let outcome = h.orchestrator.sync_once(KEY).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed(CycleFailure::Offline(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rejections_degrade_health_then_recover() {
        let h = harness_with(
            SyncConfig::default()
                .without_auto_sync()
                .with_max_remote_attempts(3),
            &[KEY],
        );
        h.remote
            .fail_fetches(3, RemoteError::Rejected("quota exceeded".to_string()));

        let outcome = h.orchestrator.sync_once(KEY).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed(CycleFailure::Degraded(_))));
        assert_eq!(h.remote.fetch_count(), 3);
        let status = h.orchestrator.status(KEY).unwrap();
        assert!(status.health.is_degraded());
        assert_eq!(status.consecutive_failures, 3);

        completed(h.orchestrator.sync_once(KEY).await.unwrap());
        let status = h.orchestrator.status(KEY).unwrap();
        assert_eq!(status.health, SyncHealth::Healthy);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_push_retries_only_the_push_leg() {
        let h = harness();
        seed_local(&h, vec![tx("1", 1, 1_000)]);
        h.remote
            .fail_pushes(1, RemoteError::Rejected("try again".to_string()));

        let report = completed(h.orchestrator.sync_once(KEY).await.unwrap());
        assert_eq!(report.pushed, 1);
        assert_eq!(h.remote.fetch_count(), 1);
        assert_eq!(h.remote.pushes().len(), 1);
    }

    #[tokio::test]
    async fn one_collection_failing_does_not_block_others() {
        let h = harness_with(
            SyncConfig::default()
                .without_auto_sync()
                .with_max_remote_attempts(1),
            &[CollectionKey::Transactions, CollectionKey::Accounts],
        );
        h.remote
            .seed(CollectionKey::Accounts, vec![tx("a", 1, 1_000)]);
        // Transactions sorts first, so it takes the queued fault.
        h.remote.fail_fetches(1, RemoteError::Rejected("boom".to_string()));

        let outcomes = h.orchestrator.sync_all_once().await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0],
            (CollectionKey::Transactions, CycleOutcome::Failed(CycleFailure::Degraded(_)))
        ));
        assert!(matches!(
            outcomes[1],
            (CollectionKey::Accounts, CycleOutcome::Completed(_))
        ));
        assert!(h
            .local
            .read_collection(CollectionKey::Accounts)
            .unwrap()
            .contains(&"a".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_waits_out_connectivity_loss() {
        let config = SyncConfig::default()
            .without_auto_sync()
            .with_backoff(BackoffPolicy {
                base_ms: 1_000,
                cap_ms: 4_000,
            });
        let h = harness_with(config, &[KEY]);
        h.remote.seed(KEY, vec![tx("1", 1, 1_000)]);
        h.remote.fail_fetches(
            2,
            RemoteError::Connectivity("connection reset".to_string()),
        );

        let mut statuses = h.orchestrator.watch_status();
        h.orchestrator.start("user-1").unwrap();
        tokio::time::timeout(
            Duration::from_secs(60),
            statuses.wait_for(|map| map[&KEY].last_synced_at.is_some()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(h.remote.fetch_count(), 3);
        assert!(h.local.read_collection(KEY).unwrap().contains(&"1".into()));
        h.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn offline_device_resumes_when_connectivity_returns() {
        let h = harness();
        h.orchestrator.connectivity().set_online(false);
        h.remote.seed(KEY, vec![tx("1", 1, 1_000)]);

        let mut statuses = h.orchestrator.watch_status();
        h.orchestrator.start("user-1").unwrap();
        statuses
            .wait_for(|map| map[&KEY].phase == SyncPhase::Offline)
            .await
            .unwrap();
        assert_eq!(h.remote.fetch_count(), 0);

        h.orchestrator.connectivity().set_online(true);
        statuses
            .wait_for(|map| map[&KEY].last_synced_at.is_some())
            .await
            .unwrap();
        assert_eq!(h.remote.fetch_count(), 1);
        h.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_in_flight_pull() {
        let h = harness();
        h.remote.set_latency(Some(Duration::from_secs(600)));
        h.orchestrator.start("user-1").unwrap();
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(1), h.orchestrator.stop())
            .await
            .unwrap();
        assert!(!h.orchestrator.is_running());
        assert_eq!(h.orchestrator.status(KEY).unwrap().phase, SyncPhase::Stopped);
        assert!(h.orchestrator.trigger(KEY).is_err());
    }

    #[tokio::test]
    async fn start_validates_user_and_is_idempotent() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.start("  "),
            Err(Error::InvalidInput(_))
        ));

        h.orchestrator.start("user-1").unwrap();
        h.orchestrator.start("user-2").unwrap();
        assert_eq!(h.orchestrator.user_id().as_deref(), Some("user-1"));
        h.orchestrator.stop().await;
        h.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_runs_another_cycle() {
        let h = harness();
        let mut statuses = h.orchestrator.watch_status();
        h.orchestrator.start("user-1").unwrap();
        statuses
            .wait_for(|map| map[&KEY].last_synced_at.is_some())
            .await
            .unwrap();

        h.remote.seed(KEY, vec![tx("late", 1, 1_000)]);
        assert!(h.orchestrator.trigger(KEY).unwrap());
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.remote.fetch_count() < 2 || h.orchestrator.status(KEY).unwrap().phase != SyncPhase::Idle {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(h.local.read_collection(KEY).unwrap().contains(&"late".into()));
        h.orchestrator.stop().await;
    }

    #[tokio::test]
    async fn start_restores_persisted_conflicts() {
        let h = harness();
        let conflict = Conflict {
            collection: KEY,
            record_id: "1".into(),
            local: tx("1", 10, 1_000),
            remote: tx("1", 20, 1_100),
            reason: crate::models::ConflictReason::NearTie,
            detected_at: 2_000,
        };
        h.local.save_conflicts(KEY, &[conflict.clone()]).unwrap();
        let mut events = h.orchestrator.notifier().subscribe();

        h.orchestrator.start("user-1").unwrap();
        assert_eq!(h.orchestrator.notifier().get(KEY, &"1".into()), Some(conflict));
        assert_eq!(events.try_recv().unwrap().record_id, RecordId::from("1"));
        h.orchestrator.stop().await;
    }

    #[test]
    fn unregistered_collection_is_rejected() {
        let h = harness();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let error = runtime
            .block_on(h.orchestrator.sync_once(CollectionKey::Goals))
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.start("user-1"),
            Err(Error::InvalidInput(_))
        ));
    }
}
