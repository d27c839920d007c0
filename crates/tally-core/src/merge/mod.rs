//! Pure reconciliation of a local and a remote collection snapshot.
//!
//! The engine never performs I/O and never fails: malformed records are
//! sanitized (a missing timestamp makes a record maximally stale) and
//! logged, and divergent edits too close to order are surfaced as
//! conflicts instead of being guessed.

mod detector;

use std::collections::BTreeSet;

pub use detector::{ConflictDetector, Side, ThresholdDetector, Verdict};

use crate::models::{CollectionKey, CollectionSnapshot, Conflict, ConflictReason, Record};

/// Per-merge counters, reported with every cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub local_only: usize,
    pub remote_only: usize,
    pub identical: usize,
    pub local_wins: usize,
    pub remote_wins: usize,
    pub near_ties: usize,
}

/// Output of a merge: the new local collection plus unresolved conflicts
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCollection {
    pub collection: CollectionKey,
    pub records: CollectionSnapshot,
    pub conflicts: Vec<Conflict>,
    pub stats: MergeStats,
}

/// Reconciles two snapshots of one collection using a detector policy.
#[derive(Clone, Copy)]
pub struct MergeEngine<'d> {
    detector: &'d dyn ConflictDetector,
}

impl<'d> MergeEngine<'d> {
    pub const fn new(detector: &'d dyn ConflictDetector) -> Self {
        Self { detector }
    }

    /// Merge `local` and `remote` into one record per distinct id.
    ///
    /// `detected_at` stamps any conflict raised; passing it in keeps the
    /// engine free of clock reads.
    pub fn merge(
        &self,
        local: &CollectionSnapshot,
        remote: &CollectionSnapshot,
        collection: CollectionKey,
        detected_at: i64,
    ) -> MergedCollection {
        let ids: BTreeSet<_> = local.ids().chain(remote.ids()).collect();

        let mut records = CollectionSnapshot::new();
        let mut conflicts = Vec::new();
        let mut stats = MergeStats::default();

        for id in ids {
            let merged = match (local.get(id), remote.get(id)) {
                (Some(ours), None) => {
                    stats.local_only += 1;
                    ours.clone()
                }
                (None, Some(theirs)) => {
                    stats.remote_only += 1;
                    theirs.clone()
                }
                (Some(ours), Some(theirs)) => {
                    self.reconcile(collection, ours, theirs, detected_at, &mut stats, &mut conflicts)
                }
                (None, None) => continue,
            };
            records.insert(merged);
        }

        if !conflicts.is_empty() {
            tracing::debug!(
                "Merge of {} raised {} near-tie conflict(s)",
                collection,
                conflicts.len()
            );
        }

        MergedCollection {
            collection,
            records,
            conflicts,
            stats,
        }
    }

    fn reconcile(
        &self,
        collection: CollectionKey,
        ours: &Record,
        theirs: &Record,
        detected_at: i64,
        stats: &mut MergeStats,
        conflicts: &mut Vec<Conflict>,
    ) -> Record {
        for (side, record) in [("local", ours), ("remote", theirs)] {
            if record.updated_at.is_none() {
                tracing::warn!(
                    "{} record {}/{} has no updated_at; treating it as stale",
                    side,
                    collection,
                    record.id
                );
            }
        }

        if self.detector.payloads_equal(ours, theirs) {
            stats.identical += 1;
            // Later copy wins; equal stamps fall back to the payload text so
            // the choice does not depend on argument order.
            let keep_theirs = theirs
                .effective_updated_at()
                .cmp(&ours.effective_updated_at())
                .then_with(|| theirs.payload.to_string().cmp(&ours.payload.to_string()))
                .is_gt();
            return if keep_theirs {
                theirs.clone()
            } else {
                ours.clone()
            };
        }

        match self.detector.classify(ours, theirs) {
            Verdict::Winner(Side::Local) => {
                stats.local_wins += 1;
                ours.clone()
            }
            Verdict::Winner(Side::Remote) => {
                stats.remote_wins += 1;
                theirs.clone()
            }
            Verdict::NearTie => {
                stats.near_ties += 1;
                conflicts.push(Conflict {
                    collection,
                    record_id: ours.id.clone(),
                    local: ours.clone(),
                    remote: theirs.clone(),
                    reason: ConflictReason::NearTie,
                    detected_at,
                });
                // Provisionally keep the resident copy so the app stays usable.
                ours.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const T: i64 = 1_700_000_000_000;
    const KEY: CollectionKey = CollectionKey::Transactions;

    fn snapshot(records: Vec<Record>) -> CollectionSnapshot {
        CollectionSnapshot::from_records(KEY, records).0
    }

    fn tx(id: &str, amount: i64, updated_at: i64) -> Record {
        Record::with_id(id, updated_at, json!({"amt": amount}))
    }

    fn merge(local: &CollectionSnapshot, remote: &CollectionSnapshot) -> MergedCollection {
        let detector = ThresholdDetector::new(500);
        MergeEngine::new(&detector).merge(local, remote, KEY, T)
    }

    #[test]
    fn equal_records_merge_without_conflict() {
        let local = snapshot(vec![tx("1", 10, T)]);
        let remote = snapshot(vec![tx("1", 10, T)]);

        let merged = merge(&local, &remote);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.records, local);
        assert_eq!(merged.stats.identical, 1);
    }

    #[test]
    fn decisively_newer_remote_wins() {
        let local = snapshot(vec![tx("1", 10, T)]);
        let remote = snapshot(vec![tx("1", 20, T + 1_000)]);

        let merged = merge(&local, &remote);
        assert!(merged.conflicts.is_empty());
        assert_eq!(
            merged.records.get(&"1".into()).unwrap().payload,
            json!({"amt": 20})
        );
    }

    #[test]
    fn near_tie_raises_conflict_and_keeps_local() {
        let local = snapshot(vec![tx("1", 10, T)]);
        let remote = snapshot(vec![tx("1", 20, T + 100)]);

        let merged = merge(&local, &remote);
        assert_eq!(merged.conflicts.len(), 1);

        let conflict = &merged.conflicts[0];
        assert_eq!(conflict.reason, ConflictReason::NearTie);
        assert_eq!(conflict.local, tx("1", 10, T));
        assert_eq!(conflict.remote, tx("1", 20, T + 100));
        assert_eq!(
            merged.records.get(&"1".into()).unwrap().payload,
            json!({"amt": 10})
        );
    }

    #[test]
    fn local_only_record_is_kept() {
        let local = snapshot(vec![tx("1", 10, T), tx("2", 5, T)]);
        let remote = snapshot(vec![tx("1", 10, T)]);

        let merged = merge(&local, &remote);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.records.get(&"2".into()), Some(&tx("2", 5, T)));
        assert_eq!(merged.stats.local_only, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let local = snapshot(vec![tx("1", 10, T), tx("2", 1, T), tx("3", 7, T)]);
        let remote = snapshot(vec![tx("1", 11, T + 50), tx("3", 8, T + 5_000), tx("4", 2, T)]);

        assert_eq!(merge(&local, &remote), merge(&local, &remote));
    }

    #[test]
    fn non_conflicting_merge_is_symmetric() {
        let a = snapshot(vec![
            tx("1", 10, T),
            tx("2", 1, T + 9_000),
            tx("3", 3, T),
            tx("5", 5, T + 7),
        ]);
        let b = snapshot(vec![
            tx("1", 12, T + 2_000),
            tx("2", 2, T),
            tx("4", 4, T),
            tx("5", 5, T + 3),
        ]);

        let ab = merge(&a, &b);
        let ba = merge(&b, &a);
        assert!(ab.conflicts.is_empty());
        assert_eq!(ab.records, ba.records);
    }

    #[test]
    fn equal_payloads_differing_in_ignored_fields_merge_symmetrically() {
        let key = CollectionKey::Investments;
        let a = CollectionSnapshot::from_records(
            key,
            vec![Record::with_id("1", 5_000, json!({"qty": 1, "px": 10}))],
        )
        .0;
        let b = CollectionSnapshot::from_records(
            key,
            vec![Record::with_id("1", 5_000, json!({"qty": 1, "px": 11}))],
        )
        .0;

        let detector = ThresholdDetector::new(500).ignoring("px");
        let engine = MergeEngine::new(&detector);
        let ab = engine.merge(&a, &b, key, T);
        let ba = engine.merge(&b, &a, key, T);

        assert!(ab.conflicts.is_empty());
        assert_eq!(ab.stats.identical, 1);
        assert_eq!(ab.records, ba.records);
    }

    #[test]
    fn every_id_appears_exactly_once() {
        let local = snapshot(vec![tx("1", 1, T), tx("2", 2, T)]);
        let remote = snapshot(vec![tx("2", 3, T + 10), tx("3", 3, T)]);

        let merged = merge(&local, &remote);
        let ids: Vec<_> = merged.records.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn conflict_raised_exactly_on_near_ties() {
        for gap in [0_i64, 1, 250, 499, 500, 501, 1_000, -500, -501] {
            let local = snapshot(vec![tx("1", 1, T)]);
            let remote = snapshot(vec![tx("1", 2, T + gap)]);
            let merged = merge(&local, &remote);
            assert_eq!(
                merged.conflicts.len(),
                usize::from(gap.abs() <= 500),
                "gap {gap}"
            );
        }
    }

    #[test]
    fn missing_timestamp_loses_without_failing_merge() {
        let stale = Record {
            id: "1".into(),
            updated_at: None,
            payload: json!({"amt": 1}),
        };
        let local = snapshot(vec![stale]);
        let remote = snapshot(vec![tx("1", 2, 0)]);

        let merged = merge(&local, &remote);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.records.get(&"1".into()), Some(&tx("1", 2, 0)));
    }

    #[test]
    fn equal_payloads_keep_later_copy_in_either_order() {
        let older = snapshot(vec![tx("1", 10, T)]);
        let newer = snapshot(vec![tx("1", 10, T + 40_000)]);

        assert_eq!(merge(&older, &newer).records, newer);
        assert_eq!(merge(&newer, &older).records, newer);
    }
}
