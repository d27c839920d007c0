//! Winner-vs-near-tie policy for divergent record pairs

use serde_json::Value;

use crate::config::MergePolicy;
use crate::models::Record;

/// Which replica a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Outcome of comparing two divergent copies of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The copy from this side is decisively newer
    Winner(Side),
    /// Timestamps too close to order; surface instead of guessing
    NearTie,
}

/// Injectable policy used by the merge engine.
///
/// Implementations must be pure: no I/O, no clocks.
pub trait ConflictDetector: Send + Sync {
    /// Whether two payloads count as the same edit
    fn payloads_equal(&self, a: &Record, b: &Record) -> bool;

    /// Decide between two copies whose payloads differ
    fn classify(&self, local: &Record, remote: &Record) -> Verdict;
}

/// Last-writer-wins with a near-tie window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdDetector {
    threshold_ms: u64,
    ignored_fields: Vec<String>,
}

impl ThresholdDetector {
    pub const fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            ignored_fields: Vec::new(),
        }
    }

    /// Exclude a top-level payload field from equality checks
    #[must_use]
    pub fn ignoring(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.push(field.into());
        self
    }

    pub const fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    fn comparable<'a>(&self, payload: &'a Value) -> std::borrow::Cow<'a, Value> {
        match payload {
            Value::Object(map)
                if self
                    .ignored_fields
                    .iter()
                    .any(|field| map.contains_key(field)) =>
            {
                let mut stripped = map.clone();
                for field in &self.ignored_fields {
                    stripped.remove(field);
                }
                std::borrow::Cow::Owned(Value::Object(stripped))
            }
            _ => std::borrow::Cow::Borrowed(payload),
        }
    }
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::from(&MergePolicy::default())
    }
}

impl From<&MergePolicy> for ThresholdDetector {
    fn from(policy: &MergePolicy) -> Self {
        Self {
            threshold_ms: policy.threshold_ms,
            ignored_fields: policy.ignored_fields.clone(),
        }
    }
}

impl ConflictDetector for ThresholdDetector {
    fn payloads_equal(&self, a: &Record, b: &Record) -> bool {
        self.comparable(&a.payload) == self.comparable(&b.payload)
    }

    fn classify(&self, local: &Record, remote: &Record) -> Verdict {
        match (local.updated_at, remote.updated_at) {
            (Some(_), None) => Verdict::Winner(Side::Local),
            (None, Some(_)) => Verdict::Winner(Side::Remote),
            (None, None) => Verdict::NearTie,
            (Some(local_at), Some(remote_at)) => {
                let gap = local_at.abs_diff(remote_at);
                if gap <= self.threshold_ms {
                    Verdict::NearTie
                } else if local_at > remote_at {
                    Verdict::Winner(Side::Local)
                } else {
                    Verdict::Winner(Side::Remote)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(updated_at: Option<i64>, amount: i64) -> Record {
        Record {
            id: "1".into(),
            updated_at,
            payload: json!({"amount": amount, "balance_cache": amount * 10}),
        }
    }

    #[test]
    fn decisive_gap_picks_later_record() {
        let detector = ThresholdDetector::new(500);
        assert_eq!(
            detector.classify(&record(Some(0), 1), &record(Some(1_000), 2)),
            Verdict::Winner(Side::Remote)
        );
        assert_eq!(
            detector.classify(&record(Some(1_000), 1), &record(Some(0), 2)),
            Verdict::Winner(Side::Local)
        );
    }

    #[test]
    fn gap_at_threshold_is_near_tie() {
        let detector = ThresholdDetector::new(500);
        assert_eq!(
            detector.classify(&record(Some(0), 1), &record(Some(500), 2)),
            Verdict::NearTie
        );
        assert_eq!(
            detector.classify(&record(Some(0), 1), &record(Some(501), 2)),
            Verdict::Winner(Side::Remote)
        );
    }

    #[test]
    fn missing_timestamp_always_loses() {
        let detector = ThresholdDetector::new(500);
        assert_eq!(
            detector.classify(&record(None, 1), &record(Some(i64::MIN + 1), 2)),
            Verdict::Winner(Side::Remote)
        );
        assert_eq!(
            detector.classify(&record(Some(0), 1), &record(None, 2)),
            Verdict::Winner(Side::Local)
        );
        assert_eq!(
            detector.classify(&record(None, 1), &record(None, 2)),
            Verdict::NearTie
        );
    }

    #[test]
    fn ignored_fields_do_not_affect_equality() {
        let strict = ThresholdDetector::new(500);
        let lenient = ThresholdDetector::new(500).ignoring("balance_cache");

        let a = Record::with_id("1", 0, json!({"amount": 5, "balance_cache": 1}));
        let b = Record::with_id("1", 0, json!({"amount": 5, "balance_cache": 2}));

        assert!(!strict.payloads_equal(&a, &b));
        assert!(lenient.payloads_equal(&a, &b));
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let detector = ThresholdDetector::new(500);
        assert_eq!(
            detector.classify(&record(Some(i64::MIN), 1), &record(Some(i64::MAX), 2)),
            Verdict::Winner(Side::Remote)
        );
    }
}
