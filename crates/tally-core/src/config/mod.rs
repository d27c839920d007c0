//! Sync configuration.
//!
//! Provides `SyncConfig`, the single tuning surface for reconciliation:
//! scheduling cadence, network leg timeouts, retry backoff and the per
//! collection merge policies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::CollectionKey;

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_LEG_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_REMOTE_ATTEMPTS: u32 = 5;
const DEFAULT_NEAR_TIE_THRESHOLD_MS: u64 = 500;

/// Exponential backoff between retries of a failed network leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_ms: u64,
    /// Upper bound for any single delay
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }
}

/// How a collection decides between two divergent copies of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergePolicy {
    /// Timestamp gap at or below which divergent edits are a near-tie
    pub threshold_ms: u64,
    /// Top-level payload fields ignored when comparing payloads
    pub ignored_fields: Vec<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_NEAR_TIE_THRESHOLD_MS,
            ignored_fields: Vec::new(),
        }
    }
}

impl MergePolicy {
    /// Set the near-tie threshold
    #[must_use]
    pub const fn with_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.threshold_ms = threshold_ms;
        self
    }

    /// Ignore a volatile payload field during equality checks
    #[must_use]
    pub fn ignoring(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.push(field.into());
        self
    }
}

/// Configuration for the sync orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Seconds between scheduled cycles per collection (`None`: manual only)
    pub interval_secs: Option<u64>,
    /// Timeout for a single pull or push leg, in milliseconds
    pub leg_timeout_ms: u64,
    /// Retry backoff for failed legs
    pub backoff: BackoffPolicy,
    /// Attempts per leg before a `RemoteError` marks the collection degraded
    pub max_remote_attempts: u32,
    /// Merge policy for collections without an override
    pub default_policy: MergePolicy,
    /// Per-collection merge policy overrides
    pub policies: BTreeMap<CollectionKey, MergePolicy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_INTERVAL_SECS),
            leg_timeout_ms: DEFAULT_LEG_TIMEOUT_MS,
            backoff: BackoffPolicy::default(),
            max_remote_attempts: DEFAULT_MAX_REMOTE_ATTEMPTS,
            default_policy: MergePolicy::default(),
            policies: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidInput(format!("invalid sync config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = Some(interval.as_secs());
        self
    }

    /// Disable automatic sync (manual or triggered cycles only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.interval_secs = None;
        self
    }

    /// Set the per-leg network timeout
    #[must_use]
    pub fn with_leg_timeout(mut self, timeout: Duration) -> Self {
        self.leg_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry backoff
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry budget for remote rejections
    #[must_use]
    pub const fn with_max_remote_attempts(mut self, attempts: u32) -> Self {
        self.max_remote_attempts = attempts;
        self
    }

    /// Override the merge policy of one collection
    #[must_use]
    pub fn with_policy(mut self, collection: CollectionKey, policy: MergePolicy) -> Self {
        self.policies.insert(collection, policy);
        self
    }

    /// Automatic sync interval, if enabled
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub const fn leg_timeout(&self) -> Duration {
        Duration::from_millis(self.leg_timeout_ms)
    }

    /// Effective merge policy for a collection
    pub fn policy_for(&self, collection: CollectionKey) -> &MergePolicy {
        self.policies
            .get(&collection)
            .unwrap_or(&self.default_policy)
    }

    /// Reject settings that would stall or spin the scheduler
    pub fn validate(&self) -> Result<()> {
        if self.leg_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "leg_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.backoff.base_ms == 0 || self.backoff.cap_ms < self.backoff.base_ms {
            return Err(Error::InvalidInput(
                "backoff requires base_ms > 0 and cap_ms >= base_ms".to_string(),
            ));
        }
        if self.max_remote_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_remote_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
