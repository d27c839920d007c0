use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::Value;
use tally_core::config::SyncConfig;
use tally_core::db::SqliteLocalStore;
use tally_core::models::ResolutionChoice;
use tally_core::remote::HttpRemoteStore;
use tally_core::store::LocalStore;
use tally_core::sync::{CollectionStatus, Connectivity, CycleOutcome, SyncHealth, SyncOrchestrator};
use tally_core::util::{compact_text, normalize_text_option};
use tally_core::{CollectionKey, Conflict, Record};

use crate::error::CliError;

pub const REMOTE_URL_ENV: &str = "TALLY_REMOTE_URL";
pub const REMOTE_TOKEN_ENV: &str = "TALLY_REMOTE_TOKEN";

/// Flags shared by every subcommand
pub struct Globals {
    pub db_path: PathBuf,
    pub remote_url: Option<String>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub collection: CollectionKey,
    pub record_id: String,
    pub reason: String,
    pub detected_at: i64,
    pub local_updated_at: Option<i64>,
    pub remote_updated_at: Option<i64>,
    pub local: Value,
    pub remote: Value,
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("tally").join("tally.db"))
        .ok_or_else(|| {
            CliError::Config("Failed to resolve data directory; pass --db-path".to_string())
        })
}

pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    explicit.map_or_else(default_db_path, Ok)
}

/// Flag value first, then the environment
pub fn resolve_remote_url(flag: Option<String>, env_value: Option<String>) -> Option<String> {
    normalize_text_option(flag).or_else(|| normalize_text_option(env_value))
}

pub fn load_sync_config(path: Option<&Path>) -> Result<SyncConfig, CliError> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|error| {
        CliError::Config(format!("Failed to read {}: {error}", path.display()))
    })?;
    Ok(SyncConfig::from_json(&raw)?)
}

pub fn open_store(db_path: &Path) -> Result<Arc<SqliteLocalStore>, CliError> {
    Ok(Arc::new(SqliteLocalStore::open(db_path)?))
}

pub fn build_orchestrator(globals: &Globals) -> Result<SyncOrchestrator, CliError> {
    let remote_url = resolve_remote_url(
        globals.remote_url.clone(),
        std::env::var(REMOTE_URL_ENV).ok(),
    )
    .ok_or(CliError::SyncNotConfigured)?;
    let token = std::env::var(REMOTE_TOKEN_ENV).ok();

    let config = load_sync_config(globals.config_path.as_deref())?;
    let store = open_store(&globals.db_path)?;
    let remote = Arc::new(HttpRemoteStore::new(remote_url, token)?);

    Ok(SyncOrchestrator::new(
        store,
        remote,
        config,
        Connectivity::default(),
    )?)
}

/// Pending conflicts of every collection, oldest first
pub fn load_pending_conflicts(store: &dyn LocalStore) -> Result<Vec<Conflict>, CliError> {
    let mut conflicts = Vec::new();
    for key in CollectionKey::ALL {
        conflicts.extend(store.load_conflicts(key)?);
    }
    conflicts.sort_by_key(|conflict| conflict.detected_at);
    Ok(conflicts)
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if !value.is_object() {
        return Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

pub fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(
            || "-".to_string(),
            |time| time.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
}

pub fn format_record_line(record: &Record) -> String {
    format!(
        "{}  {}  {}",
        record.id,
        format_timestamp(record.updated_at),
        compact_text(&record.payload.to_string())
    )
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        collection: conflict.collection,
        record_id: conflict.record_id.to_string(),
        reason: conflict.reason.as_str().to_string(),
        detected_at: conflict.detected_at,
        local_updated_at: conflict.local.updated_at,
        remote_updated_at: conflict.remote.updated_at,
        local: conflict.local.payload.clone(),
        remote: conflict.remote.payload.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .flat_map(|conflict| {
            [
                format!(
                    "{}/{}  {}  detected {}",
                    conflict.collection,
                    conflict.record_id,
                    conflict.reason.as_str(),
                    format_timestamp(Some(conflict.detected_at))
                ),
                format!(
                    "  local  {}  {}",
                    format_timestamp(conflict.local.updated_at),
                    compact_text(&conflict.local.payload.to_string())
                ),
                format!(
                    "  remote {}  {}",
                    format_timestamp(conflict.remote.updated_at),
                    compact_text(&conflict.remote.payload.to_string())
                ),
            ]
        })
        .collect()
}

pub fn format_outcome_line(collection: CollectionKey, outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Completed(report) => {
            let mut line = format!(
                "{collection}: {} merged, {} pushed",
                report.merged, report.pushed
            );
            if report.conflicts > 0 {
                line.push_str(&format!(
                    ", {} conflict(s) ({} new)",
                    report.conflicts, report.new_conflicts
                ));
            }
            if report.superseded > 0 {
                line.push_str(&format!(", {} superseded", report.superseded));
            }
            line
        }
        CycleOutcome::Coalesced => format!("{collection}: already syncing"),
        CycleOutcome::Cancelled => format!("{collection}: cancelled"),
        CycleOutcome::Failed(failure) => format!("{collection}: failed ({failure})"),
    }
}

pub fn format_status_line(collection: CollectionKey, status: &CollectionStatus) -> String {
    let health = match &status.health {
        SyncHealth::Healthy => "healthy".to_string(),
        SyncHealth::Degraded(reason) => format!("degraded: {reason}"),
    };
    format!(
        "{collection}: {} ({health}), last synced {}, {} pending conflict(s)",
        status.phase,
        format_timestamp(status.last_synced_at),
        status.pending_conflicts
    )
}

pub const fn choice_label(choice: ResolutionChoice) -> &'static str {
    match choice {
        ResolutionChoice::Local => "local",
        ResolutionChoice::Remote => "remote",
    }
}
