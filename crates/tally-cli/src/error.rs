use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid record payload: {0}")]
    InvalidPayload(String),
    #[error(
        "Sync is not configured. Pass --remote-url or set TALLY_REMOTE_URL (and TALLY_REMOTE_TOKEN if the server requires one)."
    )]
    SyncNotConfigured,
    #[error("Sync failed for {0} collection(s)")]
    SyncFailed(usize),
}
