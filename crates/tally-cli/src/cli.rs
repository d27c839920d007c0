use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tally_core::models::ResolutionChoice;
use tally_core::CollectionKey;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Reconcile Tally finance records with the sync server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync server base URL (overrides TALLY_REMOTE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub remote_url: Option<String>,

    /// Path to a JSON sync configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation cycle and exit
    Sync {
        /// Only reconcile this collection
        #[arg(long)]
        collection: Option<CollectionKey>,
    },
    /// Keep syncing in the background and stream conflicts until Ctrl-C
    Watch {
        /// User the session belongs to
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// List conflicts waiting for a decision
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending conflict
    Resolve {
        /// Collection of the record
        collection: CollectionKey,
        /// Record ID
        id: String,
        /// Which copy to keep
        #[arg(long, value_enum)]
        choice: ChoiceArg,
    },
    /// Create or replace a record from a JSON payload
    Put {
        /// Target collection
        collection: CollectionKey,
        /// Record payload as a JSON object
        payload: String,
        /// Record ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// List the local records of a collection
    List {
        /// Collection to list
        collection: CollectionKey,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChoiceArg {
    Local,
    Remote,
}

impl From<ChoiceArg> for ResolutionChoice {
    fn from(choice: ChoiceArg) -> Self {
        match choice {
            ChoiceArg::Local => Self::Local,
            ChoiceArg::Remote => Self::Remote,
        }
    }
}
