//! Tally CLI - reconcile local finance records with the sync server
//!
//! One-shot `sync` for scripts and cron, `watch` for a long-running session
//! that streams conflicts as they are detected.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::filter::Directive;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_db_path, Globals};
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::records::{run_list, run_put};
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive: Directive = "tally=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let globals = Globals {
        db_path: resolve_db_path(cli.db_path)?,
        remote_url: cli.remote_url,
        config_path: cli.config,
    };

    match cli.command {
        Commands::Sync { collection } => run_sync(collection, &globals).await?,
        Commands::Watch { user } => run_watch(&user, &globals).await?,
        Commands::Conflicts { json } => run_conflicts(json, &globals)?,
        Commands::Resolve {
            collection,
            id,
            choice,
        } => run_resolve(collection, &id, choice.into(), &globals)?,
        Commands::Put {
            collection,
            payload,
            id,
        } => run_put(collection, &payload, id, &globals)?,
        Commands::List { collection, json } => run_list(collection, json, &globals)?,
    }

    Ok(())
}
