use std::collections::HashMap;

use tally_core::sync::{CycleOutcome, SyncPhase};
use tally_core::CollectionKey;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{
    build_orchestrator, format_outcome_line, format_status_line, Globals,
};
use crate::error::CliError;

pub async fn run_sync(
    collection: Option<CollectionKey>,
    globals: &Globals,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(globals)?;
    orchestrator.restore_conflicts();

    let outcomes = match collection {
        Some(key) => vec![(key, orchestrator.sync_once(key).await?)],
        None => orchestrator.sync_all_once().await,
    };

    let mut failures = 0;
    for (key, outcome) in &outcomes {
        println!("{}", format_outcome_line(*key, outcome));
        if matches!(outcome, CycleOutcome::Failed(_)) {
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(CliError::SyncFailed(failures));
    }
    Ok(())
}

pub async fn run_watch(user: &str, globals: &Globals) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(globals)?;
    let mut events = orchestrator.notifier().subscribe();
    let mut statuses = orchestrator.watch_status();

    orchestrator.start(user)?;
    eprintln!("Watching for changes. Press Ctrl-C to stop.");

    let mut last_printed: HashMap<CollectionKey, String> = HashMap::new();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {missed} conflict event(s)");
                }
                Err(RecvError::Closed) => break,
            },
            changed = statuses.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = statuses.borrow_and_update().clone();
                for (key, status) in snapshot {
                    if matches!(
                        status.phase,
                        SyncPhase::Pulling | SyncPhase::Merging | SyncPhase::Persisting | SyncPhase::Pushing
                    ) {
                        continue;
                    }
                    let Some(status) = orchestrator.status(key) else {
                        continue;
                    };
                    let line = format_status_line(key, &status);
                    if last_printed.get(&key) != Some(&line) {
                        println!("{line}");
                        last_printed.insert(key, line);
                    }
                }
            }
        }
    }

    orchestrator.stop().await;
    Ok(())
}
