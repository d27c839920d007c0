use std::sync::Arc;

use tally_core::conflicts::{ConflictNotifier, ResolutionApplier};
use tally_core::models::ResolutionChoice;
use tally_core::store::{LocalStore, WriterLocks};
use tally_core::{CollectionKey, RecordId};

use crate::commands::common::{
    choice_label, conflict_to_item, format_conflict_lines, load_pending_conflicts,
    load_sync_config, open_store, ConflictItem, Globals,
};
use crate::error::CliError;

pub fn run_conflicts(as_json: bool, globals: &Globals) -> Result<(), CliError> {
    let store = open_store(&globals.db_path)?;
    let conflicts = load_pending_conflicts(store.as_ref())?;

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No pending conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_resolve(
    collection: CollectionKey,
    id: &str,
    choice: ResolutionChoice,
    globals: &Globals,
) -> Result<(), CliError> {
    let config = load_sync_config(globals.config_path.as_deref())?;
    let store = open_store(&globals.db_path)?;

    let notifier = Arc::new(ConflictNotifier::new());
    notifier.restore(store.load_conflicts(collection)?);

    let applier = ResolutionApplier::new(
        store,
        Arc::new(WriterLocks::new()),
        notifier,
        Arc::new(config),
    );
    let record = applier.resolve_by_id(collection, &RecordId::from(id.trim()), choice)?;

    println!(
        "Resolved {collection}/{} keeping the {} copy; it will be pushed on the next sync.",
        record.id,
        choice_label(choice)
    );
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
