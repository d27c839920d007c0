use std::sync::Arc;

use tally_core::store::{LocalRecords, WriterLocks};
use tally_core::util::normalize_text_option;
use tally_core::{CollectionKey, RecordId};

use crate::commands::common::{format_record_line, open_store, parse_payload, Globals};
use crate::error::CliError;

fn local_records(globals: &Globals) -> Result<LocalRecords, CliError> {
    let store = open_store(&globals.db_path)?;
    Ok(LocalRecords::new(store, Arc::new(WriterLocks::new())))
}

pub fn run_put(
    collection: CollectionKey,
    payload: &str,
    id: Option<String>,
    globals: &Globals,
) -> Result<(), CliError> {
    let payload = parse_payload(payload)?;
    let id = normalize_text_option(id).map(RecordId::from);

    let record = local_records(globals)?.put(collection, id, payload)?;
    println!("{}", record.id);
    Ok(())
}

pub fn run_list(collection: CollectionKey, as_json: bool, globals: &Globals) -> Result<(), CliError> {
    let records = local_records(globals)?.list(collection)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {collection} records.");
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record_line(record));
    }
    Ok(())
}
