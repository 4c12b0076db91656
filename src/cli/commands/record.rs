//! Local record commands.

use crate::cli::args::{OutputFormat, RecordCommands};
use crate::error::SyncError;
use crate::features::store::{LocalStore, Predicate, Record};
use crate::output::{format_record, format_records, to_json};

/// Execute record subcommands.
///
/// # Errors
///
/// Returns an error if the JSON input is not an object, the record does not
/// exist, or the store fails.
pub async fn record(
    store: &LocalStore,
    cmd: RecordCommands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match cmd {
        RecordCommands::Put { table, json, id } => {
            let fields = Record::parse_fields(&json)?;
            let record = store.put(&table, fields, id.as_deref()).await?;
            written(&record, &format!("Saved {table}/{}", record.id), format)
        }
        RecordCommands::Get { table, id } => {
            let record = store.get(&table, &id).await?;
            format_record(&record, format)
        }
        RecordCommands::Update { table, id, json } => {
            let partial = Record::parse_fields(&json)?;
            let record = store.update(&table, &id, partial).await?;
            written(&record, &format!("Updated {table}/{id}"), format)
        }
        RecordCommands::Delete { table, id } => {
            let record = store.delete(&table, &id).await?;
            written(&record, &format!("Deleted {table}/{id}"), format)
        }
        RecordCommands::Query {
            table,
            filters,
            limit,
        } => {
            let matches_all = |r: &Record| filters.iter().all(|(k, v)| r.field_matches(k, v));
            let predicate: Option<Predicate<'_>> = if filters.is_empty() {
                None
            } else {
                Some(&matches_all)
            };

            let records: Vec<Record> = store.query(&table, predicate, limit).await?.collect();
            format_records(&records, &table, format)
        }
    }
}

fn written(record: &Record, message: &str, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Json => to_json(record),
        OutputFormat::Pretty => Ok(format!("{message} (queued for sync)")),
    }
}
