//! Output formatting for assessor-sync.
//!
//! This module provides formatters for displaying records and queue state in
//! various formats.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::features::store::Record;
use crate::features::sync::{QueueStats, SyncQueueItem, SyncReport};

pub use json::*;
pub use pretty::*;

/// Format queue items based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_items(
    items: &[SyncQueueItem],
    title: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_items_pretty(items, title)),
        OutputFormat::Json => format_items_json(items, title),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => to_json(stats),
    }
}

/// Format a sync pass result based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_report(report: &SyncReport, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_report_pretty(report)),
        OutputFormat::Json => to_json(report),
    }
}

/// Format records of one table based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_records(
    records: &[Record],
    table: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_records_pretty(records, table)),
        OutputFormat::Json => format_records_json(records, table),
    }
}

/// Format a single record based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_record(record: &Record, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_record_pretty(record)),
        OutputFormat::Json => to_json(record),
    }
}
