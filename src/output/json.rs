//! JSON output formatting for assessor-sync.
//!
//! This module provides functions for formatting store and queue data as JSON.

use serde::Serialize;
use serde_json::json;

use crate::error::SyncError;
use crate::features::store::Record;
use crate::features::sync::SyncQueueItem;

/// Format queue items as JSON
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_items_json(items: &[SyncQueueItem], list_name: &str) -> Result<String, SyncError> {
    let output = json!({
        "list": list_name,
        "count": items.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format records of one table as JSON
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_records_json(records: &[Record], table: &str) -> Result<String, SyncError> {
    let output = json!({
        "table": table,
        "count": records.len(),
        "items": records
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Serialize any value as pretty JSON.
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
