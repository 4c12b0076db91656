//! Durable operation queue.
//!
//! Append-only ordered log of mutations awaiting the remote backend. Items
//! leave the pending set only through [`SyncQueue::mark_synced`] and are
//! deleted only by [`SyncQueue::clear`]; synced items stay for audit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::operation::{validate_table_name, Operation, SyncQueueItem};
use crate::error::SyncError;
use crate::storage::Database;

const SELECT_COLUMNS: &str = r"SELECT id, created_at, synced_at, table_name, record_id,
                                      operation, record_data, attempts, last_attempt, error_message
                               FROM sync_queue";

/// Sync queue backed by the local database.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    /// Create a sync queue over the default database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self, SyncError> {
        Ok(Self::with_database(Database::open()?))
    }

    /// Create a sync queue with an existing database connection.
    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// Append an operation and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the insert fails.
    pub async fn append(
        &self,
        table_name: &str,
        operation: &Operation,
        payload: Option<&Value>,
        record_id: Option<&str>,
    ) -> Result<i64, SyncError> {
        let conn = self.db.lock().await;
        append_with(&conn, table_name, operation, payload, record_id)
    }

    /// All unsynced items in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn pending(&self) -> Result<Vec<SyncQueueItem>, SyncError> {
        let conn = self.db.lock().await;
        query_items(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE synced_at IS NULL ORDER BY id ASC"),
            [],
        )
    }

    /// Number of unsynced items.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        let conn = self.db.lock().await;
        count(&conn, "SELECT COUNT(*) FROM sync_queue WHERE synced_at IS NULL", [])
    }

    /// Mark items as synced. Ids that are already synced or unknown are
    /// skipped, so repeating a call is harmless.
    ///
    /// Returns the number of items that transitioned to synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails; no item is marked in that case.
    pub async fn mark_synced(&self, ids: &[i64]) -> Result<usize, SyncError> {
        self.complete_pass(ids, &[]).await
    }

    /// Record one failed attempt for each `(id, message)` pair.
    ///
    /// Increments `attempts` and stores the message. Synced items are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails; no attempt is recorded in that case.
    pub async fn record_failures(&self, failures: &[(i64, String)]) -> Result<(), SyncError> {
        self.complete_pass(&[], failures).await.map(|_| ())
    }

    /// Apply the outcome of a sync pass: mark `synced` ids and record one
    /// attempt per failure, in a single transaction.
    ///
    /// Returns the number of items that transitioned to synced.
    ///
    /// # Errors
    ///
    /// Returns an error if any update fails; nothing is written in that case.
    pub async fn complete_pass(
        &self,
        synced: &[i64],
        failures: &[(i64, String)],
    ) -> Result<usize, SyncError> {
        if synced.is_empty() && failures.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| SyncError::Database(format!("Failed to begin transaction: {e}")))?;

        let now = Utc::now().to_rfc3339();
        let mut marked = 0;
        for id in synced {
            marked += tx
                .execute(
                    "UPDATE sync_queue SET synced_at = ?1 WHERE id = ?2 AND synced_at IS NULL",
                    params![now, id],
                )
                .map_err(|e| SyncError::Database(format!("Failed to mark item {id} synced: {e}")))?;
        }

        for (id, message) in failures {
            tx.execute(
                r"UPDATE sync_queue SET
                  attempts = attempts + 1,
                  last_attempt = ?1,
                  error_message = ?2
                  WHERE id = ?3 AND synced_at IS NULL",
                params![now, message, id],
            )
            .map_err(|e| SyncError::Database(format!("Failed to record attempt for {id}: {e}")))?;
        }

        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit sync results: {e}")))?;

        debug!(
            requested = synced.len(),
            marked,
            failed = failures.len(),
            "Applied sync results"
        );
        Ok(marked)
    }

    /// Unsynced items that have failed at least `threshold` times.
    ///
    /// Read-only: the items stay pending and keep being retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn failed_items(&self, threshold: u32) -> Result<Vec<SyncQueueItem>, SyncError> {
        let conn = self.db.lock().await;
        query_items(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE synced_at IS NULL AND attempts >= ?1 ORDER BY id ASC"),
            [threshold],
        )
    }

    /// Get a specific item by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<SyncQueueItem>, SyncError> {
        let conn = self.db.lock().await;
        conn.query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_item)
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to query queue item: {e}")))
    }

    /// Most recent items in any state, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SyncQueueItem>, SyncError> {
        let conn = self.db.lock().await;
        query_items(
            &conn,
            &format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"),
            [limit],
        )
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn stats(&self, stuck_threshold: u32) -> Result<QueueStats, SyncError> {
        let conn = self.db.lock().await;

        let pending = count(&conn, "SELECT COUNT(*) FROM sync_queue WHERE synced_at IS NULL", [])?;
        let synced = count(
            &conn,
            "SELECT COUNT(*) FROM sync_queue WHERE synced_at IS NOT NULL",
            [],
        )?;
        let stuck = count(
            &conn,
            "SELECT COUNT(*) FROM sync_queue WHERE synced_at IS NULL AND attempts >= ?1",
            [stuck_threshold],
        )?;

        let oldest_pending: Option<String> = conn
            .query_row(
                "SELECT created_at FROM sync_queue WHERE synced_at IS NULL ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to get oldest pending: {e}")))?;

        Ok(QueueStats {
            pending,
            synced,
            stuck,
            stuck_threshold,
            oldest_pending: oldest_pending.as_deref().and_then(parse_timestamp),
        })
    }

    /// Purge every entry, synced or not.
    ///
    /// Administrative only; normal synchronization never calls this.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self) -> Result<usize, SyncError> {
        let conn = self.db.lock().await;
        conn.execute("DELETE FROM sync_queue", [])
            .map_err(|e| SyncError::Database(format!("Failed to clear queue: {e}")))
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Number of unsynced items
    pub pending: usize,
    /// Number of synced items kept for audit
    pub synced: usize,
    /// Number of pending items at or above the stuck threshold
    pub stuck: usize,
    /// Threshold used for `stuck`
    pub stuck_threshold: u32,
    /// Creation time of the oldest pending item
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Append an item on an existing connection or open transaction.
///
/// The local store calls this inside the transaction that writes the record,
/// so the mutation and its queue item commit or roll back together.
pub(crate) fn append_with(
    conn: &Connection,
    table_name: &str,
    operation: &Operation,
    payload: Option<&Value>,
    record_id: Option<&str>,
) -> Result<i64, SyncError> {
    validate_table_name(table_name)?;

    let record_data = payload.map(Value::to_string);
    conn.execute(
        r"INSERT INTO sync_queue (created_at, table_name, record_id, operation, record_data, attempts)
          VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            Utc::now().to_rfc3339(),
            table_name,
            record_id,
            operation.as_str(),
            record_data,
        ],
    )
    .map_err(|e| SyncError::Database(format!("Failed to enqueue operation: {e}")))?;

    let id = conn.last_insert_rowid();
    debug!(id, table = table_name, operation = operation.as_str(), "Enqueued operation");
    Ok(id)
}

fn query_items<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<SyncQueueItem>, SyncError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params, row_to_item)
        .map_err(|e| SyncError::Database(format!("Failed to query sync queue: {e}")))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
    }

    Ok(items)
}

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<usize, SyncError> {
    let n: i64 = conn
        .query_row(sql, params, |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to count queue items: {e}")))?;

    usize::try_from(n).map_err(|e| SyncError::Database(format!("Invalid queue count {n}: {e}")))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn row_to_item(row: &Row<'_>) -> Result<SyncQueueItem, rusqlite::Error> {
    let created_at_str: String = row.get(1)?;
    let synced_at_str: Option<String> = row.get(2)?;
    let operation_str: String = row.get(5)?;
    let record_data_str: Option<String> = row.get(6)?;
    let last_attempt_str: Option<String> = row.get(8)?;

    let record_data = record_data_str
        .map(|s| serde_json::from_str::<Value>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(SyncQueueItem {
        id: row.get(0)?,
        created_at,
        synced_at: synced_at_str.as_deref().and_then(parse_timestamp),
        table_name: row.get(3)?,
        record_id: row.get(4)?,
        operation: Operation::parse(&operation_str),
        record_data,
        attempts: row.get(7)?,
        last_attempt: last_attempt_str.as_deref().and_then(parse_timestamp),
        error_message: row.get(9)?,
    })
}
