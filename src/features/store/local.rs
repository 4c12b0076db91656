//! Local persistent store.
//!
//! Records live in the `records` table keyed by (table name, id). Every
//! mutation appends its queue item inside the same transaction, so a record
//! change is never visible without the item that will replay it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::record::{id_from_fields, strip_reserved, Record};
use crate::error::SyncError;
use crate::features::sync::operation::{validate_table_name, Operation};
use crate::features::sync::queue::{append_with, SyncQueue};
use crate::storage::Database;

/// Predicate applied by [`LocalStore::query`].
pub type Predicate<'a> = &'a (dyn Fn(&Record) -> bool + Sync);

/// Finite, consume-once iterator over a query's snapshot.
#[derive(Debug)]
pub struct Records {
    inner: std::vec::IntoIter<Record>,
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Records {}

/// Local store of records with queue coupling.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Open the store over the default database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self, SyncError> {
        Ok(Self::new(Database::open()?))
    }

    /// Create a store over an existing database.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// The operation queue sharing this store's database.
    #[must_use]
    pub fn queue(&self) -> SyncQueue {
        SyncQueue::with_database(self.db.clone())
    }

    /// Create or overwrite a record and enqueue an `insert`.
    ///
    /// The id is `id` if given, else an `id` string or number inside
    /// `fields`, else a fresh UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the write (record or
    /// queue item) fails; nothing is persisted in that case.
    pub async fn put(
        &self,
        table: &str,
        mut fields: Map<String, Value>,
        id: Option<&str>,
    ) -> Result<Record, SyncError> {
        validate_table_name(table)?;

        let id = id
            .map(str::to_string)
            .or_else(|| id_from_fields(&fields))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        strip_reserved(&mut fields);

        let record = Record {
            id,
            last_updated: Utc::now(),
            fields,
        };

        let mut conn = self.db.lock().await;
        let tx = begin(&mut conn)?;
        write_record(&tx, table, &record)?;
        append_with(
            &tx,
            table,
            &Operation::Insert,
            Some(&record.to_value()?),
            Some(&record.id),
        )?;
        commit(tx)?;

        debug!(table, id = %record.id, "Put record");
        Ok(record)
    }

    /// Shallow-merge `partial` into an existing record and enqueue an `update`.
    ///
    /// `id` and `lastUpdated` keys in `partial` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] (and enqueues nothing) if the record
    /// does not exist, or an error if the write fails.
    pub async fn update(
        &self,
        table: &str,
        id: &str,
        mut partial: Map<String, Value>,
    ) -> Result<Record, SyncError> {
        validate_table_name(table)?;
        strip_reserved(&mut partial);

        let mut conn = self.db.lock().await;
        let tx = begin(&mut conn)?;

        let mut record = load(&tx, table, id)?.ok_or_else(|| SyncError::not_found(table, id))?;
        record.fields.extend(partial);
        record.last_updated = Utc::now();

        write_record(&tx, table, &record)?;
        append_with(
            &tx,
            table,
            &Operation::Update,
            Some(&record.to_value()?),
            Some(id),
        )?;
        commit(tx)?;

        debug!(table, id, "Updated record");
        Ok(record)
    }

    /// Delete a record and enqueue a `delete` carrying its last state.
    ///
    /// Returns the deleted record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] (and enqueues nothing) if the record
    /// does not exist, or an error if the write fails.
    pub async fn delete(&self, table: &str, id: &str) -> Result<Record, SyncError> {
        validate_table_name(table)?;

        let mut conn = self.db.lock().await;
        let tx = begin(&mut conn)?;

        let record = load(&tx, table, id)?.ok_or_else(|| SyncError::not_found(table, id))?;
        tx.execute(
            "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
            params![table, id],
        )
        .map_err(|e| SyncError::Database(format!("Failed to delete record: {e}")))?;
        append_with(
            &tx,
            table,
            &Operation::Delete,
            Some(&record.to_value()?),
            Some(id),
        )?;
        commit(tx)?;

        debug!(table, id, "Deleted record");
        Ok(record)
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if it does not exist.
    pub async fn get(&self, table: &str, id: &str) -> Result<Record, SyncError> {
        validate_table_name(table)?;
        let conn = self.db.lock().await;
        load(&conn, table, id)?.ok_or_else(|| SyncError::not_found(table, id))
    }

    /// Records of `table` in insertion order, filtered by `predicate`, then
    /// truncated to `limit`.
    ///
    /// The result is a snapshot; later writes do not affect it.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the read fails.
    pub async fn query(
        &self,
        table: &str,
        predicate: Option<Predicate<'_>>,
        limit: Option<usize>,
    ) -> Result<Records, SyncError> {
        validate_table_name(table)?;

        let rows = {
            let conn = self.db.lock().await;
            load_all(&conn, table)?
        };

        let matched: Vec<Record> = rows
            .into_iter()
            .filter(|record| predicate.map_or(true, |p| p(record)))
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(Records {
            inner: matched.into_iter(),
        })
    }

    /// Number of records in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the read fails.
    pub async fn count(&self, table: &str) -> Result<usize, SyncError> {
        validate_table_name(table)?;
        let conn = self.db.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count records: {e}")))?;

        usize::try_from(n).map_err(|e| SyncError::Database(format!("Invalid record count {n}: {e}")))
    }
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>, SyncError> {
    conn.transaction()
        .map_err(|e| SyncError::Database(format!("Failed to begin transaction: {e}")))
}

fn commit(tx: Transaction<'_>) -> Result<(), SyncError> {
    tx.commit()
        .map_err(|e| SyncError::Database(format!("Failed to commit transaction: {e}")))
}

fn write_record(conn: &Connection, table: &str, record: &Record) -> Result<(), SyncError> {
    let data = Value::Object(record.fields.clone()).to_string();
    conn.execute(
        r"INSERT INTO records (table_name, id, data, last_updated)
          VALUES (?1, ?2, ?3, ?4)
          ON CONFLICT (table_name, id) DO UPDATE SET
              data = excluded.data,
              last_updated = excluded.last_updated",
        params![table, record.id, data, record.last_updated.to_rfc3339()],
    )
    .map_err(|e| SyncError::Database(format!("Failed to write record: {e}")))?;
    Ok(())
}

fn load(conn: &Connection, table: &str, id: &str) -> Result<Option<Record>, SyncError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, data, last_updated FROM records WHERE table_name = ?1 AND id = ?2",
            params![table, id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|e| SyncError::Database(format!("Failed to read record: {e}")))?;

    row.map(|(id, data, last_updated)| decode(table, id, &data, &last_updated))
        .transpose()
}

// Upserts keep the original rowid, so rowid order is first-insertion order.
fn load_all(conn: &Connection, table: &str) -> Result<Vec<Record>, SyncError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, data, last_updated FROM records WHERE table_name = ?1 ORDER BY rowid",
        )
        .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| SyncError::Database(format!("Failed to query records: {e}")))?;

    let mut records = Vec::new();
    for row in rows {
        let (id, data, last_updated) = row.map_err(|e| SyncError::Database(e.to_string()))?;
        records.push(decode(table, id, &data, &last_updated)?);
    }

    Ok(records)
}

fn decode(table: &str, id: String, data: &str, last_updated: &str) -> Result<Record, SyncError> {
    let fields = match serde_json::from_str(data) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => {
            return Err(SyncError::Database(format!(
                "Corrupt data for record {table}/{id}"
            )))
        }
    };

    let last_updated = DateTime::parse_from_rfc3339(last_updated)
        .map_err(|e| SyncError::Database(format!("Corrupt timestamp for record {table}/{id}: {e}")))?
        .with_timezone(&Utc);

    Ok(Record {
        id,
        last_updated,
        fields,
    })
}
