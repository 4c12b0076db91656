//! Error types for assessor-sync.

use thiserror::Error;

/// Errors produced by the local store, the operation queue and the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The referenced record does not exist. No queue item was appended.
    #[error("Record not found: {table}/{id}")]
    NotFound {
        /// Table the lookup ran against.
        table: String,
        /// Missing record id.
        id: String,
    },

    /// Local durable storage failed to read or write.
    #[error("Database error: {0}")]
    Database(String),

    /// The remote backend rejected or failed a call.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A queue item carries an operation kind outside insert/update/delete.
    #[error("Unknown operation '{0}' in sync queue")]
    UnknownOperation(String),

    /// A queue item lacks the record id or payload its operation needs.
    #[error("Invalid queue item: {0}")]
    InvalidItem(String),

    /// Record input that is not a JSON object.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Table name rejected by validation.
    #[error("Invalid table name: '{0}'")]
    InvalidTable(String),

    /// A synchronization pass is already running.
    #[error("A synchronization pass is already running")]
    SyncInProgress,

    /// Configuration could not be loaded, saved or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Shorthand for a [`SyncError::NotFound`].
    pub fn not_found(table: &str, id: &str) -> Self {
        Self::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether this error means the operation could succeed on a later pass.
    ///
    /// Corrupt queue items are not retryable; an operator has to clear them.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownOperation(_) | Self::InvalidItem(_))
    }
}
