//! Operation types for the sync queue.
//!
//! Defines the operation kinds that can be queued and the queue item itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::SyncError;

/// Check that a table name is usable as a storage key and URL segment.
///
/// Names must be non-empty and contain only ASCII letters, digits, `_` or `-`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidTable`] for any other name.
pub fn validate_table_name(name: &str) -> Result<(), SyncError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidTable(name.to_string()))
    }
}

/// Kind of mutation a queue item replays against the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A record was created (or overwritten) locally.
    Insert,
    /// A record was partially updated locally; the payload is the merged record.
    Update,
    /// A record was deleted locally; the payload is the pre-deletion snapshot.
    Delete,
    /// An operation string this build does not understand.
    ///
    /// Only produced when reading rows back from disk. Such items can never be
    /// dispatched and need operator attention.
    Unknown(String),
}

impl Operation {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown(raw) => raw,
        }
    }

    /// Parse the storage representation. Never fails; unrecognised values
    /// become [`Operation::Unknown`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Get the display name for this operation.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the engine knows how to dispatch this operation.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// A queued mutation awaiting the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Monotonically increasing id assigned on append.
    pub id: i64,
    /// When the item was appended.
    pub created_at: DateTime<Utc>,
    /// When the item was confirmed by the backend. Set once, never cleared.
    pub synced_at: Option<DateTime<Utc>>,
    /// Table (collection) the mutation applies to.
    pub table_name: String,
    /// Id of the mutated record.
    pub record_id: Option<String>,
    /// Mutation kind.
    pub operation: Operation,
    /// Full record snapshot at enqueue time.
    pub record_data: Option<Value>,
    /// Number of passes in which this item was attempted and failed.
    pub attempts: u32,
    /// When the item last failed.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Error message from the most recent failed attempt.
    pub error_message: Option<String>,
}

impl SyncQueueItem {
    /// Whether the item has been confirmed by the backend.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }

    /// Whether the item is pending and has failed at least `threshold` times.
    #[must_use]
    pub const fn is_stuck(&self, threshold: u32) -> bool {
        !self.is_synced() && self.attempts >= threshold
    }

    /// Short human-readable target, e.g. `parcels/p-17`.
    #[must_use]
    pub fn target(&self) -> String {
        match &self.record_id {
            Some(id) => format!("{}/{id}", self.table_name),
            None => self.table_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(attempts: u32, synced: bool) -> SyncQueueItem {
        SyncQueueItem {
            id: 1,
            created_at: Utc::now(),
            synced_at: synced.then(Utc::now),
            table_name: "parcels".to_string(),
            record_id: Some("p-1".to_string()),
            operation: Operation::Insert,
            record_data: None,
            attempts,
            last_attempt: None,
            error_message: None,
        }
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("insert"), Operation::Insert);
        assert_eq!(Operation::parse("update"), Operation::Update);
        assert_eq!(Operation::parse("delete"), Operation::Delete);
        assert_eq!(
            Operation::parse("merge"),
            Operation::Unknown("merge".to_string())
        );
        assert!(!Operation::parse("merge").is_known());
        assert_eq!(Operation::parse("merge").as_str(), "merge");
    }

    #[test]
    fn test_operation_serializes_as_plain_string() {
        let json = serde_json::to_string(&Operation::Delete).unwrap();
        assert_eq!(json, "\"delete\"");

        let op: Operation = serde_json::from_str("\"upsert\"").unwrap();
        assert_eq!(op, Operation::Unknown("upsert".to_string()));
    }

    #[test]
    fn test_stuck_classification() {
        assert!(!item(2, false).is_stuck(3));
        assert!(item(3, false).is_stuck(3));
        // Synced items are never stuck, whatever their history
        assert!(!item(5, true).is_stuck(3));
    }

    #[test]
    fn test_item_json_is_camel_case() {
        let json = serde_json::to_value(item(0, false)).unwrap();
        assert_eq!(json["tableName"], "parcels");
        assert_eq!(json["recordId"], "p-1");
        assert_eq!(json["operation"], "insert");
        assert!(json["syncedAt"].is_null());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("parcels").is_ok());
        assert!(validate_table_name("levy_rates-2024").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("parcels/1").is_err());
        assert!(validate_table_name("income valuations").is_err());
    }

    #[test]
    fn test_target() {
        let mut it = item(0, false);
        assert_eq!(it.target(), "parcels/p-1");
        it.record_id = None;
        assert_eq!(it.target(), "parcels");
    }
}
