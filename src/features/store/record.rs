//! Record type for the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Keys owned by the store rather than the caller.
const RESERVED_KEYS: [&str; 2] = ["id", "lastUpdated"];

/// An application entity held in a table.
///
/// Serializes as one flat JSON object: `id` and `lastUpdated` sit alongside
/// the caller's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Record id, unique within its table.
    pub id: String,
    /// Stamped by the store on every write.
    pub last_updated: DateTime<Utc>,
    /// Caller-defined fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Parse a JSON object into record fields.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Json`] for malformed JSON and
    /// [`SyncError::InvalidRecord`] if the value is not an object.
    pub fn parse_fields(json: &str) -> Result<Map<String, Value>, SyncError> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(fields) => Ok(fields),
            other => Err(SyncError::InvalidRecord(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Get a field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether `key` holds `expected`, comparing strings without their quotes.
    #[must_use]
    pub fn field_matches(&self, key: &str, expected: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::String(s)) => s == expected,
            Some(other) => other.to_string() == expected,
            None => false,
        }
    }

    /// The record as a single JSON value, as sent to the remote backend.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Take the id out of caller-supplied fields, if it holds a string or number.
pub(crate) fn id_from_fields(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Drop the store-owned keys from caller-supplied fields.
pub(crate) fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
}
