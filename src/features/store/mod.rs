//! Local persistent store of application records.
//!
//! Every mutation is coupled with a sync queue append in one transaction.

pub mod local;
pub mod record;

pub use local::{LocalStore, Predicate, Records};
pub use record::Record;

/// Turn a `json!` object literal into record fields.
#[cfg(test)]
pub(crate) fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
