//! The record abstraction shared by every collection.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::util::timestamp_from_json;

/// Field name used for last-write-wins comparisons.
pub const UPDATED_AT: &str = "updatedAt";

/// A persisted entity keyed by a globally unique string id.
pub trait Record {
    /// Unique identifier within the owning collection.
    fn id(&self) -> &str;

    /// Timestamp stored under `field`, if the record defines one.
    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>>;

    /// Last modification time. Records without one are never compared.
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp(UPDATED_AT)
    }
}

/// Opaque JSON records, as exchanged on the wire and stored by the server.
impl Record for Value {
    fn id(&self) -> &str {
        self.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(timestamp_from_json)
    }
}

/// Returns true when `value` is an object with a non-empty string `id`.
pub fn is_valid_record(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|object| object.get("id"))
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty())
}

/// Create a new time-sortable record id (UUID v7).
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_record_reads_id_and_updated_at() {
        let record = json!({"id": "t1", "updatedAt": "2024-01-01T00:00:00Z"});
        assert_eq!(record.id(), "t1");
        assert!(record.updated_at().is_some());
        assert!(record.timestamp("createdAt").is_none());
    }

    #[test]
    fn json_record_without_id_is_invalid() {
        assert!(!is_valid_record(&json!({"title": "orphan"})));
        assert!(!is_valid_record(&json!({"id": "  "})));
        assert!(!is_valid_record(&json!(["t1"])));
        assert!(is_valid_record(&json!({"id": "t1"})));
    }

    #[test]
    fn new_record_ids_are_unique() {
        assert_ne!(new_record_id(), new_record_id());
    }
}
