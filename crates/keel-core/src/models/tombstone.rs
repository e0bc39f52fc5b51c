//! Deletion markers that keep deleted records from resurrecting during merge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::collection::CollectionKind;

/// A record that was deleted at `deleted_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Record type (see [`CollectionKind::record_type`])
    #[serde(rename = "type")]
    pub record_type: String,
    /// Id of the deleted record
    pub id: String,
    /// Deletion time
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    /// Tombstone for a record deleted now.
    pub fn new(kind: CollectionKind, id: impl Into<String>) -> Self {
        Self::at(kind, id, Utc::now())
    }

    /// Tombstone with an explicit deletion time.
    pub fn at(kind: CollectionKind, id: impl Into<String>, deleted_at: DateTime<Utc>) -> Self {
        Self {
            record_type: kind.record_type().to_string(),
            id: id.into(),
            deleted_at,
        }
    }

    /// The collection this tombstone applies to, if the type is known.
    pub fn collection(&self) -> Option<CollectionKind> {
        CollectionKind::from_record_type(&self.record_type)
    }
}

/// Append-only log of deletions.
///
/// Several tombstones for the same key may exist; only the latest
/// `deleted_at` is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneLog {
    entries: Vec<Tombstone>,
}

impl TombstoneLog {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, tombstone: Tombstone) {
        self.entries.push(tombstone);
    }

    pub fn extend(&mut self, tombstones: impl IntoIterator<Item = Tombstone>) {
        self.entries.extend(tombstones);
    }

    pub fn entries(&self) -> &[Tombstone] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Tombstone> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest deletion time for `(record_type, id)`.
    pub fn latest(&self, record_type: &str, id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|entry| entry.record_type == record_type && entry.id == id)
            .map(|entry| entry.deleted_at)
            .max()
    }

    /// Latest deletion time per `(record_type, id)` key.
    pub fn index(&self) -> HashMap<(&str, &str), DateTime<Utc>> {
        let mut index: HashMap<(&str, &str), DateTime<Utc>> = HashMap::new();
        for entry in &self.entries {
            let key = (entry.record_type.as_str(), entry.id.as_str());
            index
                .entry(key)
                .and_modify(|current| {
                    if entry.deleted_at > *current {
                        *current = entry.deleted_at;
                    }
                })
                .or_insert(entry.deleted_at);
        }
        index
    }
}

impl From<Vec<Tombstone>> for TombstoneLog {
    fn from(entries: Vec<Tombstone>) -> Self {
        Self { entries }
    }
}

impl FromIterator<Tombstone> for TombstoneLog {
    fn from_iter<I: IntoIterator<Item = Tombstone>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn latest_deletion_wins() {
        let now = Utc::now();
        let mut log = TombstoneLog::new();
        log.push(Tombstone::at(CollectionKind::Tasks, "t1", now));
        log.push(Tombstone::at(
            CollectionKind::Tasks,
            "t1",
            now + Duration::seconds(5),
        ));
        log.push(Tombstone::at(
            CollectionKind::Tasks,
            "t1",
            now - Duration::seconds(5),
        ));

        assert_eq!(log.latest("task", "t1"), Some(now + Duration::seconds(5)));
        assert_eq!(
            log.index().get(&("task", "t1")),
            Some(&(now + Duration::seconds(5)))
        );
        assert_eq!(log.latest("note", "t1"), None);
    }

    #[test]
    fn tombstone_serializes_with_wire_names() {
        let tombstone = Tombstone::new(CollectionKind::Inventory, "i1");
        let value = serde_json::to_value(&tombstone).unwrap();
        assert_eq!(value["type"], "inventoryItem");
        assert_eq!(value["id"], "i1");
        assert!(value["deletedAt"].is_string());
        assert_eq!(tombstone.collection(), Some(CollectionKind::Inventory));
    }
}
