//! Full-state exchange between a client and the authority.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::collection::CollectionKind;
use super::tombstone::Tombstone;

/// Every collection plus settings and pending deletions.
///
/// Serialized flat: `{ "tasks": [...], "notes": [...], "settings": {...},
/// "deletions": [...] }`. Missing collections deserialize as absent and are
/// read back as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub collections: BTreeMap<CollectionKind, Vec<Value>>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<Tombstone>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of one collection (empty when absent).
    pub fn collection(&self, kind: CollectionKind) -> &[Value] {
        self.collections.get(&kind).map_or(&[], Vec::as_slice)
    }

    pub fn set_collection(&mut self, kind: CollectionKind, records: Vec<Value>) {
        self.collections.insert(kind, records);
    }

    #[must_use]
    pub fn with_collection(mut self, kind: CollectionKind, records: Vec<Value>) -> Self {
        self.set_collection(kind, records);
        self
    }

    /// Total number of records across collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}
