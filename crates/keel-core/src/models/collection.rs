//! The fixed set of synchronized collections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::UPDATED_AT;

/// Every collection the application synchronizes.
///
/// This is the single place that maps a collection to its wire name, its
/// tombstone type and its last-write-wins comparison field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Tasks,
    Notes,
    Flashcards,
    Habits,
    Inventory,
    Sessions,
}

impl CollectionKind {
    pub const ALL: [Self; 6] = [
        Self::Tasks,
        Self::Notes,
        Self::Flashcards,
        Self::Habits,
        Self::Inventory,
        Self::Sessions,
    ];

    /// Collection name used in URLs and storage keys.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Notes => "notes",
            Self::Flashcards => "flashcards",
            Self::Habits => "habits",
            Self::Inventory => "inventory",
            Self::Sessions => "sessions",
        }
    }

    /// Type string recorded in tombstones for records of this collection.
    pub const fn record_type(self) -> &'static str {
        match self {
            Self::Tasks => "task",
            Self::Notes => "note",
            Self::Flashcards => "flashcard",
            Self::Habits => "habit",
            Self::Inventory => "inventoryItem",
            Self::Sessions => "session",
        }
    }

    /// Field compared during merge, or `None` for append-only logs where
    /// deduplication by id is enough.
    pub const fn compare_field(self) -> Option<&'static str> {
        match self {
            Self::Sessions => None,
            _ => Some(UPDATED_AT),
        }
    }

    /// Parse from a collection name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == value)
    }

    /// Look up the collection owning a tombstone type.
    pub fn from_record_type(record_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.record_type() == record_type)
    }

    /// Local storage key for cached records.
    pub fn data_key(self) -> String {
        format!("{}_data", self.name())
    }

    /// Local storage key for the collection's sync state.
    pub fn sync_key(self) -> String {
        format!("{}_sync", self.name())
    }

    /// Local storage key for the collection's tombstone log.
    pub fn deletions_key(self) -> String {
        format!("{}_deletions", self.name())
    }

    /// Remote endpoint for the whole collection.
    pub fn endpoint(self) -> String {
        format!("/sync/{}", self.name())
    }

    /// Remote endpoint for a single record.
    pub fn record_endpoint(self, id: &str) -> String {
        format!("/sync/{}/{id}", self.name())
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectionKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::NotFound(format!("collection {s}")))
    }
}
