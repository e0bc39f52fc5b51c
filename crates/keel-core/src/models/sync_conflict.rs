//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of divergence produced the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Both sides edited the record
    Update,
    /// One side deleted a record the other side edited later
    Delete,
}

/// Recorded sync conflict resolved by whole-record last-write-wins.
///
/// Kept for audit only; conflicts are never re-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Record involved in the conflict
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    /// Local variant (absent when the local side deleted the record)
    pub local_data: Option<Value>,
    /// Server variant (absent when the server side deleted the record)
    pub server_data: Option<Value>,
    /// Detection time
    pub timestamp: DateTime<Utc>,
}
