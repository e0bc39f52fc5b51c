//! Per-collection sync bookkeeping kept on the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync_conflict::ConflictRecord;

/// Sync bookkeeping for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Time of the last completed sync
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Number of completed syncs
    #[serde(default)]
    pub version: u64,
    /// Conflicts detected across all syncs
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>,
}
