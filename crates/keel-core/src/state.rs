//! Shared cross-platform state types.

use serde::{Deserialize, Serialize};

/// Unified sync phase reported by the scheduler and surfaced to clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Offline,
    Syncing,
    Synced,
    Error,
}
