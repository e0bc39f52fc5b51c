//! Typed view over a client's blob store.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{load_json, save_json, BlobStore};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::models::{CollectionKind, Snapshot, SyncState, TombstoneLog};
use crate::sync::SyncStatus;

/// Key of the free-form settings object.
pub const SETTINGS_KEY: &str = "settings";
/// Key of the persisted offline queue.
pub const OFFLINE_QUEUE_KEY: &str = "offlineQueue";
/// Key of the outcome of the last full sync round.
pub const SYNC_STATUS_KEY: &str = "syncStatus";

/// Client-side storage layout: `<collection>_data`, `<collection>_sync`,
/// `<collection>_deletions`, `settings`, `offlineQueue` and `syncStatus`.
#[derive(Clone)]
pub struct ClientStore {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for ClientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStore").finish_non_exhaustive()
    }
}

impl ClientStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub async fn load_settings(&self) -> Map<String, Value> {
        load_json(self.blobs(), SETTINGS_KEY).await
    }

    pub async fn save_settings(&self, settings: &Map<String, Value>) -> Result<()> {
        save_json(self.blobs(), SETTINGS_KEY, settings).await
    }

    pub async fn sync_config(&self) -> SyncConfig {
        SyncConfig::from_settings(&self.load_settings().await)
    }

    pub async fn save_sync_config(&self, config: &SyncConfig) -> Result<()> {
        let mut settings = self.load_settings().await;
        config.write_to(&mut settings);
        self.save_settings(&settings).await
    }

    pub async fn load_records(&self, kind: CollectionKind) -> Vec<Value> {
        load_json(self.blobs(), &kind.data_key()).await
    }

    pub async fn save_records(&self, kind: CollectionKind, records: &[Value]) -> Result<()> {
        save_json(self.blobs(), &kind.data_key(), records).await
    }

    pub async fn load_deletions(&self, kind: CollectionKind) -> TombstoneLog {
        load_json(self.blobs(), &kind.deletions_key()).await
    }

    pub async fn save_deletions(&self, kind: CollectionKind, log: &TombstoneLog) -> Result<()> {
        save_json(self.blobs(), &kind.deletions_key(), log).await
    }

    pub async fn load_sync_state(&self, kind: CollectionKind) -> SyncState {
        load_json(self.blobs(), &kind.sync_key()).await
    }

    pub async fn save_sync_state(&self, kind: CollectionKind, state: &SyncState) -> Result<()> {
        save_json(self.blobs(), &kind.sync_key(), state).await
    }

    /// Every collection, the settings and all pending deletions.
    pub async fn load_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for kind in CollectionKind::ALL {
            snapshot.set_collection(kind, self.load_records(kind).await);
            snapshot
                .deletions
                .extend(self.load_deletions(kind).await.into_entries());
        }
        snapshot.settings = self.load_settings().await;
        snapshot
    }

    /// Persist the collections and settings of `snapshot`.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        for (kind, records) in &snapshot.collections {
            self.save_records(*kind, records).await?;
        }
        self.save_settings(&snapshot.settings).await
    }

    /// Status of the last full round, if one ever ran on this device.
    pub async fn load_sync_status(&self) -> Option<SyncStatus> {
        load_json(self.blobs(), SYNC_STATUS_KEY).await
    }

    pub async fn save_sync_status(&self, status: &SyncStatus) -> Result<()> {
        save_json(self.blobs(), SYNC_STATUS_KEY, status).await
    }

    pub async fn clear_deletions(&self) -> Result<()> {
        for kind in CollectionKind::ALL {
            self.blobs.remove(&kind.deletions_key()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tombstone;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_collects_records_settings_and_deletions() {
        let store = ClientStore::new(Arc::new(MemoryBlobStore::new()));
        store
            .save_records(CollectionKind::Tasks, &[json!({"id": "t1"})])
            .await
            .unwrap();
        store
            .save_deletions(
                CollectionKind::Notes,
                &vec![Tombstone::new(CollectionKind::Notes, "n1")].into(),
            )
            .await
            .unwrap();
        store
            .save_sync_config(&SyncConfig::client("http://localhost:8080", 5))
            .await
            .unwrap();

        let snapshot = store.load_snapshot().await;
        assert_eq!(snapshot.collection(CollectionKind::Tasks).len(), 1);
        assert_eq!(snapshot.deletions.len(), 1);
        assert_eq!(snapshot.settings["syncServerUrl"], "http://localhost:8080");

        store.clear_deletions().await.unwrap();
        assert!(store.load_snapshot().await.deletions.is_empty());
    }
}
