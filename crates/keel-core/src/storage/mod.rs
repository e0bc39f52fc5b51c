//! Storage abstractions.
//!
//! Clients keep everything in a string-keyed [`BlobStore`]; the authority keeps
//! records in a [`SnapshotStore`] that can replace a collection atomically.
//! libSQL implementations live in [`crate::db`].

mod client;
mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{CollectionKind, Snapshot, Tombstone, TombstoneLog};

pub use client::{ClientStore, OFFLINE_QUEUE_KEY, SETTINGS_KEY, SYNC_STATUS_KEY};
pub use memory::{MemoryBlobStore, MemorySnapshotStore};

/// Durable string-keyed storage on a client device.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read a JSON blob. Missing, unreadable and corrupt blobs all yield the
/// default value.
pub async fn load_json<T>(store: &dyn BlobStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(key, "Discarding corrupt stored value: {error}");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            tracing::warn!(key, "Failed to read stored value: {error}");
            T::default()
        }
    }
}

/// Write a JSON blob.
pub async fn save_json<T>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

/// Authoritative record store used by the server role.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<Value>>;

    /// Replace every record of `kind` in one transaction.
    async fn replace_collection(&self, kind: CollectionKind, records: &[Value]) -> Result<()>;

    async fn load_settings(&self) -> Result<Map<String, Value>>;

    async fn load_tombstones(&self) -> Result<TombstoneLog>;

    async fn append_tombstone(&self, tombstone: &Tombstone) -> Result<()>;

    async fn clear_tombstones(&self) -> Result<()>;

    /// Drop the tombstones of one collection only.
    async fn clear_tombstones_for(&self, kind: CollectionKind) -> Result<()>;

    /// Replace every collection present in `snapshot` and the settings in one
    /// transaction. Collections absent from the snapshot are left untouched.
    async fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Every collection and the settings. Deletions are not included.
    async fn load_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for kind in CollectionKind::ALL {
            snapshot.set_collection(kind, self.load_collection(kind).await?);
        }
        snapshot.settings = self.load_settings().await?;
        Ok(snapshot)
    }
}
