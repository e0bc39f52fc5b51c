//! In-memory stores for tests and ephemeral sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{BlobStore, SnapshotStore};
use crate::error::{Error, Result};
use crate::models::{CollectionKind, Snapshot, Tombstone, TombstoneLog};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// [`BlobStore`] backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a full disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write to '{key}' rejected")));
        }
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("remove of '{key}' rejected")));
        }
        lock(&self.entries).remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SnapshotState {
    collections: BTreeMap<CollectionKind, Vec<Value>>,
    settings: Map<String, Value>,
    tombstones: Vec<Tombstone>,
}

/// [`SnapshotStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    state: Mutex<SnapshotState>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<Value>> {
        Ok(lock(&self.state)
            .collections
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_collection(&self, kind: CollectionKind, records: &[Value]) -> Result<()> {
        lock(&self.state).collections.insert(kind, records.to_vec());
        Ok(())
    }

    async fn load_settings(&self) -> Result<Map<String, Value>> {
        Ok(lock(&self.state).settings.clone())
    }

    async fn load_tombstones(&self) -> Result<TombstoneLog> {
        Ok(lock(&self.state).tombstones.clone().into())
    }

    async fn append_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        lock(&self.state).tombstones.push(tombstone.clone());
        Ok(())
    }

    async fn clear_tombstones(&self) -> Result<()> {
        lock(&self.state).tombstones.clear();
        Ok(())
    }

    async fn clear_tombstones_for(&self, kind: CollectionKind) -> Result<()> {
        lock(&self.state)
            .tombstones
            .retain(|tombstone| tombstone.record_type != kind.record_type());
        Ok(())
    }

    async fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut state = lock(&self.state);
        for (kind, records) in &snapshot.collections {
            state.collections.insert(*kind, records.clone());
        }
        state.settings = snapshot.settings.clone();
        Ok(())
    }
}
