//! Per-collection facade over local storage, the offline queue and
//! conflict-aware sync.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::offline_queue::OfflineQueue;
use crate::events::{Notice, SyncEvent};
use crate::merge::{
    apply_tombstones_reporting, differs_from_remote, merge_with_conflicts, to_values,
    ConflictPolicy, MergeOutcome,
};
use crate::models::{
    CollectionKind, OperationType, QueuedOperation, Record, SyncState, Tombstone, TombstoneLog,
};
use crate::storage::ClientStore;
use crate::transport::{Method, SyncTransportClient};

/// Result of [`PersistenceManager::sync_with_server`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport<T> {
    /// Records now held locally. On failure these are the pre-sync records.
    pub records: Vec<T>,
    pub conflicts: usize,
    /// The merged collection was sent to the server
    pub pushed: bool,
    /// Another sync of this collection was running, or no server is configured
    pub skipped: bool,
    pub error: Option<String>,
}

impl<T> SyncReport<T> {
    fn unchanged(records: Vec<T>) -> Self {
        Self {
            records,
            conflicts: 0,
            pushed: false,
            skipped: true,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && !self.skipped
    }
}

/// Decode stored or fetched records, skipping any that do not fit `T`.
fn decode_records<T: DeserializeOwned>(kind: CollectionKind, values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::debug!(collection = %kind, "Skipping undecodable record: {error}");
                None
            }
        })
        .collect()
}

/// One instance per collection.
pub struct PersistenceManager<T> {
    kind: CollectionKind,
    store: ClientStore,
    queue: OfflineQueue,
    policy: ConflictPolicy,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for PersistenceManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("collection", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for PersistenceManager<T> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .auto_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<T> PersistenceManager<T>
where
    T: Record + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(kind: CollectionKind, store: ClientStore, queue: OfflineQueue) -> Self {
        Self {
            kind,
            store,
            queue,
            policy: ConflictPolicy::default(),
            auto_sync: Mutex::new(None),
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub async fn load_local(&self) -> Vec<T> {
        decode_records(self.kind, self.store.load_records(self.kind).await)
    }

    /// Persist the local cache. Returns false when the write failed; the
    /// failure is announced but never propagated.
    pub async fn save_local(&self, records: &[T]) -> bool {
        match self.store.save_records(self.kind, &to_values(records)).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(collection = %self.kind, "Failed to save local records: {error}");
                self.queue.events().notify(Notice::warning(format!(
                    "Could not save {} locally",
                    self.kind
                )));
                false
            }
        }
    }

    pub async fn sync_state(&self) -> SyncState {
        self.store.load_sync_state(self.kind).await
    }

    pub async fn tombstones(&self) -> TombstoneLog {
        self.store.load_deletions(self.kind).await
    }

    /// Reconcile `local` with the server copy of this collection.
    ///
    /// Never fails: on error the local cache and sync state stay untouched and
    /// `local` comes back unchanged in the report.
    pub async fn sync_with_server(&self, local: Vec<T>) -> SyncReport<T> {
        let Some(_guard) = self.queue.locks().try_lock(self.kind) else {
            tracing::debug!(collection = %self.kind, "Sync already running, skipping");
            return SyncReport::unchanged(local);
        };
        let Some(client) = self.queue.client() else {
            return SyncReport::unchanged(local);
        };

        match self.sync_locked(&client, &local).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(collection = %self.kind, "Sync failed: {error}");
                self.queue.events().notify(
                    Notice::error(format!("Failed to sync {}: {error}", self.kind)).with_retry(),
                );
                SyncReport {
                    records: local,
                    conflicts: 0,
                    pushed: false,
                    skipped: false,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    async fn sync_locked(
        &self,
        client: &SyncTransportClient,
        local: &[T],
    ) -> crate::Result<SyncReport<T>> {
        let endpoint = self.kind.endpoint();
        let remote: Vec<T> = decode_records(self.kind, client.get_json(&endpoint).await?);

        let MergeOutcome {
            records: merged,
            mut conflicts,
        } = merge_with_conflicts(local, &remote, &self.policy);
        let deletions = self.tombstones().await;
        let surviving = apply_tombstones_reporting(self.kind, &merged, &deletions);
        conflicts.extend(surviving.conflicts);
        let records = surviving.records;

        let pushed = !deletions.is_empty() || differs_from_remote(&records, &remote);
        if pushed {
            let body = json!({
                "records": to_values(&records),
                "deletions": deletions,
            });
            client.put_json(&endpoint, &body).await?;
        }

        self.save_local(&records).await;
        let mut state = self.sync_state().await;
        state.last_sync = Some(Utc::now());
        state.version += 1;
        state.conflicts.extend(conflicts.iter().cloned());
        if let Err(error) = self.store.save_sync_state(self.kind, &state).await {
            tracing::warn!(collection = %self.kind, "Failed to save sync state: {error}");
        }
        if let Err(error) = self.store.save_deletions(self.kind, &TombstoneLog::new()).await {
            tracing::warn!(collection = %self.kind, "Failed to clear deletions: {error}");
        }

        tracing::info!(
            collection = %self.kind,
            records = records.len(),
            conflicts = conflicts.len(),
            pushed,
            "Collection synced"
        );
        self.queue.events().publish(SyncEvent::SyncCompleted {
            collection: Some(self.kind),
            conflicts: conflicts.len(),
        });

        Ok(SyncReport {
            records,
            conflicts: conflicts.len(),
            pushed,
            skipped: false,
            error: None,
        })
    }

    async fn enqueue(
        &self,
        operation_type: OperationType,
        endpoint: String,
        method: Method,
        data: Option<Value>,
    ) -> String {
        let mut operation =
            QueuedOperation::new(operation_type, self.kind.name(), endpoint, method);
        if let Some(data) = data {
            operation = operation.with_data(data);
        }
        self.queue.enqueue(operation).await
    }

    /// Add a record locally and queue its creation on the server.
    pub async fn queue_create(&self, record: T) -> crate::Result<Vec<T>> {
        let data = serde_json::to_value(&record)?;
        let mut records = self.load_local().await;
        records.retain(|existing| existing.id() != record.id());
        records.push(record);
        self.save_local(&records).await;

        self.enqueue(
            OperationType::Create,
            self.kind.endpoint(),
            Method::Post,
            Some(data),
        )
        .await;
        Ok(records)
    }

    /// Replace a record locally and queue the update.
    pub async fn queue_update(&self, record: T) -> crate::Result<Vec<T>> {
        let data = serde_json::to_value(&record)?;
        let endpoint = self.kind.record_endpoint(record.id());
        let mut records = self.load_local().await;
        match records.iter_mut().find(|existing| existing.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save_local(&records).await;

        self.enqueue(OperationType::Update, endpoint, Method::Put, Some(data))
            .await;
        Ok(records)
    }

    /// Remove a record locally, remember the deletion and queue it.
    pub async fn queue_delete(&self, id: &str) -> crate::Result<Vec<T>> {
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "record id must not be empty".to_string(),
            ));
        }

        let mut deletions = self.tombstones().await;
        deletions.push(Tombstone::new(self.kind, id));
        self.store.save_deletions(self.kind, &deletions).await?;

        let mut records = self.load_local().await;
        records.retain(|existing| existing.id() != id);
        self.save_local(&records).await;

        self.enqueue(
            OperationType::Delete,
            self.kind.record_endpoint(id),
            Method::Delete,
            None,
        )
        .await;
        Ok(records)
    }

    /// Sync on a fixed cadence while online. A second start is a no-op.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Duration) {
        let mut slot = self
            .auto_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if !manager.queue.is_online() {
                    continue;
                }
                let local = manager.load_local().await;
                manager.sync_with_server(local).await;
            }
        }));
        tracing::debug!(collection = %self.kind, ?interval, "Auto sync started");
    }

    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self
            .auto_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.auto_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}
