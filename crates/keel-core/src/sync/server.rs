//! Server role: the authoritative snapshot and its audit log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::strip_sync_settings;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::merge::{apply_tombstones, apply_tombstones_to_snapshot, merge_collections, merge_list};
use crate::models::{is_valid_record, CollectionKind, Record, Snapshot, Tombstone, TombstoneLog};
use crate::storage::SnapshotStore;

/// Default number of retained sync log entries.
pub const DEFAULT_SYNC_LOG_CAPACITY: usize = 1_000;

/// One accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub time: DateTime<Utc>,
    pub origin_address: String,
    pub method: String,
}

/// Body of a per-collection push: a bare array or records with deletions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CollectionPush {
    Records(Vec<Value>),
    #[serde(rename_all = "camelCase")]
    WithDeletions {
        records: Vec<Value>,
        #[serde(default)]
        deletions: Vec<Tombstone>,
    },
}

impl CollectionPush {
    pub fn into_parts(self) -> (Vec<Value>, Vec<Tombstone>) {
        match self {
            Self::Records(records) => (records, Vec::new()),
            Self::WithDeletions { records, deletions } => (records, deletions),
        }
    }
}

/// Summary of an accepted push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptReport {
    pub records: usize,
    pub removed: usize,
}

/// Serves and accepts snapshots against a [`SnapshotStore`].
///
/// Writes are serialized; every accepted write is appended to a bounded log.
pub struct SnapshotService {
    store: Arc<dyn SnapshotStore>,
    events: EventBus,
    log: Mutex<VecDeque<SyncLogEntry>>,
    log_capacity: usize,
    write: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotService")
            .field("log_capacity", &self.log_capacity)
            .finish_non_exhaustive()
    }
}

fn validate(kind: CollectionKind, records: &[Value]) -> Result<()> {
    match records.iter().position(|record| !is_valid_record(record)) {
        Some(index) => Err(Error::InvalidInput(format!(
            "{kind}[{index}] must be an object with a non-empty string id"
        ))),
        None => Ok(()),
    }
}

impl SnapshotService {
    pub fn new(store: Arc<dyn SnapshotStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            log: Mutex::new(VecDeque::new()),
            log_capacity: DEFAULT_SYNC_LOG_CAPACITY,
            write: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    fn log_guard(&self) -> MutexGuard<'_, VecDeque<SyncLogEntry>> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record_write(&self, origin: &str, method: &str) {
        let mut log = self.log_guard();
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(SyncLogEntry {
            time: Utc::now(),
            origin_address: origin.to_string(),
            method: method.to_string(),
        });
    }

    /// Accepted writes, oldest first.
    pub fn sync_log(&self) -> Vec<SyncLogEntry> {
        self.log_guard().iter().cloned().collect()
    }

    /// Time of the most recent accepted write.
    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.log_guard().back().map(|entry| entry.time)
    }

    /// Current state with device-private settings removed.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = self.store.load_snapshot().await?;
        strip_sync_settings(&mut snapshot.settings);
        Ok(snapshot)
    }

    /// Merge a full client snapshot into the authoritative state.
    pub async fn accept_snapshot(&self, mut incoming: Snapshot, origin: &str) -> Result<AcceptReport> {
        for (kind, records) in &incoming.collections {
            validate(*kind, records)?;
        }
        strip_sync_settings(&mut incoming.settings);

        let _guard = self.write.lock().await;
        let mut current = self.store.load_snapshot().await?;
        strip_sync_settings(&mut current.settings);

        let mut log = self.store.load_tombstones().await?;
        log.extend(incoming.deletions.drain(..));

        let combined = merge_collections(&current, &incoming);
        let mut merged = apply_tombstones_to_snapshot(&combined, &log);
        merged.deletions.clear();

        self.store.replace_snapshot(&merged).await?;
        self.store.clear_tombstones().await?;
        self.record_write(origin, "PUT");
        self.events.publish(SyncEvent::DataChanged { collection: None });

        let report = AcceptReport {
            records: merged.record_count(),
            removed: combined.record_count() - merged.record_count(),
        };
        tracing::info!(
            origin,
            records = report.records,
            deletions = log.len(),
            "Accepted snapshot"
        );
        Ok(report)
    }

    pub async fn collection(&self, kind: CollectionKind) -> Result<Vec<Value>> {
        self.store.load_collection(kind).await
    }

    /// Merge one pushed collection into the authoritative state.
    pub async fn accept_collection(
        &self,
        kind: CollectionKind,
        push: CollectionPush,
        origin: &str,
    ) -> Result<AcceptReport> {
        let (records, deletions) = push.into_parts();
        validate(kind, &records)?;

        let _guard = self.write.lock().await;
        let current = self.store.load_collection(kind).await?;
        let mut log: TombstoneLog = self
            .store
            .load_tombstones()
            .await?
            .into_entries()
            .into_iter()
            .filter(|tombstone| tombstone.record_type == kind.record_type())
            .collect();
        log.extend(
            deletions
                .into_iter()
                .filter(|tombstone| tombstone.record_type == kind.record_type()),
        );

        let merged = merge_list(&current, &records, kind.compare_field());
        let merged_count = merged.len();
        let kept = apply_tombstones(kind, &merged, &log);

        self.store.replace_collection(kind, &kept).await?;
        self.store.clear_tombstones_for(kind).await?;
        self.record_write(origin, "PUT");
        self.events.publish(SyncEvent::DataChanged {
            collection: Some(kind),
        });

        tracing::info!(origin, collection = %kind, records = kept.len(), "Accepted collection");
        Ok(AcceptReport {
            records: kept.len(),
            removed: merged_count - kept.len(),
        })
    }

    /// Insert or replace one record, keeping the stored copy when it is newer.
    pub async fn upsert_record(
        &self,
        kind: CollectionKind,
        record: Value,
        origin: &str,
        method: &str,
    ) -> Result<Value> {
        validate(kind, std::slice::from_ref(&record))?;

        let _guard = self.write.lock().await;
        let mut records = self.store.load_collection(kind).await?;
        let stored = match records.iter_mut().find(|existing| existing.id() == record.id()) {
            Some(existing) => {
                let keep_existing = matches!(
                    (existing.updated_at(), record.updated_at()),
                    (Some(ours), Some(theirs)) if ours > theirs
                );
                if !keep_existing {
                    *existing = record;
                }
                existing.clone()
            }
            None => {
                records.push(record.clone());
                record
            }
        };

        self.store.replace_collection(kind, &records).await?;
        self.record_write(origin, method);
        self.events.publish(SyncEvent::DataChanged {
            collection: Some(kind),
        });
        Ok(stored)
    }

    /// Remove one record and remember the deletion. Deleting a missing
    /// record still records the tombstone.
    pub async fn delete_record(&self, kind: CollectionKind, id: &str, origin: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("record id must not be empty".to_string()));
        }

        let _guard = self.write.lock().await;
        let mut records = self.store.load_collection(kind).await?;
        records.retain(|record| record.id() != id);

        self.store.replace_collection(kind, &records).await?;
        self.store
            .append_tombstone(&Tombstone::new(kind, id))
            .await?;
        self.record_write(origin, "DELETE");
        self.events.publish(SyncEvent::DataChanged {
            collection: Some(kind),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySnapshotStore;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service() -> SnapshotService {
        SnapshotService::new(Arc::new(MemorySnapshotStore::new()), EventBus::default())
    }

    fn task(id: &str, updated_at: DateTime<Utc>) -> Value {
        json!({"id": id, "title": id, "updatedAt": updated_at.to_rfc3339()})
    }

    #[tokio::test]
    async fn snapshot_scrubs_private_settings() {
        let service = service();
        let mut push = Snapshot::new();
        push.settings.insert("theme".into(), json!("dark"));
        push.settings.insert("syncServerUrl".into(), json!("http://peer"));
        push.settings.insert("apiKey".into(), json!("secret"));
        service.accept_snapshot(push, "10.0.0.2").await.unwrap();

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.settings.len(), 1);
        assert_eq!(snapshot.settings["theme"], "dark");
    }

    #[tokio::test]
    async fn accept_snapshot_applies_incoming_deletions() {
        let service = service();
        let now = Utc::now();
        service
            .accept_snapshot(
                Snapshot::new().with_collection(
                    CollectionKind::Tasks,
                    vec![task("t1", now), task("t2", now)],
                ),
                "a",
            )
            .await
            .unwrap();

        let mut push = Snapshot::new().with_collection(CollectionKind::Tasks, vec![task("t2", now)]);
        push.deletions
            .push(Tombstone::at(CollectionKind::Tasks, "t1", now + Duration::seconds(1)));
        let report = service.accept_snapshot(push, "b").await.unwrap();

        let tasks = service.collection(CollectionKind::Tasks).await.unwrap();
        assert_eq!(tasks, vec![task("t2", now)]);
        assert_eq!(report.records, 1);

        let origins: Vec<String> = service
            .sync_log()
            .into_iter()
            .map(|entry| entry.origin_address)
            .collect();
        assert_eq!(origins, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn server_deletion_drops_stale_copy_from_push() {
        let service = service();
        let created = Utc::now() - Duration::minutes(5);
        service
            .upsert_record(CollectionKind::Tasks, task("t1", created), "a", "POST")
            .await
            .unwrap();
        service
            .delete_record(CollectionKind::Tasks, "t1", "a")
            .await
            .unwrap();

        let stale = Snapshot::new().with_collection(CollectionKind::Tasks, vec![task("t1", created)]);
        service.accept_snapshot(stale, "b").await.unwrap();
        assert!(service.collection(CollectionKind::Tasks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_records_are_rejected() {
        let service = service();
        let push = Snapshot::new().with_collection(CollectionKind::Notes, vec![json!({"title": "no id"})]);
        let error = service.accept_snapshot(push, "a").await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(service.sync_log().is_empty());
    }

    #[tokio::test]
    async fn accept_collection_parses_both_body_shapes() {
        let service = service();
        let now = Utc::now();

        let bare: CollectionPush = serde_json::from_value(json!([task("t1", now)])).unwrap();
        service
            .accept_collection(CollectionKind::Tasks, bare, "a")
            .await
            .unwrap();

        let with_deletions: CollectionPush = serde_json::from_value(json!({
            "records": [task("t2", now)],
            "deletions": [{"type": "task", "id": "t1", "deletedAt": (now + Duration::seconds(1)).to_rfc3339()}]
        }))
        .unwrap();
        let report = service
            .accept_collection(CollectionKind::Tasks, with_deletions, "a")
            .await
            .unwrap();

        let ids: Vec<String> = service
            .collection(CollectionKind::Tasks)
            .await
            .unwrap()
            .iter()
            .map(|record| record.id().to_string())
            .collect();
        assert_eq!(ids, vec!["t2".to_string()]);
        assert_eq!(report.removed, 1);
    }

    #[tokio::test]
    async fn upsert_keeps_newer_stored_copy() {
        let service = service();
        let now = Utc::now();
        service
            .upsert_record(CollectionKind::Tasks, task("t1", now), "a", "PUT")
            .await
            .unwrap();
        let stored = service
            .upsert_record(
                CollectionKind::Tasks,
                task("t1", now - Duration::minutes(1)),
                "b",
                "PUT",
            )
            .await
            .unwrap();
        assert_eq!(stored, task("t1", now));
        assert_eq!(service.collection(CollectionKind::Tasks).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_log_is_bounded() {
        let service = service().with_log_capacity(2);
        for origin in ["a", "b", "c"] {
            service.accept_snapshot(Snapshot::new(), origin).await.unwrap();
        }
        let log = service.sync_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].origin_address, "b");
        assert!(service.last_accepted().is_some());
    }
}
