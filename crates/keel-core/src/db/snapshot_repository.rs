//! libSQL implementation of the authoritative snapshot store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::Database;
use crate::error::Result;
use crate::models::{CollectionKind, Record, Snapshot, Tombstone, TombstoneLog};
use crate::storage::SnapshotStore;

/// [`SnapshotStore`] persisted in the `records`, `settings` and `tombstones` tables
#[derive(Debug, Clone)]
pub struct LibSqlSnapshotStore {
    db: Arc<Database>,
}

impl LibSqlSnapshotStore {
    /// Create a new store over the given database
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn write_collection(&self, kind: CollectionKind, records: &[Value]) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            "DELETE FROM records WHERE collection = ?1",
            libsql::params![kind.name()],
        )
        .await?;

        for (position, record) in records.iter().enumerate() {
            let id = record.id();
            if id.is_empty() {
                continue;
            }
            conn.execute(
                "INSERT OR REPLACE INTO records (collection, id, position, data) VALUES (?1, ?2, ?3, ?4)",
                libsql::params![
                    kind.name(),
                    id,
                    i64::try_from(position).unwrap_or(i64::MAX),
                    serde_json::to_string(record)?
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn write_settings(&self, settings: &Map<String, Value>) -> Result<()> {
        let conn = self.db.connection();
        conn.execute("DELETE FROM settings", ()).await?;
        for (key, value) in settings {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)",
                libsql::params![key.as_str(), serde_json::to_string(value)?],
            )
            .await?;
        }
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        for (kind, records) in &snapshot.collections {
            self.write_collection(*kind, records).await?;
        }
        self.write_settings(&snapshot.settings).await
    }
}

#[async_trait]
impl SnapshotStore for LibSqlSnapshotStore {
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<Value>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT id, data FROM records WHERE collection = ?1 ORDER BY position ASC",
                libsql::params![kind.name()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(1)?;
            match serde_json::from_str(&data) {
                Ok(record) => records.push(record),
                Err(error) => {
                    let id: String = row.get(0)?;
                    tracing::warn!(collection = %kind, id = %id, "Skipping corrupt record: {error}");
                }
            }
        }
        Ok(records)
    }

    async fn replace_collection(&self, kind: CollectionKind, records: &[Value]) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db.begin().await?;
        let result = self.write_collection(kind, records).await;
        self.db.finish(result).await
    }

    async fn load_settings(&self) -> Result<Map<String, Value>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT key, value FROM settings ORDER BY key", ())
            .await?;

        let mut settings = Map::new();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            settings.insert(key, value);
        }
        Ok(settings)
    }

    async fn load_tombstones(&self) -> Result<TombstoneLog> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT record_type, record_id, deleted_at FROM tombstones ORDER BY seq ASC",
                (),
            )
            .await?;

        let mut log = TombstoneLog::new();
        while let Some(row) = rows.next().await? {
            let record_type: String = row.get(0)?;
            let id: String = row.get(1)?;
            let raw: String = row.get(2)?;
            let Ok(deleted_at) = DateTime::parse_from_rfc3339(&raw) else {
                tracing::warn!(record_type = %record_type, id = %id, "Skipping tombstone with invalid time {raw}");
                continue;
            };
            log.push(Tombstone {
                record_type,
                id,
                deleted_at: deleted_at.with_timezone(&Utc),
            });
        }
        Ok(log)
    }

    async fn append_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "INSERT INTO tombstones (record_type, record_id, deleted_at) VALUES (?1, ?2, ?3)",
                libsql::params![
                    tombstone.record_type.as_str(),
                    tombstone.id.as_str(),
                    tombstone.deleted_at.to_rfc3339()
                ],
            )
            .await?;
        Ok(())
    }

    async fn clear_tombstones(&self) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute("DELETE FROM tombstones", ())
            .await?;
        Ok(())
    }

    async fn clear_tombstones_for(&self, kind: CollectionKind) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "DELETE FROM tombstones WHERE record_type = ?1",
                libsql::params![kind.record_type()],
            )
            .await?;
        Ok(())
    }

    async fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db.begin().await?;
        let result = self.write_snapshot(snapshot).await;
        self.db.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> LibSqlSnapshotStore {
        LibSqlSnapshotStore::new(Arc::new(Database::open_in_memory().await.unwrap()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_collection_keeps_order() {
        let store = setup().await;
        let records = vec![
            json!({"id": "b", "title": "second"}),
            json!({"id": "a", "title": "first"}),
        ];
        store
            .replace_collection(CollectionKind::Tasks, &records)
            .await
            .unwrap();
        store
            .replace_collection(CollectionKind::Notes, &[json!({"id": "n1"})])
            .await
            .unwrap();

        assert_eq!(
            store.load_collection(CollectionKind::Tasks).await.unwrap(),
            records
        );

        store
            .replace_collection(CollectionKind::Tasks, &[])
            .await
            .unwrap();
        assert!(store
            .load_collection(CollectionKind::Tasks)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.load_collection(CollectionKind::Notes).await.unwrap().len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_snapshot_writes_settings() {
        let store = setup().await;
        let mut snapshot =
            Snapshot::new().with_collection(CollectionKind::Habits, vec![json!({"id": "h1"})]);
        snapshot.settings.insert("theme".into(), json!("dark"));
        snapshot.settings.insert("weekStart".into(), json!(1));
        store.replace_snapshot(&snapshot).await.unwrap();

        let loaded = store.load_snapshot().await.unwrap();
        assert_eq!(loaded.collection(CollectionKind::Habits), snapshot.collection(CollectionKind::Habits));
        assert_eq!(loaded.settings, snapshot.settings);
        assert!(loaded.collection(CollectionKind::Tasks).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tombstones_append_and_clear() {
        let store = setup().await;
        let tombstone = Tombstone::new(CollectionKind::Tasks, "t1");
        store.append_tombstone(&tombstone).await.unwrap();

        let log = store.load_tombstones().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].id, "t1");
        assert_eq!(
            log.entries()[0].deleted_at.timestamp_millis(),
            tombstone.deleted_at.timestamp_millis()
        );

        store
            .append_tombstone(&Tombstone::new(CollectionKind::Notes, "n1"))
            .await
            .unwrap();
        store
            .clear_tombstones_for(CollectionKind::Tasks)
            .await
            .unwrap();
        let log = store.load_tombstones().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].record_type, "note");

        store.clear_tombstones().await.unwrap();
        assert!(store.load_tombstones().await.unwrap().is_empty());
    }
}
