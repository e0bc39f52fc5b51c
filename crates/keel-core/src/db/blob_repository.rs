//! libSQL implementation of the client blob store

use std::sync::Arc;

use async_trait::async_trait;

use super::Database;
use crate::error::Result;
use crate::storage::BlobStore;
use crate::util::unix_millis_now;

/// [`BlobStore`] persisted in the `kv_store` table
#[derive(Debug, Clone)]
pub struct LibSqlBlobStore {
    db: Arc<Database>,
}

impl LibSqlBlobStore {
    /// Create a new store over the given database
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BlobStore for LibSqlBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT value FROM kv_store WHERE key = ?1",
                libsql::params![key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                libsql::params![key, value, unix_millis_now()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute("DELETE FROM kv_store WHERE key = ?1", libsql::params![key])
            .await?;
        Ok(())
    }
}
