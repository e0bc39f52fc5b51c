//! Wiring of the client-side stores, queue and sync services for one run.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_core::config::SyncConfig;
use keel_core::db::{Database, LibSqlBlobStore};
use keel_core::storage::{BlobStore, ClientStore};
use keel_core::sync::{
    ClientRound, CollectionLocks, OfflineQueue, PersistenceManager, QueueTuning, SyncScheduler,
};
use keel_core::transport::{http_connector, Connector, SyncTransportClient};
use keel_core::{EventBus, Note, Task};

use crate::error::CliError;

pub struct ClientContext {
    pub store: ClientStore,
    pub events: EventBus,
    pub locks: CollectionLocks,
    pub queue: OfflineQueue,
    connector: Connector,
}

impl ClientContext {
    /// Open the local database and restore the offline queue.
    pub async fn open(db_path: &Path) -> Result<Self, CliError> {
        let db = Database::open(db_path).await?;
        tracing::debug!(path = %db_path.display(), "Opened local database");
        Ok(Self::with_blobs(Arc::new(LibSqlBlobStore::new(Arc::new(db))), http_connector()).await)
    }

    pub async fn with_blobs(blobs: Arc<dyn BlobStore>, connector: Connector) -> Self {
        let store = ClientStore::new(blobs);
        let config = store.sync_config().await;
        let events = EventBus::default();
        let locks = CollectionLocks::new();
        let queue = OfflineQueue::load(
            store.clone(),
            client_for(&connector, &config),
            locks.clone(),
            events.clone(),
            QueueTuning::default(),
        )
        .await;

        Self {
            store,
            events,
            locks,
            queue,
            connector,
        }
    }

    pub async fn sync_config(&self) -> SyncConfig {
        self.store.sync_config().await
    }

    /// Persist a new config and point the queue at the new server.
    pub async fn save_sync_config(&self, config: &SyncConfig) -> Result<(), CliError> {
        self.store.save_sync_config(config).await?;
        self.refresh_client(config);
        Ok(())
    }

    /// Point the queue at the server named by `config`.
    pub fn refresh_client(&self, config: &SyncConfig) {
        self.queue.set_client(client_for(&self.connector, config));
    }

    pub fn tasks(&self) -> PersistenceManager<Task> {
        PersistenceManager::new(
            keel_core::CollectionKind::Tasks,
            self.store.clone(),
            self.queue.clone(),
        )
    }

    pub fn notes(&self) -> PersistenceManager<Note> {
        PersistenceManager::new(
            keel_core::CollectionKind::Notes,
            self.store.clone(),
            self.queue.clone(),
        )
    }

    pub async fn scheduler(&self) -> SyncScheduler {
        let round = ClientRound::new(
            self.store.clone(),
            self.connector.clone(),
            self.locks.clone(),
            self.events.clone(),
        );
        SyncScheduler::new(self.sync_config().await, Arc::new(round), self.events.clone())
    }

    /// Replay queued writes when a server is reachable. Returns the number of
    /// operations still pending.
    pub async fn flush_queue(&self) -> usize {
        if self.queue.is_empty().await {
            return 0;
        }
        if self.queue.probe().await {
            self.queue.process_queue().await;
        }
        self.queue.len().await
    }
}

/// Transport client for the configured server, if any.
fn client_for(connector: &Connector, config: &SyncConfig) -> Option<SyncTransportClient> {
    if config.server_url.trim().is_empty() {
        return None;
    }
    match connector(&config.server_url) {
        Ok(transport) => Some(SyncTransportClient::new(transport)),
        Err(error) => {
            tracing::warn!("Cannot reach configured server {}: {error}", config.server_url);
            None
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("KEEL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keel")
        .join("keel.db")
}
