//! Durable FIFO of writes made while the authority was unreachable.
//!
//! Connectivity comes from two sources: a reachability signal reported by the
//! host ([`OfflineQueue::set_connectivity`]) and an active HEAD probe on a fixed
//! cadence. Passes replay operations in enqueue order; failures back off
//! exponentially and an operation is dropped once it runs out of retries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use super::locks::CollectionLocks;
use crate::events::{EventBus, Notice, SyncEvent};
use crate::models::{CollectionKind, QueuedOperation};
use crate::storage::{load_json, save_json, ClientStore, OFFLINE_QUEUE_KEY};
use crate::transport::{backoff_with_jitter, SyncTransportClient};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Timing knobs for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTuning {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_path: String,
    /// Wait after coming back online before the first pass
    pub settle_delay: Duration,
    /// Wait after an enqueue before processing
    pub debounce: Duration,
    /// Gap between two operations of one pass
    pub operation_spacing: Duration,
    /// Backoff after a failure is `retry_base * 2^retries`, capped at `retry_max`
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            probe_path: "/sync-status".to_string(),
            settle_delay: Duration::from_secs(1),
            debounce: Duration::from_millis(100),
            operation_spacing: Duration::from_millis(100),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
        }
    }
}

/// Counts from one queue pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePassReport {
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// The pass did not run (offline, already processing or no server)
    pub skipped: bool,
}

struct Inner {
    store: ClientStore,
    client: RwLock<Option<SyncTransportClient>>,
    operations: tokio::sync::Mutex<Vec<QueuedOperation>>,
    online: AtomicBool,
    processing: AtomicBool,
    scheduled: Mutex<Option<(u64, JoinHandle<()>)>>,
    schedule_token: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
    locks: CollectionLocks,
    events: EventBus,
    tuning: QueueTuning,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((_, handle)) = lock(&self.scheduled).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.monitor).take() {
            handle.abort();
        }
    }
}

/// Offline write queue shared by every collection.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("online", &self.is_online())
            .field("processing", &self.is_processing())
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Restore the persisted queue. A corrupt blob starts an empty queue.
    pub async fn load(
        store: ClientStore,
        client: Option<SyncTransportClient>,
        locks: CollectionLocks,
        events: EventBus,
        tuning: QueueTuning,
    ) -> Self {
        let mut operations: Vec<QueuedOperation> =
            load_json(store.blobs(), OFFLINE_QUEUE_KEY).await;
        operations.sort_by_key(|operation| operation.timestamp);
        if !operations.is_empty() {
            tracing::info!(pending = operations.len(), "Restored offline queue");
        }

        Self {
            inner: Arc::new(Inner {
                store,
                online: AtomicBool::new(client.is_some()),
                client: RwLock::new(client),
                operations: tokio::sync::Mutex::new(operations),
                processing: AtomicBool::new(false),
                scheduled: Mutex::new(None),
                schedule_token: AtomicU64::new(0),
                monitor: Mutex::new(None),
                locks,
                events,
                tuning,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn locks(&self) -> &CollectionLocks {
        &self.inner.locks
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Client for the configured server, if any.
    pub fn client(&self) -> Option<SyncTransportClient> {
        self.inner
            .client
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the client, e.g. after the server URL changed. `None` keeps
    /// operations queued until a server is configured.
    pub fn set_client(&self, client: Option<SyncTransportClient>) {
        *self
            .inner
            .client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = client;
    }

    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.inner.operations.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.operations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every pending operation.
    pub async fn clear(&self) -> crate::Result<()> {
        let mut operations = self.inner.operations.lock().await;
        operations.clear();
        save_json(self.inner.store.blobs(), OFFLINE_QUEUE_KEY, &*operations).await
    }

    async fn persist(&self, operations: &[QueuedOperation]) {
        if let Err(error) = save_json(self.inner.store.blobs(), OFFLINE_QUEUE_KEY, operations).await {
            tracing::warn!("Failed to persist offline queue: {error}");
            self.inner.events.notify(Notice::warning(
                "Pending changes could not be saved to disk",
            ));
        }
    }

    /// Append an operation and return its assigned id.
    pub async fn enqueue(&self, mut operation: QueuedOperation) -> String {
        operation.stamp();
        let id = operation.id.clone();
        tracing::debug!(id = %id, operation = %operation.describe(), "Queued operation");
        {
            let mut operations = self.inner.operations.lock().await;
            operations.push(operation);
            self.persist(&operations).await;
        }

        if self.is_online() && !self.is_processing() {
            self.schedule_pass(self.inner.tuning.debounce);
        }
        id
    }

    /// Report reachability. Transitions cancel or schedule passes.
    pub fn set_connectivity(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        tracing::info!(online, "Connectivity changed");
        self.inner
            .events
            .publish(SyncEvent::ConnectivityChanged { online });

        if online {
            self.inner
                .events
                .notify(Notice::info("Back online, syncing pending changes"));
            self.schedule_pass(self.inner.tuning.settle_delay);
        } else {
            self.cancel_scheduled();
            self.inner.events.notify(
                Notice::warning("You are offline. Changes will sync when the connection returns")
                    .persistent(),
            );
        }
    }

    /// Check reachability with a short HEAD request and update connectivity.
    pub async fn probe(&self) -> bool {
        let Some(client) = self.client() else {
            self.set_connectivity(false);
            return false;
        };
        let tuning = &self.inner.tuning;
        let online = match client.probe(&tuning.probe_path, tuning.probe_timeout).await {
            Ok(()) => true,
            Err(error) if error.is_connectivity() => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
            // The authority answered, even if with an error status
            Err(_) => true,
        };
        self.set_connectivity(online);
        online
    }

    /// Probe on the configured cadence until stopped.
    pub fn start_monitoring(&self) {
        let mut monitor = lock(&self.inner.monitor);
        if monitor.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.tuning.probe_interval;
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                OfflineQueue { inner }.probe().await;
            }
        }));
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = lock(&self.inner.monitor).take() {
            handle.abort();
        }
    }

    fn cancel_scheduled(&self) {
        if let Some((_, handle)) = lock(&self.inner.scheduled).take() {
            handle.abort();
        }
    }

    /// Run a pass after `delay`, replacing any pass already scheduled.
    fn schedule_pass(&self, delay: Duration) {
        let token = self.inner.schedule_token.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut scheduled = lock(&inner.scheduled);
                if scheduled.as_ref().is_some_and(|(current, _)| *current == token) {
                    scheduled.take();
                }
            }
            OfflineQueue { inner }.process_queue().await;
        });

        let mut scheduled = lock(&self.inner.scheduled);
        if let Some((_, previous)) = scheduled.replace((token, handle)) {
            previous.abort();
        }
    }

    /// Replay pending operations in enqueue order.
    pub async fn process_queue(&self) -> QueuePassReport {
        if !self.is_online() {
            return QueuePassReport {
                skipped: true,
                remaining: self.len().await,
                ..QueuePassReport::default()
            };
        }
        let Some(client) = self.client() else {
            return QueuePassReport {
                skipped: true,
                remaining: self.len().await,
                ..QueuePassReport::default()
            };
        };
        if self.inner.processing.swap(true, Ordering::SeqCst) {
            return QueuePassReport {
                skipped: true,
                ..QueuePassReport::default()
            };
        }

        let (report, retry_delay) = self.run_pass(&client).await;
        self.inner.processing.store(false, Ordering::SeqCst);

        // Operations enqueued during the pass were not part of its batch
        if self.is_online() {
            match retry_delay {
                Some(delay) => self.schedule_pass(delay),
                None if !self.is_empty().await => self.schedule_pass(self.inner.tuning.debounce),
                None => {}
            }
        }
        report
    }

    /// One pass over the operations pending when it starts. Returns the
    /// shortest backoff among failed operations.
    async fn run_pass(&self, client: &SyncTransportClient) -> (QueuePassReport, Option<Duration>) {
        let mut batch = self.pending().await;
        batch.sort_by_key(|operation| operation.timestamp);

        let mut report = QueuePassReport::default();
        let mut retry_delay: Option<Duration> = None;
        let tuning = &self.inner.tuning;

        for (index, operation) in batch.iter().enumerate() {
            if !self.is_online() {
                break;
            }
            if index > 0 && !tuning.operation_spacing.is_zero() {
                tokio::time::sleep(tuning.operation_spacing).await;
            }

            let result = {
                let _guard = match CollectionKind::parse(&operation.resource) {
                    Some(kind) => Some(self.inner.locks.lock(kind).await),
                    None => None,
                };
                client
                    .request(operation.method, &operation.endpoint, operation.data.clone())
                    .await
            };

            let mut operations = self.inner.operations.lock().await;
            match result {
                Ok(_) => {
                    operations.retain(|pending| pending.id != operation.id);
                    report.succeeded += 1;
                    tracing::debug!(id = %operation.id, "Replayed queued operation");
                }
                Err(error) => {
                    let Some(position) = operations.iter().position(|pending| pending.id == operation.id)
                    else {
                        continue;
                    };
                    operations[position].retries += 1;
                    let attempts = operations[position].retries;

                    if operations[position].is_exhausted() {
                        let dropped = operations.remove(position);
                        report.dropped += 1;
                        tracing::warn!(
                            id = %dropped.id,
                            attempts,
                            "Dropping queued operation {}: {error}",
                            dropped.describe()
                        );
                        self.inner.events.publish(SyncEvent::OperationDropped {
                            operation_id: dropped.id.clone(),
                            endpoint: dropped.endpoint.clone(),
                            error: error.to_string(),
                        });
                    } else {
                        report.failed += 1;
                        // base * 2^retries
                        let delay = backoff_with_jitter(
                            usize::try_from(attempts).unwrap_or(usize::MAX).saturating_add(1),
                            tuning.retry_base,
                            tuning.retry_max,
                        );
                        retry_delay = Some(retry_delay.map_or(delay, |current| current.min(delay)));
                        tracing::debug!(id = %operation.id, attempts, "Queued operation failed: {error}");
                    }
                }
            }
            self.persist(&operations).await;
        }

        report.remaining = self.len().await;
        self.announce(&report);
        (report, retry_delay)
    }

    fn announce(&self, report: &QueuePassReport) {
        if report.succeeded + report.failed + report.dropped == 0 {
            return;
        }
        self.inner.events.publish(SyncEvent::QueueDrained {
            succeeded: report.succeeded,
            failed: report.failed,
            dropped: report.dropped,
            remaining: report.remaining,
        });

        let notice = if report.dropped > 0 {
            Notice::error(format!(
                "{} change(s) could not be synced and were discarded",
                report.dropped
            ))
        } else if report.failed > 0 {
            Notice::warning(format!(
                "{} change(s) failed to sync and will be retried",
                report.failed
            ))
        } else {
            Notice::success(format!("Synced {} pending change(s)", report.succeeded))
        };
        self.inner.events.notify(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationType;
    use crate::storage::{BlobStore, MemoryBlobStore};
    use crate::transport::testing::{FnTransport, ScriptedTransport};
    use crate::transport::{Method, RetryPolicy, Transport, TransportError, TransportResponse};
    use serde_json::json;

    fn tuning() -> QueueTuning {
        QueueTuning {
            operation_spacing: Duration::ZERO,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(1),
            ..QueueTuning::default()
        }
    }

    fn client_for(transport: Arc<dyn Transport>) -> SyncTransportClient {
        SyncTransportClient::new(transport).with_retry_policy(RetryPolicy::none())
    }

    fn op(id: &str) -> QueuedOperation {
        QueuedOperation::new(
            OperationType::Update,
            "tasks",
            CollectionKind::Tasks.record_endpoint(id),
            Method::Put,
        )
        .with_data(json!({"id": id}))
    }

    async fn queue_with(transport: Arc<dyn Transport>, events: EventBus) -> (OfflineQueue, ClientStore) {
        let store = ClientStore::new(Arc::new(MemoryBlobStore::new()));
        let queue = OfflineQueue::load(
            store.clone(),
            Some(client_for(transport)),
            CollectionLocks::new(),
            events,
            tuning(),
        )
        .await;
        (queue, store)
    }

    #[tokio::test(start_paused = true)]
    async fn replays_in_order_and_drops_exhausted_operation() {
        let transport = Arc::new(FnTransport::new(|request| {
            if request.path.ends_with("/t2") {
                Ok(TransportResponse::new(500, json!({"error": "boom"})))
            } else {
                Ok(TransportResponse::ok(json!({"status": "ok"})))
            }
        }));
        let events = EventBus::default();
        let mut subscription = events.subscribe();
        let (queue, store) = queue_with(transport.clone(), events).await;

        queue.set_connectivity(false);
        for id in ["t1", "t2", "t3"] {
            queue.enqueue(op(id)).await;
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        assert!(transport.paths().is_empty());
        queue.set_connectivity(true);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(queue.is_empty().await);
        assert_eq!(
            transport.paths()[..3].to_vec(),
            vec!["/sync/tasks/t1", "/sync/tasks/t2", "/sync/tasks/t3"]
        );
        assert_eq!(transport.calls_to("/sync/tasks/t1"), 1);
        assert_eq!(transport.calls_to("/sync/tasks/t2"), 3);
        assert_eq!(transport.calls_to("/sync/tasks/t3"), 1);

        let events = subscription.drain();
        let dropped: Vec<&SyncEvent> = events
            .iter()
            .filter(|event| matches!(event, SyncEvent::OperationDropped { .. }))
            .collect();
        assert_eq!(dropped.len(), 1);
        assert!(matches!(
            dropped[0],
            SyncEvent::OperationDropped { endpoint, .. } if endpoint == "/sync/tasks/t2"
        ));

        let persisted: Vec<QueuedOperation> = load_json(store.blobs(), OFFLINE_QUEUE_KEY).await;
        assert!(persisted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn operation_enqueued_during_pass_is_replayed() {
        let transport = Arc::new(
            ScriptedTransport::repeating(Ok(TransportResponse::ok(json!({"status": "ok"}))))
                .with_delay(Duration::from_secs(1)),
        );
        let (queue, _store) = queue_with(transport.clone(), EventBus::default()).await;

        queue.enqueue(op("t1")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_processing());
        queue.enqueue(op("t2")).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty().await);
        let paths: Vec<String> = transport.calls().into_iter().map(|request| request.path).collect();
        assert_eq!(paths, vec!["/sync/tasks/t1", "/sync/tasks/t2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_retry_waits_twice_the_base_delay() {
        let transport = Arc::new(FnTransport::new(|_| {
            Ok(TransportResponse::new(503, json!({"error": "busy"})))
        }));
        let (queue, _store) = queue_with(transport.clone(), EventBus::default()).await;

        queue.enqueue(op("t1")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.calls_to("/sync/tasks/t1"), 1);

        // retry_base is 100ms, so the second attempt lands 200-240ms later
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert_eq!(transport.calls_to("/sync/tasks/t1"), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls_to("/sync/tasks/t1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_queue_waits_for_connectivity() {
        let transport = Arc::new(FnTransport::new(|_| Ok(TransportResponse::ok(json!({})))));
        let (queue, _store) = queue_with(transport.clone(), EventBus::default()).await;

        queue.set_connectivity(false);
        queue.enqueue(op("t1")).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.len().await, 1);
        assert!(queue.process_queue().await.skipped);

        queue.set_connectivity(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty().await);
        assert_eq!(transport.calls_to("/sync/tasks/t1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_tracks_reachability() {
        let reachable = Arc::new(AtomicBool::new(false));
        let flag = reachable.clone();
        let transport = Arc::new(FnTransport::new(move |_| {
            if flag.load(Ordering::SeqCst) {
                Ok(TransportResponse::new(404, serde_json::Value::Null))
            } else {
                Err(TransportError::Network("refused".into()))
            }
        }));
        let events = EventBus::default();
        let mut subscription = events.subscribe();
        let (queue, _store) = queue_with(transport, events).await;

        assert!(!queue.probe().await);
        assert!(!queue.is_online());
        reachable.store(true, Ordering::SeqCst);
        assert!(queue.probe().await);
        assert!(queue.is_online());

        let changes: Vec<bool> = subscription
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::ConnectivityChanged { online } => Some(online),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_persisted_queue_starts_empty() {
        let store = ClientStore::new(Arc::new(MemoryBlobStore::new()));
        store.blobs().set(OFFLINE_QUEUE_KEY, "[{\"broken\"").await.unwrap();

        let queue = OfflineQueue::load(
            store,
            None,
            CollectionLocks::new(),
            EventBus::default(),
            tuning(),
        )
        .await;
        assert!(queue.is_empty().await);
        assert!(!queue.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_operations_survive_reload() {
        let transport = Arc::new(FnTransport::new(|_| Err(TransportError::Network("down".into()))));
        let (queue, store) = queue_with(transport, EventBus::default()).await;
        queue.set_connectivity(false);
        let id = queue.enqueue(op("t1")).await;

        let restored = OfflineQueue::load(
            store,
            None,
            CollectionLocks::new(),
            EventBus::default(),
            tuning(),
        )
        .await;
        let pending = restored.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].method, Method::Put);
    }
}
