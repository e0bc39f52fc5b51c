//! Decides when a client pushes and pulls the full snapshot.
//!
//! The timer only triggers rounds; each round runs in its own task. Changing
//! any setting bumps a generation counter, so a round that was in flight when
//! the configuration changed finishes without persisting or stamping status.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::locks::CollectionLocks;
use crate::config::{strip_sync_settings, SyncConfig, SyncRole};
use crate::error::{Error, Result};
use crate::events::{EventBus, Notice, SyncEvent};
use crate::merge::{apply_tombstones_to_snapshot, merge_collections};
use crate::models::{Snapshot, TombstoneLog};
use crate::state::SyncPhase;
use crate::storage::ClientStore;
use crate::transport::{Connector, SyncTransportClient, DEFAULT_REQUEST_TIMEOUT};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// What a finished round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub pushed: usize,
    pub pulled: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Completed(RoundReport),
    /// The configuration changed mid-round; nothing was persisted
    Discarded,
}

/// Configuration snapshot handed to a round.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub config: SyncConfig,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl RoundContext {
    /// False once the scheduler configuration changed after the round started.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

/// One pull+push exchange.
#[async_trait]
pub trait SyncRound: Send + Sync {
    async fn run(&self, ctx: &RoundContext) -> Result<RoundOutcome>;

    /// Called with the status stamped after every completed or failed round.
    async fn record_status(&self, _status: &SyncStatus) {}
}

/// Full-snapshot round against a remote authority.
pub struct ClientRound {
    store: ClientStore,
    connector: Connector,
    locks: CollectionLocks,
    events: EventBus,
    timeout: Duration,
}

impl ClientRound {
    pub fn new(
        store: ClientStore,
        connector: Connector,
        locks: CollectionLocks,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            connector,
            locks,
            events,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SyncRound for ClientRound {
    async fn run(&self, ctx: &RoundContext) -> Result<RoundOutcome> {
        let transport = (self.connector)(&ctx.config.server_url)?;
        let client = SyncTransportClient::new(transport).with_timeout(self.timeout);
        let _guards = self.locks.lock_all().await;

        let mut local = self.store.load_snapshot().await;
        let mut push = local.clone();
        strip_sync_settings(&mut push.settings);

        client.put_json("/sync", &push).await?;
        let remote: Snapshot = client.get_json("/sync").await?;

        if !ctx.is_current() {
            return Ok(RoundOutcome::Discarded);
        }

        let log: TombstoneLog = std::mem::take(&mut local.deletions).into();
        let mut merged = apply_tombstones_to_snapshot(&merge_collections(&local, &remote), &log);
        merged.deletions.clear();

        self.store.save_snapshot(&merged).await?;
        self.store.clear_deletions().await?;
        self.events.publish(SyncEvent::DataChanged { collection: None });

        Ok(RoundOutcome::Completed(RoundReport {
            pushed: push.record_count(),
            pulled: remote.record_count(),
            deletions: log.len(),
        }))
    }

    async fn record_status(&self, status: &SyncStatus) {
        if let Err(error) = self.store.save_sync_status(status).await {
            tracing::warn!("Failed to save sync status: {error}");
        }
    }
}

/// Status served at `/sync-status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Last successful round
    pub last: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub enabled: bool,
    pub last_attempt: Option<DateTime<Utc>>,
    pub phase: SyncPhase,
    pub role: SyncRole,
}

#[derive(Debug, Default)]
struct StatusState {
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    phase: SyncPhase,
}

struct Inner {
    config: Mutex<SyncConfig>,
    status: Mutex<StatusState>,
    generation: Arc<AtomicU64>,
    in_flight: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    round: Arc<dyn SyncRound>,
    events: EventBus,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn config(&self) -> SyncConfig {
        lock(&self.config).clone()
    }

    fn reschedule(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let config = self.config();
        let Some(interval) = config.interval().filter(|_| config.can_sync()) else {
            tracing::debug!(role = %config.role, "Sync timer not scheduled");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.in_flight.load(Ordering::SeqCst) {
                    tracing::debug!("Skipping sync tick, round in flight");
                    continue;
                }
                tokio::spawn(run_round(inner));
            }
        }));
    }
}

async fn run_round(inner: Arc<Inner>) -> Option<RoundOutcome> {
    let config = inner.config();
    if !config.can_sync() {
        tracing::debug!(role = %config.role, enabled = config.enabled, "Sync round skipped");
        return None;
    }
    if inner.in_flight.swap(true, Ordering::SeqCst) {
        tracing::debug!("Sync round skipped, another round in flight");
        return None;
    }

    let ctx = RoundContext {
        config,
        generation: inner.generation.load(Ordering::SeqCst),
        current: inner.generation.clone(),
    };
    {
        let mut status = lock(&inner.status);
        status.phase = SyncPhase::Syncing;
        status.last_attempt = Some(Utc::now());
    }

    let result = inner.round.run(&ctx).await;
    inner.in_flight.store(false, Ordering::SeqCst);

    if !ctx.is_current() {
        tracing::info!("Discarding sync round started under a previous configuration");
        lock(&inner.status).phase = SyncPhase::Idle;
        return Some(RoundOutcome::Discarded);
    }

    let outcome = {
        let mut status = lock(&inner.status);
        match result {
            Ok(RoundOutcome::Completed(report)) => {
                status.last_success = Some(Utc::now());
                status.last_error = None;
                status.phase = SyncPhase::Synced;
                tracing::info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    deletions = report.deletions,
                    "Sync round completed"
                );
                inner.events.publish(SyncEvent::SyncCompleted {
                    collection: None,
                    conflicts: 0,
                });
                Some(RoundOutcome::Completed(report))
            }
            Ok(RoundOutcome::Discarded) => {
                status.phase = SyncPhase::Idle;
                return Some(RoundOutcome::Discarded);
            }
            Err(error) => {
                status.phase = match &error {
                    Error::Transport(transport) if transport.is_connectivity() => {
                        SyncPhase::Offline
                    }
                    _ => SyncPhase::Error,
                };
                status.last_error = Some(error.to_string());
                tracing::warn!("Sync round failed: {error}");
                inner
                    .events
                    .notify(Notice::error(format!("Sync failed: {error}")).with_retry());
                None
            }
        }
    };

    let status = status_of(&inner);
    inner.round.record_status(&status).await;
    outcome
}

fn status_of(inner: &Inner) -> SyncStatus {
    let config = inner.config();
    let status = lock(&inner.status);
    SyncStatus {
        last: status.last_success,
        error: status.last_error.clone(),
        enabled: config.enabled,
        last_attempt: status.last_attempt,
        phase: status.phase,
        role: config.role,
    }
}

/// Timer-driven sync state machine for one device.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.inner.config())
            .finish_non_exhaustive()
    }
}

impl SyncScheduler {
    pub fn new(config: SyncConfig, round: Arc<dyn SyncRound>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                status: Mutex::new(StatusState::default()),
                generation: Arc::new(AtomicU64::new(0)),
                in_flight: AtomicBool::new(false),
                timer: Mutex::new(None),
                round,
                events,
            }),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.inner.config()
    }

    pub fn status(&self) -> SyncStatus {
        status_of(&self.inner)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    /// Start the timer for the current configuration.
    pub fn start(&self) {
        self.inner.reschedule();
    }

    /// Cancel the timer. A round in flight finishes but is discarded.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
    }

    /// Run one round now and return the resulting status.
    pub async fn sync_now(&self) -> SyncStatus {
        run_round(self.inner.clone()).await;
        self.status()
    }

    /// Start a round in the background.
    pub fn trigger(&self) {
        tokio::spawn(run_round(self.inner.clone()));
    }

    pub fn set_role(&self, role: SyncRole) {
        self.update(|config| config.role = role);
    }

    pub fn set_server_url(&self, server_url: impl Into<String>) {
        let server_url = server_url.into();
        self.update(|config| config.server_url = server_url.trim().trim_end_matches('/').to_string());
    }

    pub fn set_interval(&self, interval_minutes: u64) {
        self.update(|config| config.interval_minutes = interval_minutes);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|config| config.enabled = enabled);
    }

    pub fn update_config(&self, next: SyncConfig) {
        self.update(|config| *config = next);
    }

    /// Apply a change, reschedule the timer and, when the result is
    /// runnable, start one round immediately.
    fn update(&self, change: impl FnOnce(&mut SyncConfig)) {
        let config = {
            let mut config = lock(&self.inner.config);
            change(&mut config);
            config.clone()
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            role = %config.role,
            interval_minutes = config.interval_minutes,
            enabled = config.enabled,
            "Sync configuration changed"
        );

        self.inner.reschedule();
        if config.can_sync() {
            self.trigger();
        }
    }
}
