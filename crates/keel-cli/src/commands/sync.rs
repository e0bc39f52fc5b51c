use chrono::{DateTime, Utc};
use keel_core::config::SyncConfig;
use keel_core::models::{CollectionKind, Record, SyncState};
use keel_core::sync::{PersistenceManager, SyncReport, SyncStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cli::{SyncCommands, SyncedCollection};
use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_timestamp, ConflictItem,
};
use crate::context::ClientContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: &'static str,
    pub version: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub conflicts: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub config: SyncConfig,
    /// Outcome of the last full round run by `keel sync` or `keel daemon`
    pub last_round: Option<SyncStatus>,
    pub pending_operations: usize,
    pub collections: Vec<CollectionStatus>,
}

pub async fn run_sync(command: Option<SyncCommands>, ctx: &ClientContext) -> Result<(), CliError> {
    match command.unwrap_or(SyncCommands::Now) {
        SyncCommands::Now => run_sync_now(ctx).await,
        SyncCommands::Collection { collection } => match collection {
            SyncedCollection::Tasks => sync_collection(&ctx.tasks()).await,
            SyncedCollection::Notes => sync_collection(&ctx.notes()).await,
        },
        SyncCommands::Status { json } => run_sync_status(ctx, json).await,
        SyncCommands::Conflicts { limit, json } => run_sync_conflicts(ctx, limit, json).await,
    }
}

pub async fn run_sync_now(ctx: &ClientContext) -> Result<(), CliError> {
    let config = ctx.sync_config().await;
    if !config.can_sync() {
        return Err(CliError::SyncNotConfigured);
    }

    let pending = ctx.flush_queue().await;
    let status = ctx.scheduler().await.sync_now().await;
    if let Some(error) = status.error {
        return Err(CliError::SyncFailed(error));
    }

    println!("Sync completed");
    if pending > 0 {
        println!("{pending} queued change(s) could not be delivered yet");
    }
    Ok(())
}

async fn sync_collection<T>(manager: &PersistenceManager<T>) -> Result<(), CliError>
where
    T: Record + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    if manager.queue().client().is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let local = manager.load_local().await;
    let SyncReport {
        records,
        conflicts,
        pushed,
        skipped,
        error,
    } = manager.sync_with_server(local).await;

    if let Some(error) = error {
        return Err(CliError::SyncFailed(error));
    }
    if skipped {
        println!("Another sync of {} is running", manager.kind());
        return Ok(());
    }
    println!(
        "Synced {} {} ({} conflict(s){})",
        records.len(),
        manager.kind(),
        conflicts,
        if pushed { ", pushed changes" } else { "" }
    );
    Ok(())
}

pub async fn run_sync_status(ctx: &ClientContext, as_json: bool) -> Result<(), CliError> {
    let mut collections = Vec::with_capacity(CollectionKind::ALL.len());
    for kind in CollectionKind::ALL {
        let state: SyncState = ctx.store.load_sync_state(kind).await;
        collections.push(CollectionStatus {
            collection: kind.name(),
            version: state.version,
            last_sync: state.last_sync,
            conflicts: state.conflicts.len(),
        });
    }
    let report = StatusReport {
        config: ctx.sync_config().await,
        last_round: ctx.store.load_sync_status().await,
        pending_operations: ctx.queue.len().await,
        collections,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let config = &report.config;
    println!("role:      {}", config.role);
    println!(
        "server:    {}",
        if config.server_url.is_empty() { "(not set)" } else { &config.server_url }
    );
    println!("interval:  {} min", config.interval_minutes);
    println!("enabled:   {}", config.enabled);
    match &report.last_round {
        Some(round) => {
            let last = round
                .last
                .map_or_else(|| "never".to_string(), format_timestamp);
            println!("last sync: {last}");
            if let Some(error) = &round.error {
                println!("error:     {error}");
            }
        }
        None => println!("last sync: never"),
    }
    println!("pending:   {}", report.pending_operations);
    for collection in &report.collections {
        let last = collection
            .last_sync
            .map_or_else(|| "never".to_string(), format_timestamp);
        println!(
            "{:<10}  v{:<4}  last {last}  conflicts {}",
            collection.collection, collection.version, collection.conflicts
        );
    }
    Ok(())
}

pub async fn collect_conflicts(ctx: &ClientContext, limit: usize) -> Vec<ConflictItem> {
    let mut conflicts = Vec::new();
    for kind in CollectionKind::ALL {
        let state = ctx.store.load_sync_state(kind).await;
        conflicts.extend(
            state
                .conflicts
                .iter()
                .map(|conflict| (conflict.timestamp, conflict_to_item(kind.name(), conflict))),
        );
    }
    conflicts.sort_by(|a, b| b.0.cmp(&a.0));
    conflicts
        .into_iter()
        .take(limit)
        .map(|(_, item)| item)
        .collect()
}

pub async fn run_sync_conflicts(
    ctx: &ClientContext,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = collect_conflicts(ctx, limit).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
