use std::time::Duration;

use keel_core::config::SyncConfig;
use keel_core::events::{Notice, NoticeLevel};
use keel_core::sync::SyncScheduler;
use keel_core::SyncEvent;

use crate::context::ClientContext;
use crate::error::CliError;

/// How often a running daemon picks up `keel config set` changes.
const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run_daemon(ctx: &ClientContext) -> Result<(), CliError> {
    let mut config = ctx.sync_config().await;
    if !config.can_sync() {
        return Err(CliError::SyncNotConfigured);
    }

    let mut subscription = ctx.events.subscribe();
    let scheduler = ctx.scheduler().await;
    scheduler.start();
    scheduler.trigger();
    ctx.queue.start_monitoring();
    tracing::info!(
        server = %config.server_url,
        interval_minutes = config.interval_minutes,
        "Sync daemon started"
    );
    println!(
        "Syncing with {} every {} min, press Ctrl-C to stop",
        config.server_url, config.interval_minutes
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut reload = tokio::time::interval_at(
        tokio::time::Instant::now() + CONFIG_RELOAD_INTERVAL,
        CONFIG_RELOAD_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = reload.tick() => {
                reload_config(ctx, &scheduler, &mut config).await;
            }
            result = &mut shutdown => {
                if let Err(error) = result {
                    tracing::warn!("Failed to listen for shutdown signal: {error}");
                }
                break;
            }
            event = subscription.recv() => match event {
                Some(SyncEvent::Notice(notice)) => println!("{}", format_notice(&notice)),
                Some(event) => tracing::debug!(?event, "Sync event"),
                None => break,
            },
        }
    }

    scheduler.stop();
    ctx.queue.stop_monitoring();
    println!("Stopped");
    Ok(())
}

/// Hand stored settings that differ from `current` to the scheduler and the
/// queue. Returns whether anything changed.
pub async fn reload_config(
    ctx: &ClientContext,
    scheduler: &SyncScheduler,
    current: &mut SyncConfig,
) -> bool {
    let stored = ctx.sync_config().await;
    if stored == *current {
        return false;
    }
    tracing::info!(
        role = %stored.role,
        server = %stored.server_url,
        interval_minutes = stored.interval_minutes,
        enabled = stored.enabled,
        "Sync settings changed"
    );
    if stored.server_url != current.server_url {
        ctx.refresh_client(&stored);
    }
    scheduler.update_config(stored.clone());
    *current = stored;
    true
}

pub fn format_notice(notice: &Notice) -> String {
    let label = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    if notice.action.is_some() {
        format!("[{label}] {} (will retry)", notice.message)
    } else {
        format!("[{label}] {}", notice.message)
    }
}
