//! Sync orchestration: the server-side snapshot service, the client
//! scheduler, the offline queue and per-collection persistence.

mod locks;
mod offline_queue;
mod persistence;
mod scheduler;
mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use locks::CollectionLocks;
pub use offline_queue::{OfflineQueue, QueuePassReport, QueueTuning};
pub use persistence::{PersistenceManager, SyncReport};
pub use scheduler::{
    ClientRound, RoundContext, RoundOutcome, RoundReport, SyncRound, SyncScheduler, SyncStatus,
};
pub use server::{
    AcceptReport, CollectionPush, SnapshotService, SyncLogEntry, DEFAULT_SYNC_LOG_CAPACITY,
};
