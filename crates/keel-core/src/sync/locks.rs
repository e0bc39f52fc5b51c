//! Per-collection mutual exclusion.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::CollectionKind;

/// One async lock per collection, shared between the offline queue, the
/// persistence managers and the scheduler so a sync and a queued write for
/// the same collection never overlap.
#[derive(Debug, Clone)]
pub struct CollectionLocks {
    locks: Arc<BTreeMap<CollectionKind, Arc<Mutex<()>>>>,
}

impl Default for CollectionLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionLocks {
    pub fn new() -> Self {
        let locks = CollectionKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            locks: Arc::new(locks),
        }
    }

    fn get(&self, kind: CollectionKind) -> Arc<Mutex<()>> {
        self.locks
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    /// Wait for the collection lock.
    pub async fn lock(&self, kind: CollectionKind) -> OwnedMutexGuard<()> {
        self.get(kind).lock_owned().await
    }

    /// Take the collection lock only if nobody holds it.
    pub fn try_lock(&self, kind: CollectionKind) -> Option<OwnedMutexGuard<()>> {
        self.get(kind).try_lock_owned().ok()
    }

    /// Lock every collection, always in the same order.
    pub async fn lock_all(&self) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(self.locks.len());
        for kind in CollectionKind::ALL {
            guards.push(self.lock(kind).await);
        }
        guards
    }
}
