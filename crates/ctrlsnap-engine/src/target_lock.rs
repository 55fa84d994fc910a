//! Per-target import serialization
//!
//! The upload and asset-poll queues run concurrently, so two imports for the
//! same `(target_type, target_name)` could otherwise interleave their
//! retention actions. Each target gets one async mutex, held from before
//! the import transaction begins until after it commits or rolls back.
//!
//! An entry lives only while some import holds or awaits it, so the map is
//! bounded by the number of targets in flight.

use ctrlsnap_core::model::TargetKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<TargetKey, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    locks: LockMap,
}

/// Exclusive hold on one target; dropping it releases the target and
/// forgets the entry when nobody else is waiting
#[derive(Debug)]
pub struct TargetGuard {
    guard: Option<OwnedMutexGuard<()>>,
    target: TargetKey,
    locks: LockMap,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.target)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.target);
        }
    }
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `target`; released when the guard drops
    pub async fn acquire(&self, target: &TargetKey) -> TargetGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(target.clone()).or_default())
        };
        TargetGuard {
            guard: Some(lock.lock_owned().await),
            target: target.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of targets currently held or awaited
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
