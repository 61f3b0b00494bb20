//! Per-target advisory locks.
//!
//! One async mutex per target branch, created on first use. A guard is held
//! for the whole merge attempt, so within a process no two attempts ever
//! overlap on the same target. Across processes the tracker's exclusive
//! claim provides the same guarantee.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of target locks; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Exclusive hold on one target; released on drop.
#[derive(Debug)]
pub struct TargetGuard {
    target: String,
    _guard: OwnedMutexGuard<()>,
}

impl TargetGuard {
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        trace!(target_branch = %self.target, "Target lock released");
    }
}

impl TargetLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, target: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(target.to_string()).or_default())
    }

    /// Take the lock if nobody holds it.
    pub async fn try_acquire(&self, target: &str) -> Option<TargetGuard> {
        let lock = self.lock_for(target).await;
        lock.try_lock_owned().ok().map(|guard| TargetGuard {
            target: target.to_string(),
            _guard: guard,
        })
    }

    /// Wait for the lock.
    pub async fn acquire(&self, target: &str) -> TargetGuard {
        let lock = self.lock_for(target).await;
        let guard = lock.lock_owned().await;
        TargetGuard {
            target: target.to_string(),
            _guard: guard,
        }
    }
}
