//! Per-router sync exclusivity locks.
//!
//! At most one sync runs per router at any time. Contending callers are
//! rejected immediately rather than queued; a user pressing "sync" again
//! is expected to retry later. The guard releases on every exit path,
//! including cancellation and panic, via `Drop`.

use crate::types::RouterId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Manager of per-router exclusivity locks.
#[derive(Clone, Default)]
pub struct RouterLockManager {
    held: Arc<Mutex<HashSet<RouterId>>>,
    acquisition_count: Arc<AtomicU64>,
}

impl RouterLockManager {
    /// Creates a manager with no locks held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock for one router.
    ///
    /// Returns `None` without blocking when the router is already locked.
    pub fn try_acquire(&self, router_id: &RouterId) -> Option<RouterLockGuard> {
        let mut held = self.held.lock();
        if !held.insert(router_id.clone()) {
            return None;
        }
        self.acquisition_count.fetch_add(1, Ordering::Relaxed);
        debug!(router_id = %router_id, "Acquired sync lock");

        Some(RouterLockGuard {
            router_id: router_id.clone(),
            held: Arc::clone(&self.held),
        })
    }

    /// Whether a sync currently holds the lock for this router.
    pub fn is_locked(&self, router_id: &RouterId) -> bool {
        self.held.lock().contains(router_id)
    }

    /// Total successful acquisitions since startup.
    pub fn acquisition_count(&self) -> u64 {
        self.acquisition_count.load(Ordering::Relaxed)
    }
}

/// RAII guard for one router's sync lock.
pub struct RouterLockGuard {
    router_id: RouterId,
    held: Arc<Mutex<HashSet<RouterId>>>,
}

impl RouterLockGuard {
    /// Router this guard locks.
    pub fn router_id(&self) -> &RouterId {
        &self.router_id
    }
}

impl Drop for RouterLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.router_id);
        debug!(router_id = %self.router_id, "Released sync lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let locks = RouterLockManager::new();
        let r1 = RouterId::from("r1");

        let guard = locks.try_acquire(&r1).unwrap();
        assert!(locks.is_locked(&r1));
        assert!(locks.try_acquire(&r1).is_none());

        drop(guard);
        assert!(!locks.is_locked(&r1));
        assert!(locks.try_acquire(&r1).is_some());
    }

    #[test]
    fn test_independent_routers() {
        let locks = RouterLockManager::new();
        let g1 = locks.try_acquire(&RouterId::from("r1"));
        let g2 = locks.try_acquire(&RouterId::from("r2"));

        assert!(g1.is_some());
        assert!(g2.is_some());
        assert_eq!(locks.acquisition_count(), 2);
    }

    #[test]
    fn test_release_on_panic() {
        let locks = RouterLockManager::new();
        let r1 = RouterId::from("r1");

        let locks_clone = locks.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = locks_clone.try_acquire(&RouterId::from("r1")).unwrap();
            panic!("sync blew up");
        }));

        assert!(result.is_err());
        assert!(!locks.is_locked(&r1));
    }
}
