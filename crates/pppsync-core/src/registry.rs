//! Router registry contract and the in-memory backend.
//!
//! The registry owns router connection metadata. The sync path reads a
//! router and writes back only `last_sync` and `customer_count`; all other
//! mutation belongs to external router CRUD.

use crate::error::DirectoryError;
use crate::types::{Router, RouterId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Store of registered access routers.
#[async_trait]
pub trait RouterRegistry: Send + Sync {
    /// Fetches one router by id.
    async fn get(&self, router_id: &RouterId)
        -> std::result::Result<Option<Router>, DirectoryError>;

    /// Lists all registered routers.
    async fn list(&self) -> std::result::Result<Vec<Router>, DirectoryError>;

    /// Inserts or replaces a router registration (external CRUD path).
    async fn put(&self, router: Router) -> std::result::Result<(), DirectoryError>;

    /// Removes a router registration. The caller must hold off while a
    /// sync for this router is in flight.
    async fn remove(&self, router_id: &RouterId) -> std::result::Result<bool, DirectoryError>;

    /// Records a successful sync: refreshes `last_sync` and the cached
    /// customer count. The only registry mutation the orchestrator makes.
    async fn record_sync(
        &self,
        router_id: &RouterId,
        last_sync: DateTime<Utc>,
        customer_count: u64,
    ) -> std::result::Result<(), DirectoryError>;
}

/// In-memory registry backend for tests and fixture-mode runs.
#[derive(Default)]
pub struct MemoryRegistry {
    routers: Mutex<HashMap<RouterId, Router>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the given routers.
    pub fn with_routers(routers: impl IntoIterator<Item = Router>) -> Self {
        let registry = Self::new();
        {
            let mut map = registry.routers.lock();
            for router in routers {
                map.insert(router.id.clone(), router);
            }
        }
        registry
    }
}

#[async_trait]
impl RouterRegistry for MemoryRegistry {
    async fn get(
        &self,
        router_id: &RouterId,
    ) -> std::result::Result<Option<Router>, DirectoryError> {
        Ok(self.routers.lock().get(router_id).cloned())
    }

    async fn list(&self) -> std::result::Result<Vec<Router>, DirectoryError> {
        let mut routers: Vec<Router> = self.routers.lock().values().cloned().collect();
        routers.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(routers)
    }

    async fn put(&self, router: Router) -> std::result::Result<(), DirectoryError> {
        self.routers.lock().insert(router.id.clone(), router);
        Ok(())
    }

    async fn remove(&self, router_id: &RouterId) -> std::result::Result<bool, DirectoryError> {
        Ok(self.routers.lock().remove(router_id).is_some())
    }

    async fn record_sync(
        &self,
        router_id: &RouterId,
        last_sync: DateTime<Utc>,
        customer_count: u64,
    ) -> std::result::Result<(), DirectoryError> {
        if let Some(router) = self.routers.lock().get_mut(router_id) {
            router.last_sync = Some(last_sync);
            router.customer_count = customer_count;
        }
        Ok(())
    }
}
