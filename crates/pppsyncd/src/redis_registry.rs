//! Redis-backed router registry.
//!
//! Each router is a hash at `ROUTER_TABLE:{id}`. `record_sync` updates
//! the run metadata fields in one atomic pipeline so a crash between
//! fields cannot leave a half-recorded run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pppsync_core::{DirectoryError, Router, RouterId, RouterRegistry};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, instrument};

const ROUTER_TABLE_NAME: &str = "ROUTER_TABLE";

/// Router registry backed by Redis.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
}

impl RedisRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(router_id: &RouterId) -> String {
        format!("{ROUTER_TABLE_NAME}:{router_id}")
    }

    fn parse_router(router_id: &RouterId, fields: &HashMap<String, String>) -> Option<Router> {
        let host = fields.get("host")?;
        let port = fields.get("port").and_then(|p| p.parse().ok()).unwrap_or(8728);
        let last_sync: Option<DateTime<Utc>> = fields
            .get("last_sync")
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok());

        Some(Router {
            id: router_id.clone(),
            host: host.clone(),
            port,
            api_user: fields.get("api_user").cloned().unwrap_or_default(),
            api_password: fields.get("api_password").cloned().unwrap_or_default(),
            label: fields.get("label").cloned().unwrap_or_default(),
            last_sync,
            customer_count: fields
                .get("customer_count")
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
        })
    }

    fn router_fields(router: &Router) -> Vec<(&'static str, String)> {
        vec![
            ("host", router.host.clone()),
            ("port", router.port.to_string()),
            ("api_user", router.api_user.clone()),
            ("api_password", router.api_password.clone()),
            ("label", router.label.clone()),
            (
                "last_sync",
                router
                    .last_sync
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ),
            ("customer_count", router.customer_count.to_string()),
        ]
    }
}

#[async_trait]
impl RouterRegistry for RedisRegistry {
    #[instrument(skip(self))]
    async fn get(&self, router_id: &RouterId) -> Result<Option<Router>, DirectoryError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(Self::key(router_id))
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Self::parse_router(router_id, &fields))
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Router>, DirectoryError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{ROUTER_TABLE_NAME}:*");
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let mut routers = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(id) = key.strip_prefix(&format!("{ROUTER_TABLE_NAME}:")) else {
                continue;
            };
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
            if let Some(router) = Self::parse_router(&RouterId::from(id), &fields) {
                routers.push(router);
            }
        }
        routers.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(routers)
    }

    #[instrument(skip(self, router), fields(router_id = %router.id))]
    async fn put(&self, router: Router) -> Result<(), DirectoryError> {
        let mut conn = self.conn.clone();
        let key = Self::key(&router.id);
        let fields = Self::router_fields(&router);
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        debug!(router_id = %router.id, "Stored router");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, router_id: &RouterId) -> Result<bool, DirectoryError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(Self::key(router_id))
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn record_sync(
        &self,
        router_id: &RouterId,
        last_sync: DateTime<Utc>,
        customer_count: u64,
    ) -> Result<(), DirectoryError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::key(router_id), "last_sync", last_sync.to_rfc3339())
            .hset(
                Self::key(router_id),
                "customer_count",
                customer_count.to_string(),
            );
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
