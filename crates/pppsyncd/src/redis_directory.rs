//! Redis-backed customer directory.
//!
//! Customers live in hashes keyed `CUSTOMER_TABLE:{router_id}:{username}`,
//! so the `(router_id, username)` uniqueness invariant is the key itself.
//! Batches execute inside a single Lua script, which Redis runs atomically:
//! a failed script commits nothing, and key conflicts on creates are
//! reported back as per-record violations instead of failing the batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pppsync_core::{
    ApplyBatch, BatchOutcome, ConstraintViolation, Customer, CustomerDirectory, CustomerId,
    CustomerStatus, DirectoryError, PlanId, RouterId,
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Redis table prefix for customer records.
const CUSTOMER_TABLE_NAME: &str = "CUSTOMER_TABLE";

/// Lua program applying one reconciliation batch atomically.
///
/// ARGV[1] is a JSON document with `prefix`, `creates`, `updates`,
/// `touches` and `deletes`. Returns two arrays: usernames whose creates
/// were skipped because the key already existed, and usernames whose
/// updates found their key and applied. Updates and touches against a
/// concurrently deleted key are skipped rather than resurrecting a
/// partial hash.
const APPLY_BATCH_SCRIPT: &str = r#"
local batch = cjson.decode(ARGV[1])
local violations = {}
local updated = {}

for _, c in ipairs(batch.creates) do
    local key = batch.prefix .. c.username
    if redis.call('EXISTS', key) == 1 then
        violations[#violations + 1] = c.username
    else
        redis.call('HSET', key,
            'id', c.id,
            'password', c.password,
            'status', c.status,
            'plan_id', c.plan_id,
            'external_profile', c.external_profile,
            'last_seen_at', c.last_seen_at)
    end
end

for _, u in ipairs(batch.updates) do
    local key = batch.prefix .. u.username
    if redis.call('EXISTS', key) == 1 then
        for field, value in pairs(u.fields) do
            redis.call('HSET', key, field, value)
        end
        updated[#updated + 1] = u.username
    end
end

for _, t in ipairs(batch.touches) do
    local key = batch.prefix .. t.username
    if redis.call('EXISTS', key) == 1 then
        redis.call('HSET', key, 'last_seen_at', t.last_seen_at)
    end
end

for _, d in ipairs(batch.deletes) do
    redis.call('DEL', batch.prefix .. d.username)
end

return {violations, updated}
"#;

/// Customer directory backed by Redis.
#[derive(Clone)]
pub struct RedisDirectory {
    conn: ConnectionManager,
}

impl RedisDirectory {
    /// Wraps an established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key_prefix(router_id: &RouterId) -> String {
        format!("{CUSTOMER_TABLE_NAME}:{router_id}:")
    }

    fn parse_customer(
        router_id: &RouterId,
        username: &str,
        fields: &HashMap<String, String>,
    ) -> Option<Customer> {
        let id = fields.get("id")?;
        let last_seen_at: DateTime<Utc> = fields.get("last_seen_at")?.parse().ok()?;
        let plan_id = fields
            .get("plan_id")
            .filter(|p| !p.is_empty())
            .map(|p| PlanId(p.clone()));

        Some(Customer {
            id: CustomerId(id.clone()),
            router_id: router_id.clone(),
            username: username.to_string(),
            password: fields.get("password").cloned().unwrap_or_default(),
            status: CustomerStatus::parse(fields.get("status").map(String::as_str).unwrap_or("")),
            plan_id,
            external_profile: fields.get("external_profile").cloned().unwrap_or_default(),
            last_seen_at,
        })
    }
}

#[async_trait]
impl CustomerDirectory for RedisDirectory {
    #[instrument(skip(self))]
    async fn list_by_router(
        &self,
        router_id: &RouterId,
    ) -> Result<Vec<Customer>, DirectoryError> {
        let mut conn = self.conn.clone();
        let prefix = Self::key_prefix(router_id);
        let pattern = format!("{prefix}*");

        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let mut customers = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
            if fields.is_empty() {
                continue;
            }
            let username = key.strip_prefix(&prefix).unwrap_or(&key);
            if let Some(customer) = Self::parse_customer(router_id, username, &fields) {
                customers.push(customer);
            }
        }

        debug!(router_id = %router_id, count = customers.len(), "Listed customers");
        Ok(customers)
    }

    #[instrument(skip(self, batch), fields(
        creates = batch.creates.len(),
        updates = batch.updates.len(),
        touches = batch.touches.len(),
        deletes = batch.deletes.len(),
    ))]
    async fn apply_batch(
        &self,
        router_id: &RouterId,
        batch: ApplyBatch,
    ) -> Result<BatchOutcome, DirectoryError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // Ids are assigned up front; violating creates are simply skipped
        // by the script and their ids discarded.
        let creates: Vec<(CustomerId, serde_json::Value)> = batch
            .creates
            .iter()
            .map(|c| {
                let id = CustomerId::generate();
                let value = json!({
                    "username": c.username,
                    "id": id.0,
                    "password": c.password,
                    "status": c.status.as_str(),
                    "plan_id": c.plan_id.as_ref().map(|p| p.0.clone()).unwrap_or_default(),
                    "external_profile": c.external_profile,
                    "last_seen_at": c.last_seen_at.to_rfc3339(),
                });
                (id, value)
            })
            .collect();

        let updates: Vec<serde_json::Value> = batch
            .updates
            .iter()
            .map(|u| {
                let mut fields = serde_json::Map::new();
                if let Some(status) = u.patch.status {
                    fields.insert("status".into(), status.as_str().into());
                }
                if let Some(ref password) = u.patch.password {
                    fields.insert("password".into(), password.clone().into());
                }
                if let Some(ref profile) = u.patch.external_profile {
                    fields.insert("external_profile".into(), profile.clone().into());
                }
                fields.insert(
                    "last_seen_at".into(),
                    u.patch.last_seen_at.to_rfc3339().into(),
                );
                json!({ "username": u.username, "fields": fields })
            })
            .collect();

        let payload = json!({
            "prefix": Self::key_prefix(router_id),
            "creates": creates.iter().map(|(_, v)| v).collect::<Vec<_>>(),
            "updates": updates,
            "touches": batch
                .touches
                .iter()
                .map(|t| json!({
                    "username": t.username,
                    "last_seen_at": t.last_seen_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
            "deletes": batch
                .deletes
                .iter()
                .map(|d| json!({ "username": d.username }))
                .collect::<Vec<_>>(),
        });

        let script = redis::Script::new(APPLY_BATCH_SCRIPT);
        let mut conn = self.conn.clone();
        let (violated, applied): (Vec<String>, Vec<String>) = script
            .arg(payload.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let created = creates
            .into_iter()
            .zip(batch.creates.iter())
            .filter(|(_, c)| !violated.contains(&c.username))
            .map(|((id, _), _)| id)
            .collect();

        Ok(BatchOutcome {
            created,
            updated: updated_ids(&batch, &applied),
            violations: violated
                .into_iter()
                .map(|username| ConstraintViolation { username })
                .collect(),
        })
    }
}

/// Ids of the requested updates whose keys the script found and patched.
fn updated_ids(batch: &ApplyBatch, applied: &[String]) -> Vec<CustomerId> {
    batch
        .updates
        .iter()
        .filter(|u| applied.contains(&u.username))
        .map(|u| u.id.clone())
        .collect()
}
