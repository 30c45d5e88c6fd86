//! Sync orchestration: one reconciliation run for one router.
//!
//! Each invocation walks the state machine
//! `Idle -> Locked -> Fetching -> Reconciling -> Persisting -> Done`,
//! dropping to `Failed` from any non-terminal state. The per-router lock
//! is held for the whole run and released on every exit path by its RAII
//! guard, so a failed or cancelled sync never strands a router locked.

use crate::config::SyncConfig;
use crate::directory::{ApplyBatch, CustomerDirectory};
use crate::error::{Result, RosterError, SyncError};
use crate::lock::RouterLockManager;
use crate::reconcile;
use crate::registry::RouterRegistry;
use crate::roster::{RosterClient, RosterTarget};
use crate::types::{DeviceAccount, RouterId, SyncRecordError, SyncResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Phase of one sync invocation, for logging and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not started.
    Idle,
    /// Exclusivity lock held.
    Locked,
    /// Roster fetch in flight.
    Fetching,
    /// Diffing roster against the directory view.
    Reconciling,
    /// Committing the batch.
    Persisting,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

impl SyncPhase {
    /// Phase name for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Locked => "locked",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Persisting => "persisting",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }
}

/// Coordinates sync runs across routers.
///
/// Cheap to clone via the contained `Arc`s; one instance is shared by all
/// API handlers. Syncs for distinct routers run concurrently without any
/// coordination beyond their independent locks.
#[derive(Clone)]
pub struct SyncOrchestrator {
    roster: Arc<dyn RosterClient>,
    directory: Arc<dyn CustomerDirectory>,
    registry: Arc<dyn RouterRegistry>,
    locks: RouterLockManager,
    config: SyncConfig,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        roster: Arc<dyn RosterClient>,
        directory: Arc<dyn CustomerDirectory>,
        registry: Arc<dyn RouterRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            roster,
            directory,
            registry,
            locks: RouterLockManager::new(),
            config,
        }
    }

    /// The lock manager, shared with callers that must observe sync
    /// exclusivity (e.g. router deletion).
    pub fn locks(&self) -> &RouterLockManager {
        &self.locks
    }

    /// The registry this orchestrator records sync metadata into.
    pub fn registry(&self) -> &Arc<dyn RouterRegistry> {
        &self.registry
    }

    /// The directory this orchestrator converges.
    pub fn directory(&self) -> &Arc<dyn CustomerDirectory> {
        &self.directory
    }

    /// Runs one sync for one router and returns its summary.
    #[instrument(skip(self), fields(router_id = %router_id))]
    pub async fn sync_router(&self, router_id: &RouterId) -> Result<SyncResult> {
        // Precondition check before any lock is taken.
        let router = self
            .registry
            .get(router_id)
            .await?
            .ok_or_else(|| SyncError::RouterNotFound(router_id.clone()))?;

        let _guard = self
            .locks
            .try_acquire(router_id)
            .ok_or_else(|| SyncError::SyncInProgress(router_id.clone()))?;
        debug!(phase = SyncPhase::Locked.as_str(), "Sync started");

        // From here on the guard's Drop releases the lock on every path.
        debug!(phase = SyncPhase::Fetching.as_str(), host = %router.host, "Fetching roster");
        let target = RosterTarget::for_router(&router);
        let roster = self.fetch_with_retry(&target).await?;

        debug!(
            phase = SyncPhase::Reconciling.as_str(),
            roster_len = roster.len(),
            "Reconciling"
        );
        let existing = self.directory.list_by_router(router_id).await?;
        let now = Utc::now();
        let plan = reconcile::diff(
            &existing,
            &roster,
            now,
            &self.config.plan_map,
            self.config.absent_policy,
        );

        debug!(
            phase = SyncPhase::Persisting.as_str(),
            creates = plan.to_create.len(),
            updates = plan.to_update.len(),
            unchanged = plan.unchanged.len(),
            deletes = plan.to_delete.len(),
            "Applying batch"
        );
        let deletes_len = plan.to_delete.len() as u64;
        let unchanged_len = plan.unchanged.len() as u64;
        let outcome = self
            .directory
            .apply_batch(
                router_id,
                ApplyBatch {
                    creates: plan.to_create,
                    updates: plan.to_update,
                    touches: plan.unchanged,
                    deletes: plan.to_delete,
                },
            )
            .await?;

        let customer_count =
            existing.len() as u64 + outcome.created.len() as u64 - deletes_len;
        self.registry
            .record_sync(router_id, now, customer_count)
            .await?;

        let result = SyncResult {
            synced_count: roster.len() as u64,
            created_count: outcome.created.len() as u64,
            updated_count: outcome.updated.len() as u64,
            unchanged_count: unchanged_len,
            last_sync: now,
            errors: outcome
                .violations
                .into_iter()
                .map(|v| SyncRecordError {
                    username: v.username,
                    reason: "username already exists for this router".to_string(),
                })
                .collect(),
        };

        info!(
            phase = SyncPhase::Done.as_str(),
            synced = result.synced_count,
            created = result.created_count,
            updated = result.updated_count,
            unchanged = result.unchanged_count,
            record_errors = result.errors.len(),
            "Sync complete"
        );
        Ok(result)
    }

    /// Fetches the roster with a per-attempt timeout and a bounded retry
    /// budget for transient failures. `AuthRejected` and `Unreachable`
    /// surface immediately; worst-case elapsed time is bounded by
    /// `fetch_timeout * (1 + max_retries)` plus the fixed backoffs.
    async fn fetch_with_retry(
        &self,
        target: &RosterTarget,
    ) -> Result<Vec<DeviceAccount>> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let error = match tokio::time::timeout(
                self.config.fetch_timeout,
                self.roster.fetch_roster(target),
            )
            .await
            {
                Ok(Ok(roster)) => return Ok(roster),
                Ok(Err(e)) => e,
                Err(_) => RosterError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            };

            if !error.is_transient() || attempt >= self.config.max_retries {
                warn!(attempt, error = %error, "Roster fetch failed");
                return Err(SyncError::Roster(error));
            }

            attempt += 1;
            warn!(
                attempt,
                max_retries = self.config.max_retries,
                error = %error,
                "Roster fetch failed, retrying"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::registry::MemoryRegistry;
    use crate::roster::FixtureRosterClient;
    use crate::types::Router;
    use std::time::Duration;

    fn router(id: &str) -> Router {
        Router {
            id: RouterId::from(id),
            host: "192.0.2.1".to_string(),
            port: 8728,
            api_user: "admin".to_string(),
            api_password: "password".to_string(),
            label: format!("edge-{id}"),
            last_sync: None,
            customer_count: 0,
        }
    }

    fn account(username: &str) -> DeviceAccount {
        DeviceAccount {
            username: username.to_string(),
            secret: format!("{username}-secret"),
            enabled: true,
            profile: "10M".to_string(),
        }
    }

    fn orchestrator(
        roster: Arc<FixtureRosterClient>,
        config: SyncConfig,
    ) -> (SyncOrchestrator, Arc<MemoryDirectory>, Arc<MemoryRegistry>) {
        let directory = Arc::new(MemoryDirectory::new());
        let registry = Arc::new(MemoryRegistry::with_routers([router("r1")]));
        let orch = SyncOrchestrator::new(
            roster,
            Arc::clone(&directory) as Arc<dyn CustomerDirectory>,
            Arc::clone(&registry) as Arc<dyn crate::registry::RouterRegistry>,
            config,
        );
        (orch, directory, registry)
    }

    #[tokio::test]
    async fn test_unknown_router_fails_without_locking() {
        let roster = Arc::new(FixtureRosterClient::new());
        let (orch, _, _) = orchestrator(roster, SyncConfig::default());

        let missing = RouterId::from("nope");
        let err = orch.sync_router(&missing).await.unwrap_err();
        assert_eq!(err, SyncError::RouterNotFound(missing.clone()));
        assert!(!orch.locks().is_locked(&missing));
    }

    #[tokio::test]
    async fn test_auth_rejected_not_retried() {
        let roster = Arc::new(FixtureRosterClient::new());
        roster.fail_next(RosterError::AuthRejected);
        let (orch, _, _) = orchestrator(Arc::clone(&roster), SyncConfig::default());

        let err = orch.sync_router(&RouterId::from("r1")).await.unwrap_err();
        assert_eq!(err, SyncError::Roster(RosterError::AuthRejected));
        assert_eq!(roster.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_protocol_error_retried_within_budget() {
        let roster = Arc::new(FixtureRosterClient::with_roster(vec![account("alice")]));
        roster.fail_next(RosterError::ProtocolError("garbled".into()));
        roster.fail_next(RosterError::ProtocolError("garbled".into()));

        let config = SyncConfig {
            retry_backoff: Duration::from_millis(1),
            ..SyncConfig::default()
        };
        let (orch, _, _) = orchestrator(Arc::clone(&roster), config);

        let result = orch.sync_router(&RouterId::from("r1")).await.unwrap();
        assert_eq!(result.created_count, 1);
        assert_eq!(roster.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_lock_released_after_failure() {
        let roster = Arc::new(FixtureRosterClient::new());
        roster.fail_next(RosterError::Unreachable("refused".into()));
        let (orch, _, _) = orchestrator(Arc::clone(&roster), SyncConfig::default());

        let r1 = RouterId::from("r1");
        assert!(orch.sync_router(&r1).await.is_err());
        assert!(!orch.locks().is_locked(&r1));

        // Next run proceeds normally.
        assert!(orch.sync_router(&r1).await.is_ok());
    }
}
