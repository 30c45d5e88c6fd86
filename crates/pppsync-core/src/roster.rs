//! Device roster client seam.
//!
//! The orchestrator talks to access devices only through [`RosterClient`],
//! so a live management-protocol transport and the deterministic
//! [`FixtureRosterClient`] are interchangeable. Fetches are all-or-nothing:
//! either a complete roster comes back or a [`RosterError`] does.

use crate::error::RosterError;
use crate::types::{DeviceAccount, Router};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Connection coordinates for one roster fetch.
///
/// Credentials travel explicitly with every call; there is no ambient
/// credential state, so concurrent syncs of different routers cannot
/// cross-talk.
#[derive(Debug, Clone)]
pub struct RosterTarget {
    /// Device host.
    pub host: String,
    /// Management API port.
    pub port: u16,
    /// API username.
    pub username: String,
    /// API password. Opaque; implementations must never log it.
    pub password: String,
}

impl RosterTarget {
    /// Builds the target for a registered router.
    pub fn for_router(router: &Router) -> Self {
        Self {
            host: router.host.clone(),
            port: router.port,
            username: router.api_user.clone(),
            password: router.api_password.clone(),
        }
    }
}

/// Fetches the authoritative PPPoE account roster from one access device.
///
/// Contract:
/// - idempotent: two calls with no device-side change return set-equal
///   rosters; ordering is not guaranteed,
/// - all-or-nothing: a reply with malformed entries fails the whole fetch
///   with [`RosterError::ProtocolError`],
/// - the caller owns the timeout; implementations should not block past a
///   reasonable internal bound of their own.
#[async_trait]
pub trait RosterClient: Send + Sync {
    /// Retrieves the complete subscriber roster from the device.
    async fn fetch_roster(&self, target: &RosterTarget)
        -> std::result::Result<Vec<DeviceAccount>, RosterError>;
}

/// Scripted behavior for one [`FixtureRosterClient`] fetch.
#[derive(Debug, Clone)]
enum FixtureStep {
    /// Fail with the given error.
    Fail(RosterError),
    /// Sleep without ever answering (the caller's timeout must fire).
    Hang,
}

/// Deterministic in-memory roster client.
///
/// First-class transport for offline deployments and the test double for
/// every orchestrator property. Failures can be scripted per call: each
/// queued step consumes one fetch, after which fetches serve the fixture
/// roster.
#[derive(Default)]
pub struct FixtureRosterClient {
    roster: Mutex<Vec<DeviceAccount>>,
    script: Mutex<VecDeque<FixtureStep>>,
    fetch_count: Mutex<u64>,
}

impl FixtureRosterClient {
    /// Creates a client serving an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client serving the given roster.
    pub fn with_roster(roster: Vec<DeviceAccount>) -> Self {
        let client = Self::new();
        *client.roster.lock() = roster;
        client
    }

    /// Replaces the fixture roster (simulates device-side changes).
    pub fn set_roster(&self, roster: Vec<DeviceAccount>) {
        *self.roster.lock() = roster;
    }

    /// Queues a failure for the next fetch.
    pub fn fail_next(&self, error: RosterError) {
        self.script.lock().push_back(FixtureStep::Fail(error));
    }

    /// Queues a hang: the next fetch never completes on its own.
    pub fn hang_next(&self) {
        self.script.lock().push_back(FixtureStep::Hang);
    }

    /// Queues hangs for every subsequent fetch.
    pub fn hang_forever(&self) {
        // A long queue stands in for "forever"; the retry budget is tiny.
        let mut script = self.script.lock();
        for _ in 0..64 {
            script.push_back(FixtureStep::Hang);
        }
    }

    /// Number of fetches attempted against this fixture.
    pub fn fetch_count(&self) -> u64 {
        *self.fetch_count.lock()
    }
}

#[async_trait]
impl RosterClient for FixtureRosterClient {
    async fn fetch_roster(
        &self,
        _target: &RosterTarget,
    ) -> std::result::Result<Vec<DeviceAccount>, RosterError> {
        *self.fetch_count.lock() += 1;

        let step = self.script.lock().pop_front();
        match step {
            Some(FixtureStep::Fail(error)) => Err(error),
            Some(FixtureStep::Hang) => {
                // Far past any sane caller timeout.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RosterError::Timeout { elapsed_ms: 3_600_000 })
            }
            None => Ok(self.roster.lock().clone()),
        }
    }
}
