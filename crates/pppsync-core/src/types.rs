//! Core types for PPPoE subscriber reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an access router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterId(pub String);

impl RouterId {
    /// Creates a fresh random router id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RouterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a customer record in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub String);

impl CustomerId {
    /// Creates a fresh random customer id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a service plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Access router registration.
///
/// `last_sync` and `customer_count` are mutated only by the sync
/// orchestrator; everything else is owned by router provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    /// Unique router id.
    pub id: RouterId,
    /// Management host (IP or DNS name). Not required to be unique.
    pub host: String,
    /// Management API port.
    pub port: u16,
    /// API username for the device management session.
    pub api_user: String,
    /// API password. Opaque; never logged.
    pub api_password: String,
    /// Human-readable label.
    pub label: String,
    /// Timestamp of the last successful sync, if any.
    pub last_sync: Option<DateTime<Utc>>,
    /// Cached number of directory customers owned by this router.
    pub customer_count: u64,
}

/// A PPPoE account as reported by the device.
///
/// Ephemeral: produced fresh by every roster fetch and never persisted.
/// It is the right-hand side of the reconciliation diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAccount {
    /// Device-side login name. The reconciliation matching key.
    pub username: String,
    /// Device-side password. May be empty when the device redacts it.
    pub secret: String,
    /// Whether the account is enabled on the device.
    pub enabled: bool,
    /// Device-side profile/service tag (e.g. "10M").
    pub profile: String,
}

/// Lifecycle status of a directory customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    /// Account enabled on the device.
    Active,
    /// Account disabled on the device (or absent under the disable policy).
    Disabled,
    /// Status could not be determined.
    Unknown,
}

impl CustomerStatus {
    /// String form as stored in the directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Disabled => "disabled",
            CustomerStatus::Unknown => "unknown",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => CustomerStatus::Active,
            "disabled" => CustomerStatus::Disabled,
            _ => CustomerStatus::Unknown,
        }
    }

    /// Status derived from the device-side enabled flag.
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CustomerStatus::Active
        } else {
            CustomerStatus::Disabled
        }
    }
}

/// Customer record in the central directory.
///
/// Invariant: `(router_id, username)` is unique across the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Unique customer id.
    pub id: CustomerId,
    /// Owning router.
    pub router_id: RouterId,
    /// PPPoE username, unique per router.
    pub username: String,
    /// Mirrors the device secret (or a local policy value).
    pub password: String,
    /// Lifecycle status.
    pub status: CustomerStatus,
    /// Mapped service plan, if the profile could be resolved.
    pub plan_id: Option<PlanId>,
    /// Raw device profile tag, kept for traceability.
    pub external_profile: String,
    /// Timestamp of the most recent sync that observed this account.
    pub last_seen_at: DateTime<Utc>,
}

/// Service plan. Owned externally; the engine only reads plans and maps
/// device profiles onto their ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Unique plan id.
    pub id: PlanId,
    /// Display name.
    pub name: String,
    /// Downstream capacity in kbit/s.
    pub download_kbps: u64,
    /// Upstream capacity in kbit/s.
    pub upload_kbps: u64,
}

/// Per-account failure collected during a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecordError {
    /// Username of the account that failed.
    pub username: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Summary returned by one sync run. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Number of accounts reported by the device roster.
    pub synced_count: u64,
    /// Customers created by this run.
    pub created_count: u64,
    /// Customers updated by this run.
    pub updated_count: u64,
    /// Customers observed but unchanged (lightweight touch only).
    pub unchanged_count: u64,
    /// Timestamp of this sync.
    pub last_sync: DateTime<Utc>,
    /// Ordered per-account failures. Empty on a fully clean run.
    pub errors: Vec<SyncRecordError>,
}
