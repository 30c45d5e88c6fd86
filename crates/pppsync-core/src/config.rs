//! Engine configuration: fetch bounds, retry budget, absence policy and
//! the profile-to-plan mapping.

use crate::types::PlanId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default roster fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default retry budget for transient fetch failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default backoff between fetch retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What to do with a directory customer whose username no longer appears
/// on the device roster.
///
/// The observed system never exercised this path, so the choice is an
/// explicit configuration rather than a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsentAccountPolicy {
    /// Leave the customer untouched (status quo).
    #[default]
    Keep,
    /// Patch the customer to `disabled`.
    Disable,
    /// Delete the customer record.
    Delete,
}

impl AbsentAccountPolicy {
    /// Parses the CLI/config string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keep" => Some(Self::Keep),
            "disable" => Some(Self::Disable),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Deterministic mapping from device profile tags to plan ids.
///
/// Unmapped profiles leave the customer's `plan_id` empty; the engine
/// never invents plans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMap {
    entries: HashMap<String, PlanId>,
}

impl PlanMap {
    /// Creates an empty map (every profile unmapped).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a profile -> plan entry.
    pub fn insert(&mut self, profile: impl Into<String>, plan: PlanId) {
        self.entries.insert(profile.into(), plan);
    }

    /// Looks up the plan for a device profile tag.
    pub fn lookup(&self, profile: &str) -> Option<PlanId> {
        self.entries.get(profile).cloned()
    }

    /// Number of mapped profiles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no profiles are mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, PlanId)> for PlanMap {
    fn from_iter<I: IntoIterator<Item = (String, PlanId)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Configuration for one sync orchestrator instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-attempt bound on the roster fetch.
    pub fetch_timeout: Duration,
    /// Retries after the first attempt, applied to transient failures only.
    pub max_retries: u32,
    /// Pause between fetch attempts.
    pub retry_backoff: Duration,
    /// Policy for directory customers absent from the roster.
    pub absent_policy: AbsentAccountPolicy,
    /// Profile-to-plan mapping supplied by the operator.
    pub plan_map: PlanMap,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            absent_policy: AbsentAccountPolicy::default(),
            plan_map: PlanMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_policy_parse() {
        assert_eq!(
            AbsentAccountPolicy::parse("keep"),
            Some(AbsentAccountPolicy::Keep)
        );
        assert_eq!(
            AbsentAccountPolicy::parse("disable"),
            Some(AbsentAccountPolicy::Disable)
        );
        assert_eq!(
            AbsentAccountPolicy::parse("delete"),
            Some(AbsentAccountPolicy::Delete)
        );
        assert_eq!(AbsentAccountPolicy::parse("purge"), None);
    }

    #[test]
    fn test_absent_policy_default_is_keep() {
        assert_eq!(AbsentAccountPolicy::default(), AbsentAccountPolicy::Keep);
    }

    #[test]
    fn test_plan_map_lookup() {
        let mut map = PlanMap::new();
        map.insert("10M", PlanId::from("plan-10m"));

        assert_eq!(map.lookup("10M"), Some(PlanId::from("plan-10m")));
        assert_eq!(map.lookup("20M"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.absent_policy, AbsentAccountPolicy::Keep);
        assert!(config.plan_map.is_empty());
    }
}
