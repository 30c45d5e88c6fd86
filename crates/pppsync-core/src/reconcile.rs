//! Pure reconciliation: diff a fresh device roster against the directory's
//! current view for one router.
//!
//! The function here is total and deterministic. It performs no I/O and
//! reads no clock; the caller supplies `now`. Everything downstream of a
//! roster fetch is therefore unit-testable without mocks.

use crate::config::{AbsentAccountPolicy, PlanMap};
use crate::types::{Customer, CustomerId, CustomerStatus, DeviceAccount, PlanId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Specification of a customer to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    /// PPPoE username (matching key).
    pub username: String,
    /// Password mirrored from the device secret.
    pub password: String,
    /// Derived from the device-side enabled flag.
    pub status: CustomerStatus,
    /// Plan mapped from the device profile, if the map resolves it.
    pub plan_id: Option<PlanId>,
    /// Raw device profile tag.
    pub external_profile: String,
    /// Observation timestamp.
    pub last_seen_at: DateTime<Utc>,
}

/// Minimal patch for an existing customer: only changed fields are set,
/// plus the refreshed observation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomerPatch {
    /// New status, when it changed.
    pub status: Option<CustomerStatus>,
    /// New password, when the device secret changed.
    pub password: Option<String>,
    /// New profile tag, when it changed.
    pub external_profile: Option<String>,
    /// Refreshed `last_seen_at`.
    pub last_seen_at: DateTime<Utc>,
}

impl CustomerPatch {
    /// True when the patch carries a field change beyond the timestamp.
    pub fn has_changes(&self) -> bool {
        self.status.is_some() || self.password.is_some() || self.external_profile.is_some()
    }
}

/// An update to apply, addressed both by id and by username so storage
/// backends can pick whichever key they index on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSpec {
    /// Customer to patch.
    pub id: CustomerId,
    /// Username of that customer (per-router unique).
    pub username: String,
    /// The minimal patch.
    pub patch: CustomerPatch,
}

/// A lightweight `last_seen_at` touch for an unchanged customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchSpec {
    /// Customer to touch.
    pub id: CustomerId,
    /// Username of that customer.
    pub username: String,
    /// Refreshed observation timestamp.
    pub last_seen_at: DateTime<Utc>,
}

/// A deletion, emitted only under [`AbsentAccountPolicy::Delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSpec {
    /// Customer to delete.
    pub id: CustomerId,
    /// Username of that customer.
    pub username: String,
}

/// Output of one reconciliation: the minimal set of directory operations
/// needed to converge on the device roster.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// Roster accounts with no directory match.
    pub to_create: Vec<NewCustomer>,
    /// Matched accounts whose mirrored fields differ.
    pub to_update: Vec<UpdateSpec>,
    /// Matched and field-equal accounts; touched, not counted as updated.
    pub unchanged: Vec<TouchSpec>,
    /// Customers absent from the roster, under the delete policy only.
    pub to_delete: Vec<DeleteSpec>,
}

/// Computes the diff between the directory view and the device roster.
///
/// Matching is by exact, case-sensitive username, scoped to the single
/// router whose records were passed in. Customers absent from the roster
/// are handled per `absent_policy`; the default keeps them untouched.
pub fn diff(
    existing: &[Customer],
    roster: &[DeviceAccount],
    now: DateTime<Utc>,
    plan_map: &PlanMap,
    absent_policy: AbsentAccountPolicy,
) -> ReconcilePlan {
    let by_username: HashMap<&str, &Customer> = existing
        .iter()
        .map(|c| (c.username.as_str(), c))
        .collect();

    let mut plan = ReconcilePlan::default();
    let mut seen: HashMap<&str, ()> = HashMap::with_capacity(roster.len());

    for account in roster {
        // A device reporting the same username twice is collapsed to the
        // first occurrence; the roster is set-equal by contract.
        if seen.insert(account.username.as_str(), ()).is_some() {
            continue;
        }

        match by_username.get(account.username.as_str()) {
            None => plan.to_create.push(NewCustomer {
                username: account.username.clone(),
                password: account.secret.clone(),
                status: CustomerStatus::from_enabled(account.enabled),
                plan_id: plan_map.lookup(&account.profile),
                external_profile: account.profile.clone(),
                last_seen_at: now,
            }),
            Some(customer) => {
                let patch = patch_for(customer, account, now);
                if patch.has_changes() {
                    plan.to_update.push(UpdateSpec {
                        id: customer.id.clone(),
                        username: customer.username.clone(),
                        patch,
                    });
                } else {
                    plan.unchanged.push(TouchSpec {
                        id: customer.id.clone(),
                        username: customer.username.clone(),
                        last_seen_at: now,
                    });
                }
            }
        }
    }

    if absent_policy != AbsentAccountPolicy::Keep {
        for customer in existing {
            if seen.contains_key(customer.username.as_str()) {
                continue;
            }
            match absent_policy {
                AbsentAccountPolicy::Keep => {}
                AbsentAccountPolicy::Disable => {
                    // Already-disabled absentees need no patch.
                    if customer.status != CustomerStatus::Disabled {
                        plan.to_update.push(UpdateSpec {
                            id: customer.id.clone(),
                            username: customer.username.clone(),
                            patch: CustomerPatch {
                                status: Some(CustomerStatus::Disabled),
                                last_seen_at: customer.last_seen_at,
                                ..Default::default()
                            },
                        });
                    }
                }
                AbsentAccountPolicy::Delete => plan.to_delete.push(DeleteSpec {
                    id: customer.id.clone(),
                    username: customer.username.clone(),
                }),
            }
        }
    }

    plan
}

/// Builds the minimal patch for a matched roster account.
fn patch_for(customer: &Customer, account: &DeviceAccount, now: DateTime<Utc>) -> CustomerPatch {
    let mut patch = CustomerPatch {
        last_seen_at: now,
        ..Default::default()
    };

    let status = CustomerStatus::from_enabled(account.enabled);
    if customer.status != status {
        patch.status = Some(status);
    }
    if customer.password != account.secret {
        patch.password = Some(account.secret.clone());
    }
    if customer.external_profile != account.profile {
        patch.external_profile = Some(account.profile.clone());
    }

    patch
}
