//! Customer directory contract and the deterministic in-memory backend.
//!
//! The orchestrator needs exactly two operations from persistent storage:
//! a per-router listing and an atomic batch apply. Uniqueness of
//! `(router_id, username)` is enforced here; a create racing a concurrent
//! manual creation surfaces as a per-record violation, not a failed batch.

use crate::error::DirectoryError;
use crate::reconcile::{DeleteSpec, NewCustomer, TouchSpec, UpdateSpec};
use crate::types::{Customer, CustomerId, RouterId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// One batch of directory operations produced by a reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ApplyBatch {
    /// Customers to create.
    pub creates: Vec<NewCustomer>,
    /// Customers to patch.
    pub updates: Vec<UpdateSpec>,
    /// Unchanged customers whose `last_seen_at` is refreshed.
    pub touches: Vec<TouchSpec>,
    /// Customers to delete (absent-account delete policy only).
    pub deletes: Vec<DeleteSpec>,
}

impl ApplyBatch {
    /// True when the batch performs no writes at all.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.touches.is_empty()
            && self.deletes.is_empty()
    }
}

/// A create that lost the race against a concurrent manual creation for
/// the same `(router_id, username)` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    /// Username whose create was skipped.
    pub username: String,
}

/// Outcome of a committed batch. The committed set is exactly the
/// non-violating subset.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Ids of customers created.
    pub created: Vec<CustomerId>,
    /// Ids of customers updated.
    pub updated: Vec<CustomerId>,
    /// Creates skipped because the key already existed.
    pub violations: Vec<ConstraintViolation>,
}

/// Persistent store of customer records keyed by `(router_id, username)`.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Lists all customers owned by one router.
    async fn list_by_router(
        &self,
        router_id: &RouterId,
    ) -> std::result::Result<Vec<Customer>, DirectoryError>;

    /// Applies one batch atomically: either the whole non-violating subset
    /// commits or nothing does. Key conflicts on creates are reported as
    /// violations; `Unavailable` means nothing was written.
    async fn apply_batch(
        &self,
        router_id: &RouterId,
        batch: ApplyBatch,
    ) -> std::result::Result<BatchOutcome, DirectoryError>;
}

/// In-memory directory backend.
///
/// Deterministic fixture for orchestrator tests and the storage for
/// fixture-mode daemon runs. Supports one-shot failure injection to
/// exercise the storage-unavailable path.
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<HashMap<CustomerId, Customer>>,
    fail_next_apply: Mutex<bool>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the batch path. Stands in for
    /// external manual customer CRUD.
    pub fn insert(&self, customer: Customer) {
        self.records.lock().insert(customer.id.clone(), customer);
    }

    /// Forces the next `apply_batch` to fail with `Unavailable` before
    /// writing anything.
    pub fn fail_next_apply(&self) {
        *self.fail_next_apply.lock() = true;
    }

    /// Fetches one record by id.
    pub fn get(&self, id: &CustomerId) -> Option<Customer> {
        self.records.lock().get(id).cloned()
    }

    /// Fetches one record by its unique key.
    pub fn get_by_key(&self, router_id: &RouterId, username: &str) -> Option<Customer> {
        self.records
            .lock()
            .values()
            .find(|c| &c.router_id == router_id && c.username == username)
            .cloned()
    }

    /// Total number of records across all routers.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when the directory holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl CustomerDirectory for MemoryDirectory {
    async fn list_by_router(
        &self,
        router_id: &RouterId,
    ) -> std::result::Result<Vec<Customer>, DirectoryError> {
        let records = self.records.lock();
        Ok(records
            .values()
            .filter(|c| &c.router_id == router_id)
            .cloned()
            .collect())
    }

    async fn apply_batch(
        &self,
        router_id: &RouterId,
        batch: ApplyBatch,
    ) -> std::result::Result<BatchOutcome, DirectoryError> {
        {
            let mut fail = self.fail_next_apply.lock();
            if *fail {
                *fail = false;
                return Err(DirectoryError::Unavailable(
                    "injected storage failure".to_string(),
                ));
            }
        }

        // Single lock hold for the whole batch gives all-or-nothing
        // visibility to concurrent readers.
        let mut records = self.records.lock();
        let mut outcome = BatchOutcome::default();

        for create in batch.creates {
            let exists = records
                .values()
                .any(|c| &c.router_id == router_id && c.username == create.username);
            if exists {
                outcome.violations.push(ConstraintViolation {
                    username: create.username,
                });
                continue;
            }

            let id = CustomerId::generate();
            records.insert(
                id.clone(),
                Customer {
                    id: id.clone(),
                    router_id: router_id.clone(),
                    username: create.username,
                    password: create.password,
                    status: create.status,
                    plan_id: create.plan_id,
                    external_profile: create.external_profile,
                    last_seen_at: create.last_seen_at,
                },
            );
            outcome.created.push(id);
        }

        for update in batch.updates {
            if let Some(customer) = records.get_mut(&update.id) {
                if let Some(status) = update.patch.status {
                    customer.status = status;
                }
                if let Some(password) = update.patch.password {
                    customer.password = password;
                }
                if let Some(profile) = update.patch.external_profile {
                    customer.external_profile = profile;
                }
                customer.last_seen_at = update.patch.last_seen_at;
                outcome.updated.push(update.id);
            }
        }

        for touch in batch.touches {
            if let Some(customer) = records.get_mut(&touch.id) {
                customer.last_seen_at = touch.last_seen_at;
            }
        }

        for delete in batch.deletes {
            records.remove(&delete.id);
        }

        Ok(outcome)
    }
}
