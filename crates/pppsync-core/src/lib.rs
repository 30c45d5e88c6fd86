//! PPPoE subscriber reconciliation engine.
//!
//! Converges a central customer directory onto the authoritative PPPoE
//! account roster of an access router. One sync run fetches the roster
//! over a pluggable transport, diffs it against the directory's view for
//! that router, applies the minimal create/update set in one atomic
//! batch, and records the run on the router's registry entry.
//!
//! # Architecture
//!
//! ```text
//! trigger ──▶ SyncOrchestrator ──▶ RosterClient (device fetch)
//!                  │                     │
//!                  │◀── roster ──────────┘
//!                  ├──▶ reconcile::diff (pure)
//!                  ├──▶ CustomerDirectory::apply_batch (atomic)
//!                  └──▶ RouterRegistry::record_sync
//! ```
//!
//! The transport, directory and registry are trait seams; the crate ships
//! deterministic in-memory implementations of all three, so every
//! orchestrator property is testable without a live device or database.

pub mod config;
pub mod directory;
pub mod error;
pub mod lock;
pub mod reconcile;
pub mod registry;
pub mod roster;
pub mod sync;
pub mod types;

pub use config::{AbsentAccountPolicy, PlanMap, SyncConfig};
pub use directory::{ApplyBatch, BatchOutcome, ConstraintViolation, CustomerDirectory, MemoryDirectory};
pub use error::{DirectoryError, Result, RosterError, SyncError};
pub use lock::{RouterLockGuard, RouterLockManager};
pub use reconcile::{CustomerPatch, DeleteSpec, NewCustomer, ReconcilePlan, TouchSpec, UpdateSpec};
pub use registry::{MemoryRegistry, RouterRegistry};
pub use roster::{FixtureRosterClient, RosterClient, RosterTarget};
pub use sync::{SyncOrchestrator, SyncPhase};
pub use types::{
    Customer, CustomerId, CustomerStatus, DeviceAccount, Plan, PlanId, Router, RouterId,
    SyncRecordError, SyncResult,
};
