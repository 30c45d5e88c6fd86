//! Daemon-side building blocks for pppsyncd.
//!
//! The reconciliation engine lives in `pppsync-core`; this crate supplies
//! the live collaborators: the RouterOS roster transport, Redis-backed
//! directory and registry, Prometheus metrics and the REST API surface.

pub mod metrics;
pub mod redis_directory;
pub mod redis_registry;
pub mod rest_api;
pub mod routeros;

pub use metrics::SyncMetrics;
pub use redis_directory::RedisDirectory;
pub use redis_registry::RedisRegistry;
pub use rest_api::{build_router, AppState};
pub use routeros::RouterOsClient;
