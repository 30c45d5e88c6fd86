//! Error types for the reconciliation engine.

use crate::types::RouterId;
use thiserror::Error;

/// Transport-level failures reported by a roster client.
///
/// `Timeout` and `ProtocolError` are treated as transient and retried by
/// the orchestrator up to its configured bound; `AuthRejected` and
/// `Unreachable` are surfaced immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosterError {
    /// The device could not be reached at all (connect/socket failure).
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The device rejected the API credentials.
    #[error("device rejected credentials")]
    AuthRejected,

    /// The device replied with something the client could not interpret,
    /// including a roster containing malformed account entries.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The fetch did not complete within the caller-supplied bound.
    #[error("roster fetch timed out after {elapsed_ms} ms")]
    Timeout {
        /// Milliseconds elapsed before the bound fired.
        elapsed_ms: u64,
    },
}

impl RosterError {
    /// Whether the orchestrator may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RosterError::Timeout { .. } | RosterError::ProtocolError(_)
        )
    }
}

/// Failures reported by a customer directory backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The storage backend is unavailable; nothing was committed.
    #[error("directory storage unavailable: {0}")]
    Unavailable(String),
}

/// Top-level failure of one sync invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The router id is not present in the registry. No lock was taken.
    #[error("router not found: {0}")]
    RouterNotFound(RouterId),

    /// Another sync for this router is already running. Callers retry later.
    #[error("sync already in progress for router {0}")]
    SyncInProgress(RouterId),

    /// The roster fetch failed after exhausting the retry budget.
    #[error(transparent)]
    Roster(#[from] RosterError),

    /// The directory batch could not be committed. Never retried: the batch
    /// is atomic and a blind retry risks duplicate side effects.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<DirectoryError> for SyncError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Unavailable(msg) => SyncError::StorageUnavailable(msg),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
