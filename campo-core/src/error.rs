//! Error types for the sync engine.

use thiserror::Error;

/// Failures reported by a [`RemoteGateway`](crate::gateway::RemoteGateway).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The remote store could not be reached or did not answer in time.
    #[error("Remote store unreachable: {0}")]
    Transient(String),

    /// The remote store answered and refused the write.
    #[error("Remote store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote store answered with a body that could not be decoded.
    #[error("Invalid response from remote store: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Returns true if the same request may succeed when tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Failures of the local durable store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode or decode stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Errors returned to callers of the [`SyncRepository`](crate::SyncRepository).
///
/// Remote failures never show up here: they are absorbed into the queue.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No active workspace. Select a workspace before reading or writing records.")]
    NoActiveContext,

    #[error("Invalid workspace identifier: {0:?}")]
    InvalidWorkspace(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid payload for table '{table}': {reason}")]
    InvalidPayload { table: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("A sync worker is already running for this repository")]
    WorkerAlreadyRunning,
}

impl EngineError {
    pub(crate) fn invalid_payload(table: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidPayload {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(StorageError::Serialization(e))
    }
}
