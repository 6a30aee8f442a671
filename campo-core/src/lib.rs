//! Campo Core Library
//!
//! Offline-first synchronization of record mutations against a remote store.
//! Screens talk to a [`SyncRepository`]; writes show up locally at once and
//! reach the remote store directly when online, or later through the
//! mutation queue and the sync worker.

pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod events;
pub mod gateway;
mod inflight;
pub mod optimistic;
pub mod queue;
pub mod record;
pub mod remap;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, RetryPolicy, DEFAULT_DRAIN_INTERVAL};
pub use connectivity::{ConnectivityMonitor, ProbeHandle};
pub use context::{WorkspaceContext, WorkspaceId};
pub use error::{EngineError, GatewayError, StorageError};
pub use events::SyncEvent;
pub use gateway::{HttpGateway, RemoteGateway};
pub use record::{Action, MutationPayload, MutationRecord, Record, RecordId, PROVISIONAL_PREFIX};
pub use repository::{FetchOutcome, SyncRepository, SyncRepositoryBuilder, WriteOutcome};
pub use schema::{Table, TableRegistry, TableSchema};
pub use storage::{DurableStore, MemoryStore};
pub use worker::{DrainReport, TickOutcome, WorkerHandle};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
