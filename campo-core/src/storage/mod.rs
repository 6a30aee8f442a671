//! Local durable key/value storage.
//!
//! The engine persists three kinds of values, each under a well-known key:
//!
//! ```text
//! mutation_queue                  ordered list of pending MutationRecords
//! id_remap                        provisional -> durable identifier table
//! snapshot/<workspace>/<table>    cached table snapshot (list of records)
//! ```
//!
//! Every write replaces the stored value as a whole.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::context::WorkspaceId;
use crate::error::StorageError;

/// Key of the persisted mutation queue.
pub const QUEUE_KEY: &str = "mutation_queue";

/// Key of the persisted identifier remap table.
pub const REMAP_KEY: &str = "id_remap";

/// Prefix of every cached table snapshot key.
pub const SNAPSHOT_PREFIX: &str = "snapshot/";

/// Durable key/value persistence. No business logic.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Must not return before the value is durable.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Removes the value stored under `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every key starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Key of the cached snapshot for `table` in `workspace`.
pub fn snapshot_key(workspace: &WorkspaceId, table: &str) -> String {
    format!("{}{}/{}", SNAPSHOT_PREFIX, workspace, table)
}

/// Splits a snapshot key back into workspace and table.
pub fn parse_snapshot_key(key: &str) -> Option<(WorkspaceId, String)> {
    let rest = key.strip_prefix(SNAPSHOT_PREFIX)?;
    let (workspace, table) = rest.split_once('/')?;
    if workspace.is_empty() || table.is_empty() || table.contains('/') {
        return None;
    }
    Some((WorkspaceId::new(workspace), table.to_string()))
}

/// Rejects keys that backends could not store verbatim.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.contains("..") || key.chars().any(char::is_control) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
