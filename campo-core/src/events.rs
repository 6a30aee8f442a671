//! Change notifications for screens.
//!
//! Subscribers get a [`tokio::sync::broadcast`] receiver. Slow subscribers
//! may miss events (`RecvError::Lagged`); they should re-read the snapshot.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::context::WorkspaceId;
use crate::record::{Action, MutationRecord};

/// Capacity of the event channel.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The optimistic view of a table changed.
    TableChanged { workspace: WorkspaceId, table: String },
    /// The number of pending mutations changed.
    QueueChanged { pending: usize },
    /// A queued mutation reached the remote store.
    Replayed {
        mutation_id: Uuid,
        table: String,
        action: Action,
    },
    /// A queued mutation failed and will be tried again later.
    ReplayDeferred {
        mutation_id: Uuid,
        table: String,
        attempts: u32,
        retry_at: DateTime<Utc>,
        error: String,
    },
    /// A queued mutation failed and was discarded.
    ReplayDropped {
        mutation: MutationRecord,
        error: String,
    },
    ConnectivityChanged { online: bool },
}

pub(crate) fn channel() -> broadcast::Sender<SyncEvent> {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

/// Sends `event` if anyone is listening.
pub(crate) fn emit(tx: &broadcast::Sender<SyncEvent>, event: SyncEvent) {
    // No receivers is fine.
    let _ = tx.send(event);
}
