//! Remote data gateway.
//!
//! The only component that talks to the network. Everything above it sees
//! a [`RemoteGateway`] and a [`GatewayError`] that says whether a failure is
//! worth retrying.

mod http;

pub use http::{classify_status, HttpGateway};

use async_trait::async_trait;

use crate::context::WorkspaceId;
use crate::error::GatewayError;
use crate::record::{Record, RecordId};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// All records of `table` in `workspace`.
    async fn fetch(&self, workspace: &WorkspaceId, table: &str) -> Result<Vec<Record>, GatewayError>;

    /// Creates a record. Returns the stored record, which carries the
    /// durable identifier if the remote store assigned one.
    async fn insert(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        record: &Record,
    ) -> Result<Record, GatewayError>;

    /// Merges `patch` into the record `id`. Returns the stored record.
    async fn update(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
        patch: &Record,
    ) -> Result<Record, GatewayError>;

    async fn delete(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> Result<(), GatewayError>;

    /// Cheap reachability check.
    async fn health(&self) -> bool;
}
