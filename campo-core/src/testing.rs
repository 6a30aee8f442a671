//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::context::WorkspaceId;
use crate::error::{GatewayError, StorageError};
use crate::gateway::RemoteGateway;
use crate::record::{Record, RecordId, DEFAULT_ID_FIELD};
use crate::storage::{DurableStore, MemoryStore};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Fetch { table: String },
    Insert { table: String },
    Update { table: String, id: String },
    Delete { table: String, id: String },
}

#[derive(Default)]
struct FakeState {
    tables: HashMap<(WorkspaceId, String), Vec<Record>>,
    calls: Vec<Call>,
    failures: VecDeque<GatewayError>,
    next_id: u64,
}

/// In-memory remote store.
///
/// Assigns `srv-N` identifiers to records inserted without one (or with a
/// provisional one). Failures scripted with `fail_next` are returned by the
/// next calls, in order, before anything is stored.
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
    healthy: AtomicBool,
    writes_open: watch::Sender<bool>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        let (writes_open, _) = watch::channel(true);
        Self {
            state: Mutex::new(FakeState::default()),
            healthy: AtomicBool::new(true),
            writes_open,
        }
    }

    pub(crate) fn fail_next(&self, error: GatewayError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    pub(crate) fn seed(&self, workspace: &WorkspaceId, table: &str, records: Vec<Record>) {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert((workspace.clone(), table.to_string()), records);
    }

    pub(crate) fn records(&self, workspace: &WorkspaceId, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&(workspace.clone(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Makes writes block, after being recorded, until `release_writes`.
    pub(crate) fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub(crate) fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    async fn wait_for_writes(&self) {
        let mut open = self.writes_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    fn begin(&self, call: Call) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Records a write, then waits for `release_writes` before answering,
    /// scripted failures included.
    async fn begin_write(&self, call: Call) -> Result<(), GatewayError> {
        let outcome = self.begin(call);
        self.wait_for_writes().await;
        outcome
    }
}

fn not_found(id: &RecordId) -> GatewayError {
    GatewayError::Rejected {
        status: 404,
        message: format!("record {} not found", id),
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn fetch(&self, workspace: &WorkspaceId, table: &str) -> Result<Vec<Record>, GatewayError> {
        self.begin(Call::Fetch {
            table: table.to_string(),
        })?;
        Ok(self.records(workspace, table))
    }

    async fn insert(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        record: &Record,
    ) -> Result<Record, GatewayError> {
        self.begin_write(Call::Insert {
            table: table.to_string(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        let id = match RecordId::from_record(record, DEFAULT_ID_FIELD) {
            Some(id) if !id.is_provisional() => id,
            _ => {
                state.next_id += 1;
                RecordId::new(format!("srv-{}", state.next_id))
            }
        };
        let rows = state
            .tables
            .entry((workspace.clone(), table.to_string()))
            .or_default();
        if rows
            .iter()
            .any(|r| RecordId::from_record(r, DEFAULT_ID_FIELD).as_ref() == Some(&id))
        {
            return Err(GatewayError::Rejected {
                status: 409,
                message: format!("record {} already exists", id),
            });
        }
        let mut stored = record.clone();
        id.write_into(&mut stored, DEFAULT_ID_FIELD);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
        patch: &Record,
    ) -> Result<Record, GatewayError> {
        self.begin_write(Call::Update {
            table: table.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        let row = state
            .tables
            .get_mut(&(workspace.clone(), table.to_string()))
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| RecordId::from_record(r, DEFAULT_ID_FIELD).as_ref() == Some(id))
            })
            .ok_or_else(|| not_found(id))?;
        for (key, value) in patch {
            row.insert(key.clone(), value.clone());
        }
        Ok(row.clone())
    }

    async fn delete(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> Result<(), GatewayError> {
        self.begin_write(Call::Delete {
            table: table.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        let rows = state
            .tables
            .get_mut(&(workspace.clone(), table.to_string()))
            .ok_or_else(|| not_found(id))?;
        let before = rows.len();
        rows.retain(|r| RecordId::from_record(r, DEFAULT_ID_FIELD).as_ref() != Some(id));
        if rows.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// [`MemoryStore`] whose writes can be made to fail.
pub(crate) struct FailingStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    failing_key: Mutex<Option<String>>,
}

impl FailingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(false),
            failing_key: Mutex::new(None),
        }
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fails writes to `key` only.
    pub(crate) fn fail_writes_to(&self, key: Option<&str>) {
        *self.failing_key.lock().unwrap() = key.map(str::to_string);
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        let key_fails = self.failing_key.lock().unwrap().as_deref() == Some(key);
        if key_fails || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.keys_with_prefix(prefix).await
    }
}
