//! Generic CRUD façade.
//!
//! [`SyncRepository`] is the only entry point screens use. Every write is
//! applied to the optimistic store first, then tried against the remote
//! store if the device is online, and queued for the sync worker otherwise.
//! Remote failures are never returned to the caller; they show up as
//! `confirmed == false`.

use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::context::{WorkspaceContext, WorkspaceId};
use crate::error::{EngineError, GatewayError};
use crate::events::{self, SyncEvent};
use crate::gateway::RemoteGateway;
use crate::inflight::InFlightWrites;
use crate::optimistic::OptimisticStore;
use crate::queue::MutationQueue;
use crate::record::{MutationPayload, MutationRecord, Record, RecordId};
use crate::remap::IdRemap;
use crate::schema::{Table, TableRegistry, TableSchema};
use crate::storage::{parse_snapshot_key, snapshot_key, DurableStore, SNAPSHOT_PREFIX};

/// Result of `save`, `update` and `delete`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// The remote store accepted the write during this call.
    pub confirmed: bool,
    /// Connectivity as seen when the call decided whether to go remote.
    pub online: bool,
    /// The record as it now stands: the remote copy if confirmed, the
    /// optimistic copy otherwise. `None` after a delete.
    pub record: Option<Record>,
}

/// Result of `fetch`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    /// True if `records` came from the remote store during this call.
    pub online: bool,
}

pub(crate) struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) context: WorkspaceContext,
    pub(crate) connectivity: ConnectivityMonitor,
    pub(crate) registry: TableRegistry,
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) gateway: Arc<dyn RemoteGateway>,
    pub(crate) optimistic: OptimisticStore,
    pub(crate) inflight: InFlightWrites,
    // Lock order: never hold `queue` and `remap` at the same time.
    pub(crate) queue: Mutex<MutationQueue>,
    pub(crate) remap: Mutex<IdRemap>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
    pub(crate) drain_gate: Mutex<()>,
    snapshot_gate: Mutex<()>,
    pub(crate) worker_running: AtomicBool,
}

/// Offline-first repository over a [`RemoteGateway`].
///
/// Cheap to clone; clones share the same queue and optimistic state.
#[derive(Clone)]
pub struct SyncRepository {
    pub(crate) inner: Arc<Engine>,
}

pub struct SyncRepositoryBuilder {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn DurableStore>,
    config: EngineConfig,
    registry: TableRegistry,
    connectivity: Option<ConnectivityMonitor>,
    workspace: Option<WorkspaceId>,
}

impl SyncRepositoryBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: TableRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Shares an existing monitor. Defaults to a new one that starts offline.
    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn workspace(mut self, workspace: WorkspaceId) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Rehydrates the queue, the identifier remap and the cached snapshots
    /// from the durable store. No worker can run before this returns.
    pub async fn open(self) -> Result<SyncRepository, EngineError> {
        let queue = MutationQueue::load(self.store.clone()).await?;
        let remap = IdRemap::load(self.store.clone()).await?;
        info!(
            pending = queue.len(),
            remapped = remap.len(),
            "Rehydrated mutation queue"
        );

        let optimistic = OptimisticStore::new();
        for key in self.store.keys_with_prefix(SNAPSHOT_PREFIX).await? {
            let Some((workspace, table)) = parse_snapshot_key(&key) else {
                continue;
            };
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<Vec<Record>>(&bytes) {
                Ok(records) => optimistic.replace_table(&workspace, &table, records),
                Err(e) => warn!(key = %key, error = %e, "Ignoring unreadable snapshot"),
            }
        }

        let context = match self.workspace {
            Some(workspace) => WorkspaceContext::with_workspace(workspace),
            None => WorkspaceContext::new(),
        };

        Ok(SyncRepository {
            inner: Arc::new(Engine {
                config: self.config,
                context,
                connectivity: self.connectivity.unwrap_or_default(),
                registry: self.registry,
                store: self.store,
                gateway: self.gateway,
                optimistic,
                inflight: InFlightWrites::new(),
                queue: Mutex::new(queue),
                remap: Mutex::new(remap),
                events: events::channel(),
                drain_gate: Mutex::new(()),
                snapshot_gate: Mutex::new(()),
                worker_running: AtomicBool::new(false),
            }),
        })
    }
}

impl SyncRepository {
    pub fn builder(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn DurableStore>,
    ) -> SyncRepositoryBuilder {
        SyncRepositoryBuilder {
            gateway,
            store,
            config: EngineConfig::default(),
            registry: TableRegistry::default(),
            connectivity: None,
            workspace: None,
        }
    }

    /// Creates a record.
    ///
    /// A provisional identifier is assigned if the record carries none.
    pub async fn save(&self, table: &str, record: Record) -> Result<WriteOutcome, EngineError> {
        let workspace = self.inner.context.require()?;
        let schema = self.inner.registry.check_insert(table, &record)?;

        let mut record = record;
        let id = match RecordId::from_record(&record, &schema.id_field) {
            Some(id) => id,
            None => {
                let id = RecordId::provisional();
                id.write_into(&mut record, &schema.id_field);
                id
            }
        };
        self.write(&workspace, &schema, MutationPayload::Insert { id, record })
            .await
    }

    /// Merges `patch` into the record `id`.
    pub async fn update(
        &self,
        table: &str,
        id: impl Into<RecordId>,
        patch: Record,
    ) -> Result<WriteOutcome, EngineError> {
        let workspace = self.inner.context.require()?;
        let id = id.into();
        let schema = self.inner.registry.check_patch(table, &id, &patch)?;

        let id = self.inner.resolve_id(&workspace, table, &id).await;
        let mut patch = patch;
        patch.remove(&schema.id_field);
        self.write(&workspace, &schema, MutationPayload::Update { id, patch })
            .await
    }

    pub async fn delete(
        &self,
        table: &str,
        id: impl Into<RecordId>,
    ) -> Result<WriteOutcome, EngineError> {
        let workspace = self.inner.context.require()?;
        let schema = self.inner.registry.schema(table)?;

        let id = self.inner.resolve_id(&workspace, table, &id.into()).await;
        self.write(&workspace, &schema, MutationPayload::Delete { id })
            .await
    }

    /// Reloads `table` from the remote store, falling back to the cached
    /// snapshot when offline or when the remote fetch fails.
    ///
    /// Mutations still waiting in the queue are re-applied on top of the
    /// remote result so a fetch never hides a local edit.
    pub async fn fetch(&self, table: &str) -> Result<FetchOutcome, EngineError> {
        let engine = &self.inner;
        let workspace = engine.context.require()?;
        engine.registry.schema(table)?;

        if engine.connectivity.is_online() {
            match engine.gateway.fetch(&workspace, table).await {
                Ok(records) => {
                    let queued = engine.queue.lock().await.pending_for_table(&workspace, table);
                    let in_flight = engine.inflight.pending_for_table(&workspace, table);
                    engine.optimistic.replace_table(&workspace, table, records);
                    for mutation in &queued {
                        engine.optimistic.apply(
                            &workspace,
                            table,
                            &mutation.id_field,
                            &mutation.payload,
                        );
                    }
                    for (id_field, payload) in &in_flight {
                        engine.optimistic.apply(&workspace, table, id_field, payload);
                    }
                    debug!(
                        table,
                        rebased = queued.len() + in_flight.len(),
                        "Fetched table"
                    );
                    engine.table_changed(&workspace, table).await;
                    return Ok(FetchOutcome {
                        records: engine.optimistic.snapshot(&workspace, table),
                        online: true,
                    });
                }
                Err(e) => {
                    warn!(table, error = %e, "Fetch failed, serving cached snapshot");
                }
            }
        }

        Ok(FetchOutcome {
            records: engine.optimistic.snapshot(&workspace, table),
            online: false,
        })
    }

    /// Creates a typed record. See [`SyncRepository::save`].
    pub async fn save_typed<T: Table>(&self, value: &T) -> Result<WriteOutcome, EngineError> {
        match serde_json::to_value(value)? {
            Value::Object(record) => self.save(T::NAME, record).await,
            _ => Err(EngineError::invalid_payload(
                T::NAME,
                "records must serialize to a JSON object",
            )),
        }
    }

    /// Fetches a typed table. See [`SyncRepository::fetch`].
    pub async fn fetch_typed<T: Table>(&self) -> Result<Vec<T>, EngineError> {
        let outcome = self.fetch(T::NAME).await?;
        outcome
            .records
            .into_iter()
            .map(|record| {
                serde_json::from_value(Value::Object(record))
                    .map_err(|e| EngineError::invalid_payload(T::NAME, e.to_string()))
            })
            .collect()
    }

    /// Current optimistic view of `table`, without touching the network.
    pub fn snapshot(&self, table: &str) -> Result<Vec<Record>, EngineError> {
        let workspace = self.inner.context.require()?;
        self.inner.registry.schema(table)?;
        Ok(self.inner.optimistic.snapshot(&workspace, table))
    }

    /// One record from the optimistic view.
    pub async fn get(
        &self,
        table: &str,
        id: impl Into<RecordId>,
    ) -> Result<Option<Record>, EngineError> {
        let workspace = self.inner.context.require()?;
        let schema = self.inner.registry.schema(table)?;
        let id = self.inner.resolve_id(&workspace, table, &id.into()).await;
        Ok(self
            .inner
            .optimistic
            .get(&workspace, table, &schema.id_field, &id))
    }

    /// Number of mutations waiting to be replayed.
    pub async fn pending_count(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Mutations waiting to be replayed, oldest first.
    pub async fn pending(&self) -> Vec<MutationRecord> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn workspace(&self) -> Option<WorkspaceId> {
        self.inner.context.current()
    }

    pub fn set_workspace(&self, workspace: WorkspaceId) {
        self.inner.context.set(workspace);
    }

    pub fn clear_workspace(&self) {
        self.inner.context.clear();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Field holding the identifier of records in `table`.
    pub fn id_field(&self, table: &str) -> Result<String, EngineError> {
        Ok(self.inner.registry.schema(table)?.id_field)
    }

    async fn write(
        &self,
        workspace: &WorkspaceId,
        schema: &TableSchema,
        payload: MutationPayload,
    ) -> Result<WriteOutcome, EngineError> {
        let engine = &self.inner;
        let table = schema.name.as_str();
        let id_field = schema.id_field.as_str();

        let ticket = engine.inflight.register(workspace, table, id_field, &payload);
        let before = engine
            .optimistic
            .get(workspace, table, id_field, payload.record_id());
        engine.optimistic.apply(workspace, table, id_field, &payload);
        engine.table_changed(workspace, table).await;

        ticket.wait_turn().await;
        let payload = ticket.payload().unwrap_or(payload);
        let payload = engine.resolve_payload(workspace, table, &payload).await;
        ticket.set_payload(&payload);

        let online = engine.connectivity.is_online();
        if online {
            let blocked = engine
                .queue
                .lock()
                .await
                .has_pending_for(workspace, table, payload.record_id());
            if blocked {
                debug!(table, id = %payload.record_id(), "Earlier mutation still queued, queueing behind it");
            } else {
                match engine.dispatch(workspace, table, &payload).await {
                    Ok(stored) => {
                        let record = engine
                            .confirm(workspace, table, id_field, &payload, stored, Some(ticket.id()))
                            .await?;
                        return Ok(WriteOutcome {
                            confirmed: true,
                            online,
                            record,
                        });
                    }
                    Err(e) => {
                        warn!(
                            table,
                            action = %payload.action(),
                            error = %e,
                            "Remote write failed, queueing for later"
                        );
                    }
                }
            }
        }

        let record = match &payload {
            MutationPayload::Delete { .. } => None,
            other => engine
                .optimistic
                .get(workspace, table, id_field, other.record_id()),
        };
        let queued = MutationRecord::new(workspace.clone(), table, id_field, payload.clone());
        if let Err(e) = engine.enqueue(queued).await {
            engine.revert(workspace, table, id_field, &payload, before);
            engine.table_changed(workspace, table).await;
            return Err(e);
        }

        Ok(WriteOutcome {
            confirmed: false,
            online,
            record,
        })
    }
}

impl Engine {
    /// Sends one mutation to the remote store.
    pub(crate) async fn dispatch(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        payload: &MutationPayload,
    ) -> Result<Option<Record>, GatewayError> {
        match payload {
            MutationPayload::Insert { record, .. } => {
                self.gateway.insert(workspace, table, record).await.map(Some)
            }
            MutationPayload::Update { id, patch } => self
                .gateway
                .update(workspace, table, id, patch)
                .await
                .map(Some),
            MutationPayload::Delete { id } => {
                self.gateway.delete(workspace, table, id).await.map(|_| None)
            }
        }
    }

    /// Folds the remote answer to a successful mutation into local state.
    ///
    /// `except` is the façade write being confirmed, if any. Edits made
    /// after this mutation, queued or still in flight, are re-applied on top
    /// of the remote copy.
    pub(crate) async fn confirm(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        payload: &MutationPayload,
        stored: Option<Record>,
        except: Option<u64>,
    ) -> Result<Option<Record>, EngineError> {
        let Some(stored) = stored else {
            return Ok(None);
        };
        let sent = payload.record_id();
        let durable = RecordId::from_record(&stored, id_field).unwrap_or_else(|| sent.clone());

        if let MutationPayload::Insert { id, .. } = payload {
            if *id != durable {
                self.reconcile_id(workspace, table, id_field, id, &durable)
                    .await?;
            }
        }

        let mut later: Vec<MutationPayload> = self
            .queue
            .lock()
            .await
            .pending_for_record(workspace, table, &durable)
            .into_iter()
            .map(|m| m.payload)
            .collect();
        later.extend(
            self.inflight
                .pending_for_record(workspace, table, &durable, except),
        );

        self.optimistic
            .upsert(workspace, table, id_field, stored.clone());
        for edit in &later {
            self.optimistic.apply(workspace, table, id_field, edit);
        }
        self.table_changed(workspace, table).await;
        Ok(Some(stored))
    }

    /// Restores the optimistic view of one record after a write that could
    /// not be queued.
    fn revert(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        payload: &MutationPayload,
        before: Option<Record>,
    ) {
        match before {
            Some(record) => self.optimistic.upsert(workspace, table, id_field, record),
            None => {
                self.optimistic
                    .remove(workspace, table, id_field, payload.record_id());
            }
        }
    }

    /// Replaces the provisional identifier `from` with the durable `to`
    /// everywhere the engine keeps it.
    async fn reconcile_id(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        from: &RecordId,
        to: &RecordId,
    ) -> Result<(), EngineError> {
        self.remap
            .lock()
            .await
            .record(workspace, table, from, to)
            .await?;
        let rewritten = self
            .queue
            .lock()
            .await
            .rewrite_record_id(workspace, table, from, to)
            .await?;
        self.optimistic.rename(workspace, table, id_field, from, to);
        self.inflight.rename(workspace, table, from, to);
        info!(table, from = %from, to = %to, rewritten, "Reconciled provisional identifier");
        Ok(())
    }

    pub(crate) async fn resolve_id(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
    ) -> RecordId {
        self.remap.lock().await.resolve(workspace, table, id)
    }

    /// Points an update or delete at the durable identifier if its target
    /// has been reconciled since it was queued.
    pub(crate) async fn resolve_payload(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        payload: &MutationPayload,
    ) -> MutationPayload {
        let mut payload = payload.clone();
        if let MutationPayload::Update { id, .. } | MutationPayload::Delete { id } = &mut payload {
            let resolved = self.resolve_id(workspace, table, id).await;
            *id = resolved;
        }
        payload
    }

    pub(crate) async fn enqueue(&self, mutation: MutationRecord) -> Result<(), EngineError> {
        let mutation_id = mutation.id;
        let action = mutation.action();
        let table = mutation.table.clone();
        let pending = {
            let mut queue = self.queue.lock().await;
            queue.enqueue(mutation).await?;
            queue.len()
        };
        debug!(%mutation_id, %action, table, pending, "Queued mutation");
        self.emit(SyncEvent::QueueChanged { pending });
        Ok(())
    }

    /// Persists the snapshot of `table` and tells subscribers it changed.
    pub(crate) async fn table_changed(&self, workspace: &WorkspaceId, table: &str) {
        if let Err(e) = self.persist_snapshot(workspace, table).await {
            warn!(table, error = %e, "Failed to persist table snapshot");
        }
        self.emit(SyncEvent::TableChanged {
            workspace: workspace.clone(),
            table: table.to_string(),
        });
    }

    async fn persist_snapshot(&self, workspace: &WorkspaceId, table: &str) -> Result<(), EngineError> {
        let _gate = self.snapshot_gate.lock().await;
        let records = self.optimistic.snapshot(workspace, table);
        let bytes = serde_json::to_vec(&records)?;
        self.store
            .put(&snapshot_key(workspace, table), &bytes)
            .await?;
        Ok(())
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        events::emit(&self.events, event);
    }
}
