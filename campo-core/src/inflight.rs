//! Façade writes that have not yet been confirmed or queued.
//!
//! A write registers here before it touches the optimistic store and stays
//! registered until it returns. Writes to the same record take turns in
//! registration order, so a later one never reaches the remote store or the
//! queue ahead of an earlier one.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::context::WorkspaceId;
use crate::record::{MutationPayload, RecordId};

struct InFlightWrite {
    ticket: u64,
    workspace: WorkspaceId,
    table: String,
    id_field: String,
    payload: MutationPayload,
}

impl InFlightWrite {
    fn targets(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> bool {
        &self.workspace == workspace && self.table == table && self.payload.record_id() == id
    }
}

#[derive(Default)]
struct State {
    next_ticket: u64,
    writes: Vec<InFlightWrite>,
}

pub(crate) struct InFlightWrites {
    state: Mutex<State>,
    // Bumped whenever a write finishes.
    finished: watch::Sender<u64>,
}

impl InFlightWrites {
    pub(crate) fn new() -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            finished,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn register(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        payload: &MutationPayload,
    ) -> WriteTicket<'_> {
        let mut state = self.state();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.writes.push(InFlightWrite {
            ticket,
            workspace: workspace.clone(),
            table: table.to_string(),
            id_field: id_field.to_string(),
            payload: payload.clone(),
        });
        WriteTicket {
            writes: self,
            ticket,
        }
    }

    /// Payloads in flight for `table`, oldest first, with their id field.
    pub(crate) fn pending_for_table(
        &self,
        workspace: &WorkspaceId,
        table: &str,
    ) -> Vec<(String, MutationPayload)> {
        self.state()
            .writes
            .iter()
            .filter(|w| &w.workspace == workspace && w.table == table)
            .map(|w| (w.id_field.clone(), w.payload.clone()))
            .collect()
    }

    /// Payloads in flight for one record, oldest first, leaving out `except`.
    pub(crate) fn pending_for_record(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
        except: Option<u64>,
    ) -> Vec<MutationPayload> {
        self.state()
            .writes
            .iter()
            .filter(|w| Some(w.ticket) != except && w.targets(workspace, table, id))
            .map(|w| w.payload.clone())
            .collect()
    }

    /// Points in-flight writes for `from` at `to` instead.
    pub(crate) fn rename(&self, workspace: &WorkspaceId, table: &str, from: &RecordId, to: &RecordId) {
        let mut state = self.state();
        for write in state
            .writes
            .iter_mut()
            .filter(|w| &w.workspace == workspace && w.table == table)
        {
            let id_field = write.id_field.clone();
            write.payload.rename_record(&id_field, from, to);
        }
    }

    fn is_turn(&self, ticket: u64) -> bool {
        let state = self.state();
        let Some(mine) = state.writes.iter().find(|w| w.ticket == ticket) else {
            return true;
        };
        !state.writes.iter().any(|w| {
            w.ticket < ticket && w.targets(&mine.workspace, &mine.table, mine.payload.record_id())
        })
    }

    fn payload(&self, ticket: u64) -> Option<MutationPayload> {
        self.state()
            .writes
            .iter()
            .find(|w| w.ticket == ticket)
            .map(|w| w.payload.clone())
    }

    fn set_payload(&self, ticket: u64, payload: &MutationPayload) {
        if let Some(write) = self.state().writes.iter_mut().find(|w| w.ticket == ticket) {
            write.payload = payload.clone();
        }
    }

    fn finish(&self, ticket: u64) {
        self.state().writes.retain(|w| w.ticket != ticket);
        self.finished.send_modify(|n| *n = n.wrapping_add(1));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state().writes.len()
    }
}

/// Registration of one write. Dropping it ends the write.
pub(crate) struct WriteTicket<'a> {
    writes: &'a InFlightWrites,
    ticket: u64,
}

impl WriteTicket<'_> {
    pub(crate) fn id(&self) -> u64 {
        self.ticket
    }

    /// Waits until every earlier write to the same record has finished.
    pub(crate) async fn wait_turn(&self) {
        let mut finished = self.writes.finished.subscribe();
        while !self.writes.is_turn(self.ticket) {
            if finished.changed().await.is_err() {
                return;
            }
        }
    }

    /// The payload as it stands now; identifiers may have been reconciled
    /// while the write was waiting.
    pub(crate) fn payload(&self) -> Option<MutationPayload> {
        self.writes.payload(self.ticket)
    }

    pub(crate) fn set_payload(&self, payload: &MutationPayload) {
        self.writes.set_payload(self.ticket, payload);
    }
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        self.writes.finish(self.ticket);
    }
}
