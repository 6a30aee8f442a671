//! Optimistic state store.
//!
//! Holds, per workspace and table, the records screens should currently
//! display. Local writes land here before any network call so the UI never
//! waits on the remote store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::context::WorkspaceId;
use crate::record::{MutationPayload, Record, RecordId};

type TableKey = (WorkspaceId, String);

#[derive(Debug, Default)]
pub struct OptimisticStore {
    tables: RwLock<HashMap<TableKey, Vec<Record>>>,
}

impl OptimisticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current records of a table, in display order. Empty if never loaded.
    pub fn snapshot(&self, workspace: &WorkspaceId, table: &str) -> Vec<Record> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .get(&(workspace.clone(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Looks up one record by identifier.
    pub fn get(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        id: &RecordId,
    ) -> Option<Record> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .get(&(workspace.clone(), table.to_string()))?
            .iter()
            .find(|r| RecordId::from_record(r, id_field).as_ref() == Some(id))
            .cloned()
    }

    /// Inserts `record`, or replaces the record with the same identifier.
    pub(crate) fn upsert(&self, workspace: &WorkspaceId, table: &str, id_field: &str, record: Record) {
        let id = RecordId::from_record(&record, id_field);
        self.with_table(workspace, table, |rows| {
            match rows
                .iter_mut()
                .find(|r| id.is_some() && RecordId::from_record(r, id_field) == id)
            {
                Some(existing) => *existing = record,
                None => rows.push(record),
            }
        });
    }

    /// Merges `patch` into the record `id`. Returns false if it is not present.
    pub(crate) fn patch(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        id: &RecordId,
        patch: &Record,
    ) -> bool {
        self.with_table(workspace, table, |rows| {
            match rows
                .iter_mut()
                .find(|r| RecordId::from_record(r, id_field).as_ref() == Some(id))
            {
                Some(existing) => {
                    for (key, value) in patch {
                        existing.insert(key.clone(), value.clone());
                    }
                    true
                }
                None => false,
            }
        })
    }

    /// Removes the record `id`. Returns false if it was not present.
    pub(crate) fn remove(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        id: &RecordId,
    ) -> bool {
        self.with_table(workspace, table, |rows| {
            let before = rows.len();
            rows.retain(|r| RecordId::from_record(r, id_field).as_ref() != Some(id));
            rows.len() != before
        })
    }

    /// Replaces the whole table.
    pub(crate) fn replace_table(&self, workspace: &WorkspaceId, table: &str, records: Vec<Record>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert((workspace.clone(), table.to_string()), records);
    }

    /// Rewrites the identifier of one record in place.
    pub(crate) fn rename(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        from: &RecordId,
        to: &RecordId,
    ) -> bool {
        self.with_table(workspace, table, |rows| {
            match rows
                .iter_mut()
                .find(|r| RecordId::from_record(r, id_field).as_ref() == Some(from))
            {
                Some(existing) => {
                    to.write_into(existing, id_field);
                    true
                }
                None => false,
            }
        })
    }

    /// Applies a mutation to the optimistic view.
    pub(crate) fn apply(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id_field: &str,
        payload: &MutationPayload,
    ) {
        match payload {
            MutationPayload::Insert { record, .. } => {
                self.upsert(workspace, table, id_field, record.clone())
            }
            MutationPayload::Update { id, patch } => {
                self.patch(workspace, table, id_field, id, patch);
            }
            MutationPayload::Delete { id } => {
                self.remove(workspace, table, id_field, id);
            }
        }
    }

    /// Tables currently held for `workspace`.
    pub fn tables(&self, workspace: &WorkspaceId) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tables
            .keys()
            .filter(|(ws, _)| ws == workspace)
            .map(|(_, table)| table.clone())
            .collect();
        names.sort();
        names
    }

    fn with_table<R>(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        f: impl FnOnce(&mut Vec<Record>) -> R,
    ) -> R {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .entry((workspace.clone(), table.to_string()))
            .or_default();
        f(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ws() -> WorkspaceId {
        WorkspaceId::new("fazenda-1")
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unknown_table_is_empty() {
        let store = OptimisticStore::new();
        assert!(store.snapshot(&ws(), "abastecimentos").is_empty());
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let store = OptimisticStore::new();
        store.upsert(&ws(), "t", "id", record(json!({"id": "1", "litros": 50})));
        store.upsert(&ws(), "t", "id", record(json!({"id": "2", "litros": 10})));
        store.upsert(&ws(), "t", "id", record(json!({"id": "1", "litros": 60})));

        let rows = store.snapshot(&ws(), "t");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["litros"], 60);
    }

    #[test]
    fn test_patch_merges_fields() {
        let store = OptimisticStore::new();
        store.upsert(&ws(), "t", "id", record(json!({"id": "1", "litros": 50, "maquina": "T1"})));
        assert!(store.patch(&ws(), "t", "id", &RecordId::new("1"), &record(json!({"litros": 70}))));
        assert!(!store.patch(&ws(), "t", "id", &RecordId::new("9"), &record(json!({"litros": 1}))));

        let row = store.get(&ws(), "t", "id", &RecordId::new("1")).unwrap();
        assert_eq!(row["litros"], 70);
        assert_eq!(row["maquina"], "T1");
    }

    #[test]
    fn test_remove() {
        let store = OptimisticStore::new();
        store.upsert(&ws(), "t", "id", record(json!({"id": "1"})));
        assert!(store.remove(&ws(), "t", "id", &RecordId::new("1")));
        assert!(!store.remove(&ws(), "t", "id", &RecordId::new("1")));
        assert!(store.snapshot(&ws(), "t").is_empty());
    }

    #[test]
    fn test_rename() {
        let store = OptimisticStore::new();
        store.upsert(&ws(), "t", "id", record(json!({"id": "temp-1", "litros": 50})));
        assert!(store.rename(
            &ws(),
            "t",
            "id",
            &RecordId::new("temp-1"),
            &RecordId::new("42")
        ));
        assert!(store.get(&ws(), "t", "id", &RecordId::new("42")).is_some());
        assert!(store.get(&ws(), "t", "id", &RecordId::new("temp-1")).is_none());
    }

    #[test]
    fn test_workspaces_are_isolated() {
        let store = OptimisticStore::new();
        let other = WorkspaceId::new("fazenda-2");
        store.upsert(&ws(), "t", "id", record(json!({"id": "1"})));
        assert!(store.snapshot(&other, "t").is_empty());
        assert_eq!(store.tables(&ws()), vec!["t".to_string()]);
    }

    #[test]
    fn test_apply_payloads() {
        let store = OptimisticStore::new();
        store.apply(
            &ws(),
            "t",
            "id",
            &MutationPayload::Insert {
                id: RecordId::new("1"),
                record: record(json!({"id": "1", "litros": 5})),
            },
        );
        store.apply(
            &ws(),
            "t",
            "id",
            &MutationPayload::Update {
                id: RecordId::new("1"),
                patch: record(json!({"litros": 6})),
            },
        );
        assert_eq!(store.snapshot(&ws(), "t")[0]["litros"], 6);

        store.apply(
            &ws(),
            "t",
            "id",
            &MutationPayload::Delete {
                id: RecordId::new("1"),
            },
        );
        assert!(store.snapshot(&ws(), "t").is_empty());
    }
}
