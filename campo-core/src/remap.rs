//! Provisional to durable identifier table.
//!
//! When the remote store assigns an identifier to a record that was created
//! with a provisional one, the pair is remembered here so that later updates
//! and deletes addressed to the provisional identifier reach the right record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::WorkspaceId;
use crate::error::StorageError;
use crate::record::RecordId;
use crate::storage::{DurableStore, REMAP_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RemapEntry {
    workspace: WorkspaceId,
    table: String,
    provisional: RecordId,
    durable: RecordId,
    confirmed_at: DateTime<Utc>,
}

type RemapKey = (WorkspaceId, String, RecordId);

pub struct IdRemap {
    entries: HashMap<RemapKey, RemapEntry>,
    store: Arc<dyn DurableStore>,
}

impl IdRemap {
    pub async fn load(store: Arc<dyn DurableStore>) -> Result<Self, StorageError> {
        let list: Vec<RemapEntry> = match store.get(REMAP_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        let entries = list
            .into_iter()
            .map(|e| ((e.workspace.clone(), e.table.clone(), e.provisional.clone()), e))
            .collect();
        Ok(Self { entries, store })
    }

    /// Returns the durable identifier for `id`, or `id` itself if it was
    /// never remapped.
    pub fn resolve(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> RecordId {
        if !id.is_provisional() {
            return id.clone();
        }
        let key = (workspace.clone(), table.to_string(), id.clone());
        self.entries
            .get(&key)
            .map(|e| e.durable.clone())
            .unwrap_or_else(|| id.clone())
    }

    /// Remembers that `provisional` is now known as `durable`.
    pub async fn record(
        &mut self,
        workspace: &WorkspaceId,
        table: &str,
        provisional: &RecordId,
        durable: &RecordId,
    ) -> Result<(), StorageError> {
        if provisional == durable {
            return Ok(());
        }
        let key = (workspace.clone(), table.to_string(), provisional.clone());
        let entry = RemapEntry {
            workspace: workspace.clone(),
            table: table.to_string(),
            provisional: provisional.clone(),
            durable: durable.clone(),
            confirmed_at: Utc::now(),
        };

        let mut next = self.entries.clone();
        next.insert(key, entry);
        self.persist(&next).await?;
        self.entries = next;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn persist(&self, entries: &HashMap<RemapKey, RemapEntry>) -> Result<(), StorageError> {
        let mut list: Vec<&RemapEntry> = entries.values().collect();
        list.sort_by(|a, b| a.confirmed_at.cmp(&b.confirmed_at));
        let bytes = serde_json::to_vec(&list)?;
        self.store.put(REMAP_KEY, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn ws() -> WorkspaceId {
        WorkspaceId::new("fazenda-1")
    }

    #[tokio::test]
    async fn test_resolve_unknown_returns_same_id() {
        let remap = IdRemap::load(Arc::new(MemoryStore::new())).await.unwrap();
        let id = RecordId::new("temp-x");
        assert_eq!(remap.resolve(&ws(), "abastecimentos", &id), id);
    }

    #[tokio::test]
    async fn test_record_and_resolve() {
        let mut remap = IdRemap::load(Arc::new(MemoryStore::new())).await.unwrap();
        let provisional = RecordId::new("temp-x");
        let durable = RecordId::new("501");
        remap
            .record(&ws(), "abastecimentos", &provisional, &durable)
            .await
            .unwrap();

        assert_eq!(remap.resolve(&ws(), "abastecimentos", &provisional), durable);
        // Scoped by workspace and table.
        assert_eq!(remap.resolve(&ws(), "talhoes", &provisional), provisional);
        assert_eq!(
            remap.resolve(&WorkspaceId::new("fazenda-2"), "abastecimentos", &provisional),
            provisional
        );
    }

    #[tokio::test]
    async fn test_identity_mapping_is_not_stored() {
        let mut remap = IdRemap::load(Arc::new(MemoryStore::new())).await.unwrap();
        let id = RecordId::new("temp-x");
        remap.record(&ws(), "abastecimentos", &id, &id).await.unwrap();
        assert!(remap.is_empty());
    }

    #[tokio::test]
    async fn test_remap_survives_reload() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        {
            let mut remap = IdRemap::load(store.clone()).await.unwrap();
            remap
                .record(&ws(), "abastecimentos", &RecordId::new("temp-x"), &RecordId::new("9"))
                .await
                .unwrap();
        }
        let remap = IdRemap::load(store).await.unwrap();
        assert_eq!(remap.len(), 1);
        assert_eq!(
            remap.resolve(&ws(), "abastecimentos", &RecordId::new("temp-x")),
            RecordId::new("9")
        );
    }
}
