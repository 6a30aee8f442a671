//! Durable FIFO of pending mutations.
//!
//! The whole queue is written to the [`DurableStore`] on every change, and
//! the in-memory copy is only updated once that write succeeded. A failed
//! write therefore leaves both copies as they were.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::WorkspaceId;
use crate::error::StorageError;
use crate::record::{MutationRecord, RecordId};
use crate::storage::{DurableStore, QUEUE_KEY};

pub struct MutationQueue {
    items: VecDeque<MutationRecord>,
    store: Arc<dyn DurableStore>,
}

impl MutationQueue {
    /// Loads the persisted queue. A missing key is an empty queue.
    pub async fn load(store: Arc<dyn DurableStore>) -> Result<Self, StorageError> {
        let items = match store.get(QUEUE_KEY).await? {
            Some(bytes) => serde_json::from_slice::<Vec<MutationRecord>>(&bytes)?.into(),
            None => VecDeque::new(),
        };
        Ok(Self { items, store })
    }

    /// Appends `mutation` at the tail and persists the queue.
    pub async fn enqueue(&mut self, mutation: MutationRecord) -> Result<(), StorageError> {
        let mut next = self.items.clone();
        next.push_back(mutation);
        self.persist(&next).await?;
        self.items = next;
        Ok(())
    }

    /// Oldest pending mutation, if any.
    pub fn peek_head(&self) -> Option<&MutationRecord> {
        self.items.front()
    }

    /// Removes the head, but only if it is still the mutation `id`.
    pub async fn dequeue_if(&mut self, id: Uuid) -> Result<Option<MutationRecord>, StorageError> {
        if self.items.front().map(|m| m.id) != Some(id) {
            return Ok(None);
        }
        let mut next = self.items.clone();
        let head = next.pop_front();
        self.persist(&next).await?;
        self.items = next;
        Ok(head)
    }

    /// Records a failed replay of the head and postpones it until `not_before`.
    pub async fn defer_head(
        &mut self,
        id: Uuid,
        attempts: u32,
        not_before: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut next = self.items.clone();
        match next.front_mut() {
            Some(head) if head.id == id => {
                head.attempts = attempts;
                head.not_before = Some(not_before);
            }
            _ => return Ok(false),
        }
        self.persist(&next).await?;
        self.items = next;
        Ok(true)
    }

    /// Points every queued mutation for `from` at `to` instead.
    ///
    /// Returns the number of mutations rewritten.
    pub async fn rewrite_record_id(
        &mut self,
        workspace: &WorkspaceId,
        table: &str,
        from: &RecordId,
        to: &RecordId,
    ) -> Result<usize, StorageError> {
        let mut next = self.items.clone();
        let mut changed = 0;
        for mutation in next.iter_mut() {
            if &mutation.workspace == workspace && mutation.table == table {
                let id_field = mutation.id_field.clone();
                if mutation.payload.rename_record(&id_field, from, to) {
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.persist(&next).await?;
            self.items = next;
        }
        Ok(changed)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pending mutations, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MutationRecord> {
        self.items.iter()
    }

    /// Returns true if a mutation for this record is still waiting.
    pub fn has_pending_for(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> bool {
        self.items.iter().any(|m| m.targets(workspace, table, id))
    }

    /// Pending mutations for one table, oldest first.
    pub fn pending_for_table(&self, workspace: &WorkspaceId, table: &str) -> Vec<MutationRecord> {
        self.items
            .iter()
            .filter(|m| &m.workspace == workspace && m.table == table)
            .cloned()
            .collect()
    }

    /// Pending mutations for one record, oldest first.
    pub fn pending_for_record(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
    ) -> Vec<MutationRecord> {
        self.items
            .iter()
            .filter(|m| m.targets(workspace, table, id))
            .cloned()
            .collect()
    }

    async fn persist(&self, items: &VecDeque<MutationRecord>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(items)?;
        self.store.put(QUEUE_KEY, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MutationPayload, Record};
    use crate::storage::MemoryStore;
    use crate::testing::FailingStore;
    use serde_json::json;

    fn ws() -> WorkspaceId {
        WorkspaceId::new("fazenda-1")
    }

    fn insert(id: &str, litros: i64) -> MutationRecord {
        let record = json!({"id": id, "litros": litros})
            .as_object()
            .cloned()
            .unwrap();
        MutationRecord::new(
            ws(),
            "abastecimentos",
            "id",
            MutationPayload::Insert {
                id: RecordId::new(id),
                record,
            },
        )
    }

    fn update(id: &str) -> MutationRecord {
        MutationRecord::new(
            ws(),
            "abastecimentos",
            "id",
            MutationPayload::Update {
                id: RecordId::new(id),
                patch: Record::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_load_empty() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).await.unwrap();
        assert!(queue.is_empty());
        assert!(queue.peek_head().is_none());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let mut queue = MutationQueue::load(Arc::new(MemoryStore::new())).await.unwrap();
        let a = insert("temp-a", 1);
        let b = insert("temp-b", 2);
        let c = insert("temp-c", 3);
        for m in [&a, &b, &c] {
            queue.enqueue(m.clone()).await.unwrap();
        }

        let mut replayed = Vec::new();
        while let Some(head) = queue.peek_head().cloned() {
            queue.dequeue_if(head.id).await.unwrap();
            replayed.push(head.id);
        }
        assert_eq!(replayed, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_queue_survives_reload() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let a = insert("temp-a", 1);
        let b = insert("temp-b", 2);
        {
            let mut queue = MutationQueue::load(store.clone()).await.unwrap();
            queue.enqueue(a.clone()).await.unwrap();
            queue.enqueue(b.clone()).await.unwrap();
        }

        let queue = MutationQueue::load(store).await.unwrap();
        let ids: Vec<Uuid> = queue.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_dequeue_if_only_removes_expected_head() {
        let mut queue = MutationQueue::load(Arc::new(MemoryStore::new())).await.unwrap();
        let a = insert("temp-a", 1);
        let b = insert("temp-b", 2);
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        assert!(queue.dequeue_if(b.id).await.unwrap().is_none());
        assert_eq!(queue.len(), 2);

        let removed = queue.dequeue_if(a.id).await.unwrap().unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(queue.peek_head().map(|m| m.id), Some(b.id));
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_queue_unchanged() {
        let store = Arc::new(FailingStore::new());
        let mut queue = MutationQueue::load(store.clone()).await.unwrap();
        queue.enqueue(insert("temp-a", 1)).await.unwrap();

        store.fail_writes(true);
        assert!(queue.enqueue(insert("temp-b", 2)).await.is_err());
        assert_eq!(queue.len(), 1);

        store.fail_writes(false);
        let reloaded = MutationQueue::load(store).await.unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_defer_head_persists_attempts() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let mut queue = MutationQueue::load(store.clone()).await.unwrap();
        let a = insert("temp-a", 1);
        queue.enqueue(a.clone()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        assert!(queue.defer_head(a.id, 1, later).await.unwrap());
        assert!(!queue.defer_head(Uuid::new_v4(), 1, later).await.unwrap());

        let reloaded = MutationQueue::load(store).await.unwrap();
        let head = reloaded.peek_head().unwrap();
        assert_eq!(head.attempts, 1);
        assert_eq!(head.not_before, Some(later));
    }

    #[tokio::test]
    async fn test_rewrite_record_id() {
        let mut queue = MutationQueue::load(Arc::new(MemoryStore::new())).await.unwrap();
        queue.enqueue(insert("temp-a", 1)).await.unwrap();
        queue.enqueue(update("temp-a")).await.unwrap();
        queue.enqueue(update("other")).await.unwrap();

        let changed = queue
            .rewrite_record_id(
                &ws(),
                "abastecimentos",
                &RecordId::new("temp-a"),
                &RecordId::new("77"),
            )
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert!(queue.has_pending_for(&ws(), "abastecimentos", &RecordId::new("77")));
        assert!(!queue.has_pending_for(&ws(), "abastecimentos", &RecordId::new("temp-a")));
        assert!(queue.has_pending_for(&ws(), "abastecimentos", &RecordId::new("other")));
        assert_eq!(
            queue
                .pending_for_record(&ws(), "abastecimentos", &RecordId::new("77"))
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_pending_for_table_filters_workspace_and_table() {
        let mut queue = MutationQueue::load(Arc::new(MemoryStore::new())).await.unwrap();
        queue.enqueue(insert("temp-a", 1)).await.unwrap();
        queue
            .enqueue(MutationRecord::new(
                WorkspaceId::new("fazenda-2"),
                "abastecimentos",
                "id",
                MutationPayload::Delete {
                    id: RecordId::new("9"),
                },
            ))
            .await
            .unwrap();
        queue
            .enqueue(MutationRecord::new(
                ws(),
                "talhoes",
                "id",
                MutationPayload::Delete {
                    id: RecordId::new("9"),
                },
            ))
            .await
            .unwrap();

        assert_eq!(queue.pending_for_table(&ws(), "abastecimentos").len(), 1);
        assert_eq!(queue.pending_for_table(&ws(), "talhoes").len(), 1);
        assert_eq!(queue.len(), 3);
    }
}
