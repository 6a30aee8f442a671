//! In-process durable store.
//!
//! Values live as long as the `MemoryStore` does. Sharing one instance
//! between two repositories simulates a process restart in tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{validate_key, DurableStore};
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("mutation_queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_value() {
        let store = MemoryStore::new();
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.put("k", b"v").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("never-there").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_with_prefix_sorted() {
        let store = MemoryStore::new();
        store.put("snapshot/ws/b", b"[]").await.unwrap();
        store.put("snapshot/ws/a", b"[]").await.unwrap();
        store.put("mutation_queue", b"[]").await.unwrap();
        store.put("snapshotx", b"[]").await.unwrap();

        let keys = store.keys_with_prefix("snapshot/").await.unwrap();
        assert_eq!(keys, vec!["snapshot/ws/a", "snapshot/ws/b"]);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put("", b"v").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
