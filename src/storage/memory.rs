use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use super::traits::{KvStore, StorageError};

/// Volatile [`KvStore`] for tests and sessions that don't need durability.
///
/// An optional per-partition entry cap makes `set` fail with
/// [`StorageError::Full`], standing in for an exhausted device.
pub struct InMemoryKvStore {
    partitions: DashMap<String, DashMap<String, Value>>,
    max_entries: Option<usize>,
}

impl InMemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            max_entries: None,
        }
    }

    /// Cap every partition at `max_entries` keys.
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            max_entries: Some(max_entries),
        }
    }

    /// Number of entries in a partition
    #[must_use]
    pub fn len(&self, partition: &str) -> usize {
        self.partitions.get(partition).map_or(0, |p| p.len())
    }

    /// Check if a partition is empty
    #[must_use]
    pub fn is_empty(&self, partition: &str) -> bool {
        self.len(partition) == 0
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .partitions
            .get(partition)
            .and_then(|p| p.get(key).map(|r| r.value().clone())))
    }

    async fn set(&self, partition: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let entries = self.partitions.entry(partition.to_string()).or_default();
        if let Some(max) = self.max_entries {
            // Overwrites never grow the partition
            if !entries.contains_key(key) && entries.len() >= max {
                return Err(StorageError::Full {
                    partition: partition.to_string(),
                    entries: entries.len(),
                    max,
                });
            }
        }
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, partition: &str, key: &str) -> Result<(), StorageError> {
        if let Some(p) = self.partitions.get(partition) {
            p.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, partition: &str) -> Result<(), StorageError> {
        self.partitions.remove(partition);
        Ok(())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .partitions
            .get(partition)
            .map(|p| p.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::{CACHE_PARTITION, QUEUE_PARTITION};
    use serde_json::json;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryKvStore::new();
        assert!(store.is_empty(CACHE_PARTITION));
        assert_eq!(store.len(QUEUE_PARTITION), 0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryKvStore::new();
        store.set(CACHE_PARTITION, "Trip:T1", &json!({"name": "T1"})).await.unwrap();

        let value = store.get(CACHE_PARTITION, "Trip:T1").await.unwrap();
        assert_eq!(value, Some(json!({"name": "T1"})));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryKvStore::new();
        assert!(store.get(CACHE_PARTITION, "nope").await.unwrap().is_none());
        assert!(store.get("never-created", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryKvStore::new();
        store.set(CACHE_PARTITION, "k", &json!({"version": 1})).await.unwrap();
        store.set(CACHE_PARTITION, "k", &json!({"version": 2})).await.unwrap();

        assert_eq!(store.len(CACHE_PARTITION), 1);
        let value = store.get(CACHE_PARTITION, "k").await.unwrap().unwrap();
        assert_eq!(value["version"], 2);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let store = InMemoryKvStore::new();
        assert!(store.remove(CACHE_PARTITION, "nonexistent").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_is_scoped_to_partition() {
        let store = InMemoryKvStore::new();
        store.set(CACHE_PARTITION, "a", &json!(1)).await.unwrap();
        store.set(CACHE_PARTITION, "b", &json!(2)).await.unwrap();
        store.set(QUEUE_PARTITION, "queue", &json!([])).await.unwrap();

        store.clear(CACHE_PARTITION).await.unwrap();

        assert!(store.is_empty(CACHE_PARTITION));
        assert_eq!(store.len(QUEUE_PARTITION), 1);
    }

    #[tokio::test]
    async fn test_max_entries_rejects_new_keys() {
        let store = InMemoryKvStore::with_max_entries(2);
        store.set(CACHE_PARTITION, "a", &json!(1)).await.unwrap();
        store.set(CACHE_PARTITION, "b", &json!(2)).await.unwrap();

        let err = store.set(CACHE_PARTITION, "c", &json!(3)).await.unwrap_err();
        assert!(matches!(err, StorageError::Full { max: 2, .. }));

        // Overwriting an existing key is still allowed
        store.set(CACHE_PARTITION, "a", &json!(10)).await.unwrap();
        assert_eq!(store.count(CACHE_PARTITION).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_keys_lists_partition() {
        let store = InMemoryKvStore::new();
        for i in 0..5 {
            store.set(CACHE_PARTITION, &format!("k{}", i), &json!(i)).await.unwrap();
        }
        let mut keys = store.keys(CACHE_PARTITION).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryKvStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    store_clone.set(CACHE_PARTITION, &key, &json!(i)).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(CACHE_PARTITION), 100);
    }
}
