use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Partition holding memoized read results.
pub const CACHE_PARTITION: &str = "cache";

/// Partition holding the pending write queue.
pub const QUEUE_PARTITION: &str = "write_queue";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage medium unavailable: {0}")]
    Unavailable(String),
    #[error("Storage full: partition '{partition}' holds {entries} entries (max {max})")]
    Full {
        partition: String,
        entries: usize,
        max: usize,
    },
    #[error("Failed to (de)serialize value for '{key}': {reason}")]
    Serialization { key: String, reason: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Durable JSON key-value storage organized into named partitions.
///
/// Partitions are independent: clearing one never touches another, which is
/// what keeps a cache clear from discarding pending writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, partition: &str, key: &str, value: &Value) -> Result<(), StorageError>;
    async fn remove(&self, partition: &str, key: &str) -> Result<(), StorageError>;
    async fn clear(&self, partition: &str) -> Result<(), StorageError>;

    /// List the keys currently stored in a partition (unordered).
    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError>;

    /// Count entries in a partition.
    /// Default implementation counts the listed keys.
    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self.keys(partition).await?.len())
    }
}
