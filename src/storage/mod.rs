//! Local persistence: partitioned JSON key-value stores.

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{KvStore, StorageError, CACHE_PARTITION, QUEUE_PARTITION};
pub use memory::InMemoryKvStore;
pub use sql::SqlKvStore;
