// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable FIFO of pending mutations.
//!
//! The whole queue lives under a single key (`"queue"`) of the
//! `write_queue` partition as an ordered JSON array, so it can be dumped and
//! restored wholesale. Every mutation is a read-modify-write of that array
//! performed under one in-process lock, which keeps interleaved `enqueue`
//! calls from losing each other's items.
//!
//! Nothing reorders the queue: items are appended at the tail and removed
//! in place, so mutations of the same document always replay in the order
//! they were made.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::item::{Operation, QueueItem};
use crate::storage::traits::{KvStore, StorageError, QUEUE_PARTITION};

/// Key under which the ordered queue is stored.
pub const QUEUE_KEY: &str = "queue";

pub struct WriteQueue {
    store: Arc<dyn KvStore>,
    /// Serializes read-modify-write of the persisted array
    lock: Mutex<()>,
    /// Bumped by `clear`; only changed while `lock` is held
    generation: AtomicU64,
}

/// Items taken for a drain, tagged with the queue generation they came from.
#[derive(Debug, Clone)]
pub struct DrainSnapshot {
    pub items: Vec<QueueItem>,
    generation: u64,
}

impl WriteQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    async fn load(&self) -> Result<Vec<QueueItem>, StorageError> {
        match self.store.get(QUEUE_PARTITION, QUEUE_KEY).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| StorageError::Serialization {
                key: format!("{}/{}", QUEUE_PARTITION, QUEUE_KEY),
                reason: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, items: &[QueueItem]) -> Result<(), StorageError> {
        let value = serde_json::to_value(items).map_err(|e| StorageError::Serialization {
            key: format!("{}/{}", QUEUE_PARTITION, QUEUE_KEY),
            reason: e.to_string(),
        })?;
        self.store.set(QUEUE_PARTITION, QUEUE_KEY, &value).await?;
        crate::metrics::set_queue_depth(items.len());
        Ok(())
    }

    /// Append a mutation and persist it before returning.
    ///
    /// A storage failure is returned to the caller; the write is never
    /// reported as queued unless it is durably stored.
    pub async fn enqueue(
        &self,
        resource_type: &str,
        resource_key: Option<&str>,
        operation: Operation,
        payload: Value,
    ) -> Result<QueueItem, StorageError> {
        let item = QueueItem::new(resource_type, resource_key.map(str::to_string), operation, payload);

        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        items.push(item.clone());

        if let Err(e) = self.save(&items).await {
            crate::metrics::record_operation("queue", "enqueue", "error");
            return Err(e);
        }

        crate::metrics::record_operation("queue", "enqueue", "success");
        debug!(
            id = %item.id,
            target = %item.target(),
            operation = %item.operation,
            pending = items.len(),
            "Mutation queued"
        );
        Ok(item)
    }

    /// Snapshot of every pending item, oldest first.
    pub async fn peek_all(&self) -> Result<Vec<QueueItem>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Snapshot for a drain, to be handed back to [`replace_drained`].
    ///
    /// [`replace_drained`]: WriteQueue::replace_drained
    pub async fn snapshot(&self) -> Result<DrainSnapshot, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(DrainSnapshot {
            items: self.load().await?,
            generation: self.generation.load(Ordering::Acquire),
        })
    }

    /// Whether `clear` ran after `snapshot` was taken.
    #[must_use]
    pub fn cleared_since(&self, snapshot: &DrainSnapshot) -> bool {
        self.generation.load(Ordering::Acquire) != snapshot.generation
    }

    /// Remove one item after its mutation was confirmed.
    ///
    /// Returns `false` when no item had that id.
    pub async fn remove_by_id(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|i| i.id != id);

        if items.len() == before {
            return Ok(false);
        }
        self.save(&items).await?;
        Ok(true)
    }

    /// Overwrite the queue with exactly `items`, in the given order.
    pub async fn replace_all(&self, items: Vec<QueueItem>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.save(&items).await
    }

    /// Persist the residual queue after draining `snapshot`.
    ///
    /// The residual is `failed` (in snapshot order) followed by anything
    /// enqueued after the snapshot was taken, so writes made while a drain
    /// was running are kept behind the retried ones.
    ///
    /// If the queue was cleared since the snapshot, the failed items were
    /// discarded with it and are not written back. Returns the queue length.
    pub async fn replace_drained(
        &self,
        snapshot: &DrainSnapshot,
        failed: Vec<QueueItem>,
    ) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let current = self.load().await?;

        if self.cleared_since(snapshot) {
            debug!(discarded = failed.len(), "Queue cleared during drain, dropping residual");
            return Ok(current.len());
        }

        let drained: HashSet<&str> = snapshot.items.iter().map(|i| i.id.as_str()).collect();
        let mut residual = failed;
        residual.extend(current.into_iter().filter(|i| !drained.contains(i.id.as_str())));

        self.save(&residual).await?;
        Ok(residual.len())
    }

    /// Number of pending items.
    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.peek_all().await?.len())
    }

    /// Whether any pending item mutates `resource_type`/`resource_key`.
    pub async fn has_pending_for(&self, resource_type: &str, resource_key: &str) -> Result<bool, StorageError> {
        Ok(self
            .peek_all()
            .await?
            .iter()
            .any(|i| i.targets(resource_type, resource_key)))
    }

    /// Discard every pending item. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let dropped = self.load().await?.len();
        self.store.clear(QUEUE_PARTITION).await?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        crate::metrics::set_queue_depth(0);
        if dropped > 0 {
            info!(dropped, "Write queue cleared");
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryKvStore;
    use serde_json::json;

    fn queue() -> (Arc<InMemoryKvStore>, WriteQueue) {
        let store = Arc::new(InMemoryKvStore::new());
        let queue = WriteQueue::new(store.clone());
        (store, queue)
    }

    #[tokio::test]
    async fn test_enqueue_appends_in_order() {
        let (_, queue) = queue();
        for i in 0..5 {
            queue
                .enqueue("Trip", Some(&format!("T{}", i)), Operation::Update, json!({"n": i}))
                .await
                .unwrap();
        }

        let items = queue.peek_all().await.unwrap();
        assert_eq!(items.len(), 5);
        let ns: Vec<i64> = items.iter().map(|i| i.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_enqueue_persists_under_single_key() {
        let (store, queue) = queue();
        queue.enqueue("Trip", None, Operation::Create, json!({"a": 1})).await.unwrap();

        assert_eq!(store.keys(QUEUE_PARTITION).await.unwrap(), vec![QUEUE_KEY.to_string()]);
        let raw = store.get(QUEUE_PARTITION, QUEUE_KEY).await.unwrap().unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_survives_new_instance() {
        let store = Arc::new(InMemoryKvStore::new());
        {
            let queue = WriteQueue::new(store.clone());
            queue.enqueue("Trip", Some("T1"), Operation::Update, json!({})).await.unwrap();
            queue.enqueue("Trip", Some("T1"), Operation::Delete, json!({})).await.unwrap();
        }

        let queue = WriteQueue::new(store);
        let items = queue.peek_all().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].operation, Operation::Update);
        assert_eq!(items[1].operation, Operation::Delete);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let (_, queue) = queue();
        let a = queue.enqueue("Trip", Some("A"), Operation::Update, json!({})).await.unwrap();
        let b = queue.enqueue("Trip", Some("B"), Operation::Update, json!({})).await.unwrap();

        assert!(queue.remove_by_id(&a.id).await.unwrap());
        assert!(!queue.remove_by_id(&a.id).await.unwrap());

        let items = queue.peek_all().await.unwrap();
        assert_eq!(items, vec![b]);
    }

    #[tokio::test]
    async fn test_replace_all() {
        let (_, queue) = queue();
        let a = queue.enqueue("Trip", Some("A"), Operation::Update, json!({})).await.unwrap();
        let _b = queue.enqueue("Trip", Some("B"), Operation::Update, json!({})).await.unwrap();

        queue.replace_all(vec![a.clone()]).await.unwrap();
        assert_eq!(queue.peek_all().await.unwrap(), vec![a]);

        queue.replace_all(Vec::new()).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_drained_keeps_late_arrivals() {
        let (_, queue) = queue();
        let a = queue.enqueue("Trip", Some("A"), Operation::Update, json!({})).await.unwrap();
        let b = queue.enqueue("Trip", Some("B"), Operation::Update, json!({})).await.unwrap();
        let snapshot = queue.snapshot().await.unwrap();

        // Arrives while the snapshot is being drained
        let c = queue.enqueue("Trip", Some("C"), Operation::Update, json!({})).await.unwrap();

        let remaining = queue.replace_drained(&snapshot, vec![b.clone()]).await.unwrap();
        assert_eq!(remaining, 2);
        assert_eq!(queue.peek_all().await.unwrap(), vec![b, c]);
        assert!(!queue.peek_all().await.unwrap().contains(&a));
    }

    #[tokio::test]
    async fn test_replace_drained_after_clear_keeps_failures_out() {
        let (_, queue) = queue();
        let a = queue.enqueue("Trip", Some("A"), Operation::Update, json!({})).await.unwrap();
        let snapshot = queue.snapshot().await.unwrap();

        // User discards offline data mid-drain, then keeps working
        assert_eq!(queue.clear().await.unwrap(), 1);
        let b = queue.enqueue("Trip", Some("B"), Operation::Update, json!({})).await.unwrap();

        assert!(queue.cleared_since(&snapshot));
        let remaining = queue.replace_drained(&snapshot, vec![a]).await.unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(queue.peek_all().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_has_pending_for() {
        let (_, queue) = queue();
        queue.enqueue("Trip", Some("T1"), Operation::Update, json!({})).await.unwrap();

        assert!(queue.has_pending_for("Trip", "T1").await.unwrap());
        assert!(!queue.has_pending_for("Trip", "T2").await.unwrap());
        assert!(!queue.has_pending_for("Vehicle", "T1").await.unwrap());
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_store_full() {
        // Partition may hold one key; the queue key takes it on first enqueue,
        // so fill it from another writer first.
        let store = Arc::new(InMemoryKvStore::with_max_entries(1));
        store.set(QUEUE_PARTITION, "other", &json!(1)).await.unwrap();
        let queue = WriteQueue::new(store);

        let result = queue.enqueue("Trip", Some("T1"), Operation::Update, json!({})).await;
        assert!(matches!(result, Err(StorageError::Full { .. })));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_loses_nothing() {
        let queue = Arc::new(queue().1);
        let mut handles = vec![];

        for task in 0..8 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    q.enqueue("Trip", Some(&format!("{}-{}", task, i)), Operation::Update, json!({}))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(queue.count().await.unwrap(), 80);
    }

    #[tokio::test]
    async fn test_clear_reports_dropped() {
        let (_, queue) = queue();
        queue.enqueue("Trip", None, Operation::Create, json!({})).await.unwrap();
        queue.enqueue("Trip", None, Operation::Create, json!({})).await.unwrap();

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(queue.count().await.unwrap(), 0);
    }
}
