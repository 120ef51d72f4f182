// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue drain against the remote API.
//!
//! A drain sends every item of a queue snapshot strictly in order, one at a
//! time. Failures are collected and the batch continues; the failed items
//! stay queued for the next drain. There is no mid-drain cancellation.
//!
//! A failed item does not hold back later items for the same document, so
//! the failed mutation replays after them on the next drain.
//!
//! Only one drain runs at a time. A request made while draining returns a
//! skipped result immediately and sends nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::{FailedItem, SyncResult, SyncState};
use crate::cache::{document_key, ReadCache};
use crate::queue::item::epoch_millis;
use crate::queue::{Operation, QueueItem, WriteQueue};
use crate::storage::traits::StorageError;
use crate::transport::{Transport, TransportError};

pub struct SyncEngine {
    queue: Arc<WriteQueue>,
    cache: Arc<ReadCache>,
    transport: Arc<dyn Transport>,
    /// Field of a created document holding its server-assigned key
    id_field: String,
    draining: AtomicBool,
    state: watch::Sender<SyncState>,
    last_sync_at: RwLock<Option<i64>>,
    last_errors: RwLock<Vec<FailedItem>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<ReadCache>,
        transport: Arc<dyn Transport>,
        id_field: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            queue,
            cache,
            transport,
            id_field: id_field.into(),
            draining: AtomicBool::new(false),
            state,
            last_sync_at: RwLock::new(None),
            last_errors: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Epoch millis of the last drain that confirmed at least one item.
    #[must_use]
    pub fn last_sync_at(&self) -> Option<i64> {
        *self.last_sync_at.read()
    }

    /// Failures from the most recent completed drain.
    #[must_use]
    pub fn last_errors(&self) -> Vec<FailedItem> {
        self.last_errors.read().clone()
    }

    /// Forget sync history (after the user discards offline data).
    pub fn reset_history(&self) {
        *self.last_sync_at.write() = None;
        self.last_errors.write().clear();
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    /// Send every queued mutation once.
    ///
    /// Transport failures never fail the drain; they are reported in
    /// [`SyncResult::failed`]. Storage failures reading or persisting the
    /// queue are returned as errors.
    #[tracing::instrument(skip(self), fields(succeeded, failed))]
    pub async fn drain(&self) -> Result<SyncResult, StorageError> {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Drain already in progress, skipping");
            crate::metrics::record_drain_skipped();
            return Ok(SyncResult::skipped());
        }
        let _guard = DrainGuard {
            flag: &self.draining,
            state: &self.state,
        };
        self.state.send_replace(SyncState::Draining);

        let snapshot = self.queue.snapshot().await?;
        if snapshot.items.is_empty() {
            return Ok(SyncResult::default());
        }

        let start = Instant::now();
        info!(pending = snapshot.items.len(), "Draining write queue");

        let mut succeeded = 0;
        let mut failed = Vec::new();
        for item in &snapshot.items {
            match self.apply(item).await {
                Ok(()) => {
                    succeeded += 1;
                    debug!(id = %item.id, target = %item.target(), operation = %item.operation, "Queued mutation applied");
                }
                Err(e) => {
                    warn!(id = %item.id, target = %item.target(), operation = %item.operation, error = %e, "Queued mutation failed, will retry next drain");
                    failed.push(FailedItem {
                        item: item.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let residual_items = failed.iter().map(|f| f.item.clone()).collect();
        let remaining = self.queue.replace_drained(&snapshot, residual_items).await?;

        if succeeded > 0 {
            *self.last_sync_at.write() = Some(epoch_millis());
        }
        // Failures of a discarded queue are not worth reporting
        if !self.queue.cleared_since(&snapshot) {
            *self.last_errors.write() = failed.clone();
        }

        let span = tracing::Span::current();
        span.record("succeeded", succeeded);
        span.record("failed", failed.len());
        crate::metrics::record_drain(succeeded, failed.len(), start.elapsed());
        info!(
            succeeded,
            failed = failed.len(),
            remaining,
            duration_ms = start.elapsed().as_millis() as u64,
            "Drain complete"
        );

        Ok(SyncResult {
            succeeded,
            failed,
            skipped: false,
        })
    }

    /// Replay one item and refresh the cache from the server's reply.
    async fn apply(&self, item: &QueueItem) -> Result<(), TransportError> {
        let resource_type = item.resource_type.as_str();

        match item.operation {
            Operation::Create => {
                let doc = self.transport.create_document(resource_type, &item.payload).await?;
                if let Some(key) = doc.get(&self.id_field).and_then(Value::as_str) {
                    self.refresh_cache(&document_key(resource_type, key), Some(&doc)).await;
                }
            }
            Operation::Update => {
                let key = require_key(item)?;
                let doc = self.transport.update_document(resource_type, key, &item.payload).await?;
                self.refresh_cache(&document_key(resource_type, key), Some(&doc)).await;
            }
            Operation::Delete => {
                let key = require_key(item)?;
                match self.transport.delete_document(resource_type, key).await {
                    Ok(()) => {}
                    // Already gone, e.g. a resend after a crash
                    Err(TransportError::NotFound(_)) => {
                        debug!(target = %item.target(), "Delete target already absent");
                    }
                    Err(e) => return Err(e),
                }
                self.refresh_cache(&document_key(resource_type, key), None).await;
            }
        }
        Ok(())
    }

    /// The server already confirmed the mutation, so a cache write failure
    /// must not put the item back in the queue.
    async fn refresh_cache(&self, key: &str, doc: Option<&Value>) {
        let result = match doc {
            Some(doc) => self.cache.put(key, doc).await,
            None => self.cache.invalidate(key).await,
        };
        if let Err(e) = result {
            warn!(%key, error = %e, "Failed to refresh cache after confirmed mutation");
        }
    }
}

fn require_key(item: &QueueItem) -> Result<&str, TransportError> {
    item.resource_key.as_deref().ok_or_else(|| {
        TransportError::Protocol(format!("{} of {} has no resource key", item.operation, item.resource_type))
    })
}

/// Resets the draining flag and publishes `Idle` on every exit path.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a watch::Sender<SyncState>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(SyncState::Idle);
        self.flag.store(false, Ordering::Release);
    }
}
