// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-through memo of remote reads.
//!
//! # Read path
//!
//! ```text
//! read(kind, id, args, fetcher)
//!   │
//!   ├─ offline ─────────────────────────────▶ stored entry │ Unavailable
//!   │
//!   └─ online ─▶ fetcher()
//!                  ├─ Ok(v) ─▶ store v ───────▶ Fresh(v)
//!                  ├─ connectivity failure,
//!                  │  or went offline meanwhile ▶ stored entry │ Unavailable
//!                  └─ other failure ──────────▶ Err
//! ```
//!
//! Entries never expire unless a TTL is configured. An expired entry is
//! treated as absent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::fingerprint::{fingerprint, ReadKind};
use crate::connectivity::ConnectivityMonitor;
use crate::error::ClientError;
use crate::queue::item::epoch_millis;
use crate::storage::traits::{KvStore, StorageError, CACHE_PARTITION};
use crate::transport::TransportError;

/// A memoized read result as persisted in the `cache` partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Store time (epoch millis)
    pub stored_at: i64,
}

/// Outcome of a cached read.
///
/// `Unavailable` is distinct from any real value: an empty list that came
/// from the server is `Fresh(json!([]))`, never `Unavailable`.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRead {
    /// Live result from the server (now also cached)
    Fresh(Value),
    /// Last known value, served because the server was unreachable
    Cached { value: Value, stored_at: i64 },
    /// Unreachable and nothing cached for this request
    Unavailable,
}

impl CachedRead {
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fresh(v) | Self::Cached { value: v, .. } => Some(v),
            Self::Unavailable => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Fresh(v) | Self::Cached { value: v, .. } => Some(v),
            Self::Unavailable => None,
        }
    }

    /// Served from the cache rather than the server.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

pub struct ReadCache {
    store: Arc<dyn KvStore>,
    monitor: Arc<ConnectivityMonitor>,
    ttl: Option<Duration>,
}

impl ReadCache {
    pub fn new(store: Arc<dyn KvStore>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            store,
            monitor,
            ttl: None,
        }
    }

    /// Stop serving entries older than `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Read through the cache.
    ///
    /// The fetcher is only invoked while online. Storage failures always
    /// propagate, including when storing a fresh value.
    pub async fn read<F, Fut>(
        &self,
        kind: ReadKind,
        identifier: &str,
        args: &Value,
        fetcher: F,
    ) -> Result<CachedRead, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
    {
        self.read_inner(kind, identifier, args, fetcher, true).await
    }

    /// Like [`read`](Self::read), but a fresh value is not stored. An
    /// entry stored earlier is still served as the offline fallback.
    pub async fn read_uncached<F, Fut>(
        &self,
        kind: ReadKind,
        identifier: &str,
        args: &Value,
        fetcher: F,
    ) -> Result<CachedRead, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
    {
        self.read_inner(kind, identifier, args, fetcher, false).await
    }

    async fn read_inner<F, Fut>(
        &self,
        kind: ReadKind,
        identifier: &str,
        args: &Value,
        fetcher: F,
        write_through: bool,
    ) -> Result<CachedRead, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
    {
        let key = fingerprint(kind, identifier, args);
        let _timer = crate::metrics::LatencyTimer::new("cache", "read");

        if !self.monitor.is_online() {
            debug!(%key, "Offline, serving from cache");
            return Ok(self.fallback(&key).await?);
        }

        match fetcher().await {
            Ok(value) => {
                if write_through {
                    self.put(&key, &value).await?;
                }
                Ok(CachedRead::Fresh(value))
            }
            Err(e) if e.is_connectivity() || !self.monitor.is_online() => {
                warn!(%key, error = %e, "Fetch failed, falling back to cache");
                Ok(self.fallback(&key).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fallback(&self, key: &str) -> Result<CachedRead, StorageError> {
        match self.get(key).await? {
            Some(entry) => {
                crate::metrics::record_cache("fallback_hit");
                Ok(CachedRead::Cached {
                    value: entry.value,
                    stored_at: entry.stored_at,
                })
            }
            None => {
                crate::metrics::record_cache("fallback_miss");
                Ok(CachedRead::Unavailable)
            }
        }
    }

    /// Stored entry for a fingerprint, if present and not expired.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let Some(raw) = self.store.get(CACHE_PARTITION, key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_value(raw).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(ttl) = self.ttl {
            let age_ms = epoch_millis().saturating_sub(entry.stored_at);
            let max_age_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            if age_ms > max_age_ms {
                crate::metrics::record_cache("expired");
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }

    /// Store (overwrite) the entry for a fingerprint.
    pub async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.clone(),
            stored_at: epoch_millis(),
        };
        let raw = serde_json::to_value(&entry).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(CACHE_PARTITION, key, &raw).await?;
        crate::metrics::record_cache("store");
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(CACHE_PARTITION, key).await?;
        crate::metrics::record_cache("invalidate");
        Ok(())
    }

    /// Drop every cached read. Pending writes live in another partition
    /// and are untouched.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.clear(CACHE_PARTITION).await
    }

    /// Number of cached entries.
    pub async fn len(&self) -> Result<usize, StorageError> {
        self.store.count(CACHE_PARTITION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::document_key;
    use crate::storage::memory::InMemoryKvStore;
    use crate::storage::traits::QUEUE_PARTITION;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(online: bool) -> (Arc<ConnectivityMonitor>, ReadCache) {
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let cache = ReadCache::new(Arc::new(InMemoryKvStore::new()), monitor.clone());
        (monitor, cache)
    }

    #[tokio::test]
    async fn test_online_read_stores_value() {
        let (_, cache) = cache(true);
        let doc = json!({"name": "T1", "status": "planned"});

        let read = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async { Ok(doc.clone()) })
            .await
            .unwrap();

        assert_eq!(read, CachedRead::Fresh(doc.clone()));
        let entry = cache.get("doc:Trip:T1").await.unwrap().unwrap();
        assert_eq!(entry.value, doc);
        assert_eq!(entry.key, "doc:Trip:T1");
    }

    #[tokio::test]
    async fn test_round_trip_online_then_offline() {
        let (monitor, cache) = cache(true);
        let args = json!({"status": "active", "limit": 10});
        let rows = json!([{"name": "V1"}]);

        cache
            .read(ReadKind::List, "Vehicle", &args, || async { Ok(rows.clone()) })
            .await
            .unwrap();

        monitor.set_online(false);
        let read = cache
            .read(ReadKind::List, "Vehicle", &args, || async {
                Err(TransportError::Connectivity("offline".into()))
            })
            .await
            .unwrap();

        assert!(read.is_stale());
        assert_eq!(read.value(), Some(&rows));
    }

    #[tokio::test]
    async fn test_offline_skips_fetcher() {
        let (_, cache) = cache(false);
        let calls = AtomicUsize::new(0);

        let read = cache
            .read(ReadKind::Document, "Trip", &json!("T9"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            })
            .await
            .unwrap();

        assert_eq!(read, CachedRead::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connectivity_failure_while_online_falls_back() {
        let (_, cache) = cache(true);
        cache.put(&document_key("Trip", "T1"), &json!({"name": "T1"})).await.unwrap();

        let read = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async {
                Err(TransportError::Connectivity("dns".into()))
            })
            .await
            .unwrap();
        assert_eq!(read.into_value(), Some(json!({"name": "T1"})));
    }

    #[tokio::test]
    async fn test_server_error_propagates_while_online() {
        let (_, cache) = cache(true);
        cache.put(&document_key("Trip", "T1"), &json!({"name": "T1"})).await.unwrap();

        let err = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async {
                Err(TransportError::from_status(417, "invalid"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Request { status: 417, .. })));
    }

    #[tokio::test]
    async fn test_empty_result_is_not_unavailable() {
        let (monitor, cache) = cache(true);
        cache
            .read(ReadKind::List, "Trip", &json!({}), || async { Ok(json!([])) })
            .await
            .unwrap();

        monitor.set_online(false);
        let read = cache
            .read(ReadKind::List, "Trip", &json!({}), || async { Ok(json!(null)) })
            .await
            .unwrap();
        assert_eq!(read.value(), Some(&json!([])));
        assert!(!read.is_unavailable());
    }

    #[tokio::test]
    async fn test_read_uncached_does_not_store() {
        let (monitor, cache) = cache(true);
        let args = json!({"trip": "T1"});

        let read = cache
            .read_uncached(ReadKind::Rpc, "get_eta", &args, || async { Ok(json!(42)) })
            .await
            .unwrap();
        assert_eq!(read, CachedRead::Fresh(json!(42)));
        assert_eq!(cache.len().await.unwrap(), 0);

        monitor.set_online(false);
        let read = cache
            .read_uncached(ReadKind::Rpc, "get_eta", &args, || async { Ok(json!(0)) })
            .await
            .unwrap();
        assert!(read.is_unavailable());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_entry() {
        let (_, cache) = cache(true);
        cache.put("Trip:T1", &json!(1)).await.unwrap();
        cache.put("Trip:T1", &json!(2)).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.get("Trip:T1").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = ReadCache::new(store.clone(), Arc::new(ConnectivityMonitor::default()));
        store.set(QUEUE_PARTITION, "queue", &json!([])).await.unwrap();

        cache.put(&document_key("Trip", "T1"), &json!(1)).await.unwrap();
        cache.put(&document_key("Trip", "T2"), &json!(2)).await.unwrap();

        cache.invalidate(&document_key("Trip", "T1")).await.unwrap();
        assert!(cache.get(&document_key("Trip", "T1")).await.unwrap().is_none());
        assert!(cache.get(&document_key("Trip", "T2")).await.unwrap().is_some());

        cache.clear().await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(store.get(QUEUE_PARTITION, "queue").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_expires_entries() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = ReadCache::new(store.clone(), Arc::new(ConnectivityMonitor::new(false)))
            .with_ttl(Some(Duration::from_secs(60)));

        let old = CacheEntry {
            key: document_key("Trip", "T1"),
            value: json!({"name": "T1"}),
            stored_at: epoch_millis() - 120_000,
        };
        store
            .set(CACHE_PARTITION, &document_key("Trip", "T1"), &serde_json::to_value(&old).unwrap())
            .await
            .unwrap();

        let read = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async { Ok(json!({})) })
            .await
            .unwrap();
        assert!(read.is_unavailable());
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = ReadCache::new(store.clone(), Arc::new(ConnectivityMonitor::new(false)))
            .with_ttl(Some(Duration::from_secs(u64::MAX)));

        let old = CacheEntry {
            key: document_key("Trip", "T1"),
            value: json!({"name": "T1"}),
            stored_at: epoch_millis() - 30 * 24 * 3_600_000,
        };
        store
            .set(CACHE_PARTITION, &document_key("Trip", "T1"), &serde_json::to_value(&old).unwrap())
            .await
            .unwrap();

        let read = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async { Ok(json!({})) })
            .await
            .unwrap();
        assert!(read.is_stale());
        assert_eq!(read.value(), Some(&json!({"name": "T1"})));
    }

    #[tokio::test]
    async fn test_store_failure_on_write_through_propagates() {
        let store = Arc::new(InMemoryKvStore::with_max_entries(0));
        let cache = ReadCache::new(store, Arc::new(ConnectivityMonitor::default()));

        let err = cache
            .read(ReadKind::Document, "Trip", &json!("T1"), || async { Ok(json!({})) })
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }
}
