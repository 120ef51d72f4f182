//! # Offline Sync
//!
//! An offline-first data layer for field clients of a remote document API.
//!
//! ## Architecture
//!
//! A field worker keeps reading and writing while connectivity comes and
//! goes. Reads are memoized locally; writes made offline are queued durably
//! and replayed in order once the network is back:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OfflineClient                          │
//! │  • get_doc / get_list / call      (reads)                  │
//! │  • create_doc / set_doc / delete_doc  (writes)             │
//! └─────────────────────────────────────────────────────────────┘
//!            │ reads                          │ writes
//!            ▼                                ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │        ReadCache         │   │          WriteQueue          │
//! │  • fingerprint keys      │   │  • ordered, durable FIFO     │
//! │  • fallback when offline │   │  • "queued" acknowledgment   │
//! └──────────────────────────┘   └──────────────────────────────┘
//!            │                                │
//!            │            ┌───────────────────┘
//!            │            ▼
//!            │   ┌──────────────────────────────────────────────┐
//!            │   │                 SyncEngine                   │
//!            │   │  • drains queue in order, one drain at a time│
//!            │   │  • failed items wait for the next drain      │
//!            │   └──────────────────────────────────────────────┘
//!            │            ▲ reconnect / timer
//!            │   ┌──────────────────────────────────────────────┐
//!            │   │            ConnectivityMonitor               │
//!            │   └──────────────────────────────────────────────┘
//!            ▼            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RetryingTransport → HttpTransport  (timeout, 3× linear)   │
//! └─────────────────────────────────────────────────────────────┘
//!            │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  KvStore: `cache` and `write_queue` partitions              │
//! │  (SQLite via sqlx, or in-memory)                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offline_sync::{OfflineClient, OfflineSyncConfig, ListQuery};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), offline_sync::ClientError> {
//!     let config = OfflineSyncConfig {
//!         base_url: "https://fleet.example.com".into(),
//!         store_url: Some("sqlite:offline.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!
//!     let client = OfflineClient::from_config(config).await?;
//!     client.start();
//!
//!     // Served from cache when the network is gone
//!     let trips = client
//!         .get_list("Trip", ListQuery::default().with_filters(json!({"status": "planned"})))
//!         .await?;
//!     println!("{:?}", trips.value());
//!
//!     // Queued when offline, replayed on reconnect
//!     client.set_doc("Trip", "T1", json!({"status": "started"})).await?;
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Write-through read cache**: last known value served while offline
//! - **Durable write queue**: survives restarts on SQLite, strict FIFO
//! - **Single-flight drain**: concurrent sync requests never double-send
//! - **Two retry tiers**: immediate transport retries, then the next drain
//! - **Reconnect and periodic sync**: drains on offline→online and on a timer
//! - **Headless probing**: consecutive-failure threshold for offline detection
//!
//! ## Configuration
//!
//! See [`OfflineSyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`client`]: The [`OfflineClient`] façade
//! - [`cache`]: Fingerprints and the read cache
//! - [`queue`]: Queue items and the write queue
//! - [`sync`]: The [`SyncEngine`] drain
//! - [`connectivity`]: Online/offline state machine and probing
//! - [`transport`]: Remote API contract, HTTP implementation, retry wrapper
//! - [`storage`]: Key-value stores (SQLite, memory)
//! - [`resilience`]: Retry policies

pub mod config;
pub mod error;
pub mod storage;
pub mod resilience;
pub mod queue;
pub mod cache;
pub mod transport;
pub mod connectivity;
pub mod sync;
pub mod client;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::OfflineSyncConfig;
pub use error::ClientError;
pub use client::{OfflineClient, QueuedAck, WriteOutcome};
pub use cache::{fingerprint, CacheEntry, CachedRead, ReadCache, ReadKind};
pub use queue::{Operation, QueueItem, WriteQueue};
pub use sync::{FailedItem, SyncEngine, SyncResult, SyncState, SyncStatus};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, SubscriptionId, Transition};
pub use transport::{HttpTransport, ListQuery, RetryingTransport, Transport, TransportError};
pub use storage::{InMemoryKvStore, KvStore, SqlKvStore, StorageError, CACHE_PARTITION, QUEUE_PARTITION};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
