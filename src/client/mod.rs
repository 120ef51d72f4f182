// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline-first client façade.
//!
//! The [`OfflineClient`] owns one instance of every component and is the
//! only thing an application talks to:
//! - [`ReadCache`] serving last known values while offline
//! - [`WriteQueue`] holding writes made while offline
//! - [`SyncEngine`] replaying the queue on reconnect and on a timer
//! - [`ConnectivityMonitor`] deciding fetch-vs-queue
//!
//! # Example
//!
//! ```rust,no_run
//! use offline_sync::{OfflineClient, OfflineSyncConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), offline_sync::ClientError> {
//! let config = OfflineSyncConfig {
//!     base_url: "https://fleet.example.com".into(),
//!     store_url: Some("sqlite:offline.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let client = OfflineClient::from_config(config).await?;
//! client.start();
//!
//! let outcome = client.set_doc("Trip", "T1", json!({"status": "started"})).await?;
//! if outcome.is_queued() {
//!     println!("{} change(s) waiting for signal", client.pending_count().await?);
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{QueuedAck, WriteOutcome, QUEUED_MESSAGE};

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::ReadCache;
use crate::config::OfflineSyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityProbe, SubscriptionId};
use crate::error::ClientError;
use crate::queue::WriteQueue;
use crate::storage::{InMemoryKvStore, KvStore, SqlKvStore};
use crate::sync::SyncEngine;
use crate::transport::{HttpTransport, RetryingTransport, Transport};

pub struct OfflineClient {
    pub(super) config: OfflineSyncConfig,
    pub(super) monitor: Arc<ConnectivityMonitor>,
    /// Remote API wrapped with per-call timeout and transient retry
    pub(super) transport: Arc<dyn Transport>,
    pub(super) cache: Arc<ReadCache>,
    pub(super) queue: Arc<WriteQueue>,
    pub(super) engine: Arc<SyncEngine>,

    /// Reachability source for the probe loop
    pub(super) probe: Option<Arc<dyn ConnectivityProbe>>,
    /// Set when built by [`from_config`](Self::from_config), for token updates
    pub(super) http: Option<Arc<HttpTransport>>,

    pub(super) reconnect_subscription: SubscriptionId,
    pub(super) started: AtomicBool,
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineClient {
    /// Wire up all components over `store` and `transport`.
    ///
    /// Reconnect-triggered draining is active immediately; call
    /// [`start`](Self::start) for the periodic sync and probe loops.
    pub fn new(config: OfflineSyncConfig, store: Arc<dyn KvStore>, transport: Arc<dyn Transport>) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::with_failure_threshold(
            config.start_online,
            config.probe_failure_threshold,
        ));
        let transport: Arc<dyn Transport> = Arc::new(
            RetryingTransport::new(transport, config.transport_retry(), config.request_timeout())
                .with_monitor(monitor.clone()),
        );

        let cache = Arc::new(ReadCache::new(store.clone(), monitor.clone()).with_ttl(config.cache_ttl()));
        let queue = Arc::new(WriteQueue::new(store));
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            cache.clone(),
            transport.clone(),
            config.id_field.clone(),
        ));

        let reconnect_subscription = lifecycle::register_reconnect_drain(&monitor, &engine);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            monitor,
            transport,
            cache,
            queue,
            engine,
            probe: None,
            http: None,
            reconnect_subscription,
            started: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the default stack: SQLite (or in-memory) storage and the
    /// HTTP transport, which also serves as the connectivity probe.
    pub async fn from_config(config: OfflineSyncConfig) -> Result<Self, ClientError> {
        let store: Arc<dyn KvStore> = match config.store_url.as_deref() {
            Some(url) => {
                info!(url = %url, "Opening durable offline store");
                Arc::new(SqlKvStore::new(url).await?)
            }
            None => {
                info!("No store_url configured - offline data will not survive restart");
                Arc::new(InMemoryKvStore::new())
            }
        };

        let http = Arc::new(HttpTransport::with_auth_header(
            &config.base_url,
            config.request_timeout(),
            &config.auth_header,
        )?);

        let mut client = Self::new(config, store, http.clone());
        client.http = Some(http.clone());
        Ok(client.with_probe(http))
    }

    /// Use `probe` for headless connectivity checks.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn config(&self) -> &OfflineSyncConfig {
        &self.config
    }

    /// Connectivity state; hosts with platform events call
    /// [`ConnectivityMonitor::set_online`] on it.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    /// The HTTP transport, when built by [`from_config`](Self::from_config).
    #[must_use]
    pub fn http(&self) -> Option<&Arc<HttpTransport>> {
        self.http.as_ref()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }
}

impl Drop for OfflineClient {
    fn drop(&mut self) {
        self.monitor.unsubscribe(self.reconnect_subscription);
        self.shutdown_tx.send_replace(true);
    }
}
