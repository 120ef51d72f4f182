//! Client lifecycle: background loops, manual sync, status, clearing.

use std::sync::{Arc, Weak};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connectivity::{ConnectivityMonitor, SubscriptionId, Transition};
use crate::error::ClientError;
use crate::sync::{SyncEngine, SyncResult, SyncStatus};

use super::OfflineClient;

/// Drain once on every offline→online transition, without blocking the
/// caller that reported it.
pub(super) fn register_reconnect_drain(
    monitor: &ConnectivityMonitor,
    engine: &Arc<SyncEngine>,
) -> SubscriptionId {
    // Weak: the monitor must not keep the engine (and through it the
    // monitor) alive
    let engine: Weak<SyncEngine> = Arc::downgrade(engine);

    monitor.on_transition(move |transition| {
        if transition != Transition::WentOnline {
            return;
        }
        let Some(engine) = engine.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match engine.drain().await {
                        Ok(result) if !result.skipped => {
                            info!(succeeded = result.succeeded, failed = result.failed.len(), "Reconnect sync finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Reconnect sync failed"),
                    }
                });
            }
            Err(_) => warn!("Reconnected outside a Tokio runtime; queue will drain on next sync"),
        }
    })
}

/// Drain every `period` while online and idle, until shutdown.
async fn run_auto_sync(
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !monitor.is_online() || engine.is_draining() {
                    continue;
                }
                if let Err(e) = engine.drain().await {
                    error!(error = %e, "Periodic sync failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Auto-sync loop stopping");
                    break;
                }
            }
        }
    }
}

impl OfflineClient {
    /// Spawn the periodic sync and connectivity probe loops.
    ///
    /// Must be called inside a Tokio runtime. Calling it again is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut tasks = self.tasks.lock();

        if let Some(period) = self.config.auto_sync_interval() {
            tasks.push(tokio::spawn(run_auto_sync(
                self.engine.clone(),
                self.monitor.clone(),
                period,
                self.shutdown_tx.subscribe(),
            )));
        }

        match (&self.probe, self.config.probe_interval()) {
            (Some(probe), Some(interval)) => {
                tasks.push(tokio::spawn(self.monitor.clone().run_probe_loop(
                    probe.clone(),
                    interval,
                    self.shutdown_tx.subscribe(),
                )));
            }
            (None, Some(_)) => debug!("No connectivity probe configured; state follows host events"),
            _ => {}
        }

        info!(
            auto_sync_secs = self.config.auto_sync_interval_secs,
            probe_secs = self.config.probe_interval_secs,
            online = self.monitor.is_online(),
            "Offline sync client started"
        );
    }

    /// Stop the background loops and wait for them to exit.
    ///
    /// A drain already running completes first.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down offline sync client...");
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        // Wait out a reconnect drain so pending state is persisted
        let mut state = self.engine.state_receiver();
        let _ = state.wait_for(|s| *s == crate::sync::SyncState::Idle).await;
        self.started.store(false, Ordering::Release);

        info!("Offline sync client shutdown complete");
    }

    /// Drain the queue now. A no-op while offline.
    pub async fn sync_now(&self) -> Result<SyncResult, ClientError> {
        if !self.monitor.is_online() {
            debug!("Offline, sync deferred");
            return Ok(SyncResult::skipped());
        }
        Ok(self.engine.drain().await?)
    }

    /// Resend the items that failed on earlier drains.
    ///
    /// Failed items stay at the head of the queue, so this is a full drain.
    pub async fn retry_failed(&self) -> Result<SyncResult, ClientError> {
        self.sync_now().await
    }

    /// Number of writes waiting to be sent.
    pub async fn pending_count(&self) -> Result<usize, ClientError> {
        Ok(self.queue.count().await?)
    }

    pub async fn status(&self) -> Result<SyncStatus, ClientError> {
        Ok(SyncStatus {
            is_online: self.monitor.is_online(),
            is_syncing: self.engine.is_draining(),
            pending_count: self.queue.count().await?,
            last_sync_at: self.engine.last_sync_at(),
            last_errors: self.engine.last_errors(),
        })
    }

    /// Drop all cached reads. Pending writes are kept.
    pub async fn clear_cache(&self) -> Result<(), ClientError> {
        self.cache.clear().await?;
        info!("Read cache cleared");
        Ok(())
    }

    /// Discard cached reads *and* pending writes.
    ///
    /// This loses unsent changes; it is meant for an explicit user action
    /// such as signing out. Returns how many queued writes were dropped.
    pub async fn clear_offline_data(&self) -> Result<usize, ClientError> {
        self.cache.clear().await?;
        let dropped = self.queue.clear().await?;
        self.engine.reset_history();
        if dropped > 0 {
            warn!(dropped, "Discarded unsent offline changes");
        }
        Ok(dropped)
    }
}
