// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Online/offline state machine.
//!
//! ```text
//!            set_online(true) / probe ok
//!   Offline ───────────────────────────────▶ Online
//!      ▲                                       │
//!      └───────────────────────────────────────┘
//!     set_online(false) / N consecutive connectivity failures
//! ```
//!
//! The flag is an atomic read with no suspension, so the read and write
//! paths can consult it synchronously. Each actual change of state is
//! delivered once to every registered handler and to `watch` subscribers;
//! repeated reports of the same state are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A change of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WentOnline => write!(f, "offline→online"),
            Self::WentOffline => write!(f, "online→offline"),
        }
    }
}

/// Callback invoked synchronously on every transition.
pub type TransitionHandler = Arc<dyn Fn(Transition) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::on_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of reachability checks for headless environments.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// `true` if the server answered.
    async fn probe(&self) -> bool;
}

pub struct ConnectivityMonitor {
    online: AtomicBool,
    state_tx: watch::Sender<bool>,
    handlers: RwLock<Vec<(SubscriptionId, TransitionHandler)>>,
    next_id: AtomicU64,
    /// Consecutive connectivity failures since the last success
    failures: AtomicU64,
    failure_threshold: u64,
    /// Serializes flag flips so each transition is announced exactly once
    transition_lock: Mutex<()>,
    /// Prevents overlapping probes
    probing: tokio::sync::Mutex<()>,
}

impl ConnectivityMonitor {
    /// Default consecutive failures before declaring offline.
    pub const DEFAULT_FAILURE_THRESHOLD: u64 = 3;

    pub fn new(initially_online: bool) -> Self {
        Self::with_failure_threshold(initially_online, Self::DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(initially_online: bool, failure_threshold: u64) -> Self {
        let (state_tx, _) = watch::channel(initially_online);
        crate::metrics::set_online(initially_online);
        Self {
            online: AtomicBool::new(initially_online),
            state_tx,
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            failure_threshold: failure_threshold.max(1),
            transition_lock: Mutex::new(()),
            probing: tokio::sync::Mutex::new(()),
        }
    }

    /// Current connectivity flag.
    #[must_use]
    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Set the flag, notifying subscribers if it changed.
    ///
    /// Returns the transition that happened, if any.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let handlers = {
            let _guard = self.transition_lock.lock();
            if self.online.swap(online, Ordering::AcqRel) == online {
                return None;
            }
            if online {
                self.failures.store(0, Ordering::Release);
            }
            self.state_tx.send_replace(online);
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect::<Vec<_>>()
        };

        let transition = if online { Transition::WentOnline } else { Transition::WentOffline };
        crate::metrics::set_online(online);
        crate::metrics::record_transition(online);
        match transition {
            Transition::WentOnline => info!(handlers = handlers.len(), "Connectivity restored"),
            Transition::WentOffline => warn!("Connectivity lost - writes will be queued"),
        }

        for handler in handlers {
            handler(transition);
        }
        Some(transition)
    }

    /// Register a transition callback.
    pub fn on_transition<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Transition) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a transition callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Watch the flag from async code.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Record that the server answered.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.set_online(true);
    }

    /// Record a connectivity failure; flips offline at the threshold.
    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(failures, threshold = self.failure_threshold, "Connectivity failure recorded");
        if failures >= self.failure_threshold {
            self.set_online(false);
        }
    }

    /// Consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Run one probe and feed the result into the health counters.
    pub async fn check(&self, probe: &dyn ConnectivityProbe) -> bool {
        // Prevent multiple simultaneous probes
        let _guard = self.probing.lock().await;

        if probe.probe().await {
            self.record_success();
            true
        } else {
            self.record_failure();
            false
        }
    }

    /// Probe every `interval` until `shutdown` flips to `true`.
    pub async fn run_probe_loop(
        self: Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(probe.as_ref()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Connectivity probe loop stopping");
                        break;
                    }
                }
            }
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
