// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: queue, cache, transport, sync
//! - `operation`: enqueue, read, create, update, delete, drain
//! - `status`: success, error, queued, skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an operation outcome
pub fn record_operation(component: &str, operation: &str, status: &str) {
    counter!(
        "offline_sync_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITE QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Set number of mutations waiting to be sent
pub fn set_queue_depth(count: usize) {
    gauge!("offline_sync_queue_items").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// READ CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache outcome: `store`, `fallback_hit`, `fallback_miss`, `expired`
pub fn record_cache(outcome: &str) {
    counter!(
        "offline_sync_cache_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════

/// Record a transport failure by class (connectivity, timeout, server, request, ...)
pub fn record_transport_error(operation: &str, class: &str) {
    counter!(
        "offline_sync_transport_errors_total",
        "operation" => operation.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
}

/// Record a request timeout
pub fn record_timeout(operation: &str) {
    counter!(
        "offline_sync_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed drain cycle
pub fn record_drain(succeeded: usize, failed: usize, duration: Duration) {
    counter!("offline_sync_drains_total").increment(1);
    counter!("offline_sync_drained_items_total", "status" => "success").increment(succeeded as u64);
    counter!("offline_sync_drained_items_total", "status" => "failure").increment(failed as u64);
    histogram!("offline_sync_drain_seconds").record(duration.as_secs_f64());
}

/// Record a drain request rejected because another drain was running
pub fn record_drain_skipped() {
    counter!("offline_sync_drains_skipped_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTIVITY
// ═══════════════════════════════════════════════════════════════════════════

/// Set connectivity (1 = online, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("offline_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a connectivity transition
pub fn record_transition(to_online: bool) {
    let to = if to_online { "online" } else { "offline" };
    counter!(
        "offline_sync_connectivity_transitions_total",
        "to" => to
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}
