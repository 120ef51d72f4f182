//! Public types for the sync engine.

use serde::Serialize;

use crate::queue::QueueItem;

/// Drain state.
///
/// ```text
/// Idle → Draining → Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Draining,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Draining => write!(f, "Draining"),
        }
    }
}

/// A queued mutation the server did not accept on this drain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub item: QueueItem,
    pub reason: String,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    /// Items confirmed by the server and removed from the queue
    pub succeeded: usize,
    /// Items left queued for the next drain, in queue order
    pub failed: Vec<FailedItem>,
    /// Nothing was sent: another drain was running, or the client was offline
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl SyncResult {
    /// Result of a drain request that did not run.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Items attempted on this drain.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    /// Whether every attempted item went through.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Snapshot of sync health for user-visible reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    /// Last drain that confirmed at least one item (epoch millis)
    pub last_sync_at: Option<i64>,
    /// Failures from the most recent drain
    pub last_errors: Vec<FailedItem>,
}

impl SyncStatus {
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.pending_count > 0
    }

    /// Relative description of `last_sync_at` as seen at `now_ms`.
    #[must_use]
    pub fn last_sync_label(&self, now_ms: i64) -> String {
        let Some(at) = self.last_sync_at else {
            return "Never".to_string();
        };

        let minutes = now_ms.saturating_sub(at).max(0) / 60_000;
        if minutes < 1 {
            return "Just now".to_string();
        }
        if minutes < 60 {
            return plural(minutes, "minute");
        }
        let hours = minutes / 60;
        if hours < 24 {
            return plural(hours, "hour");
        }
        plural(hours / 24, "day")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}
