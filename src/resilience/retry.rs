// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential or linear backoff.
//!
//! Two callers: the SQLite store (busy database, slow first open) and the
//! transport's immediate retry tier. Queue-level retry is not done here; a
//! failed queued write simply waits for the next drain.
//!
//! # Example
//!
//! ```
//! use offline_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Network request: 3 attempts, 1s then 2s between them
//! let transport = RetryConfig::transport();
//! assert_eq!(transport.max_attempts, Some(3));
//! assert_eq!(transport.delay_after(1), Duration::from_secs(1));
//! assert_eq!(transport.delay_after(2), Duration::from_secs(2));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Growth of the wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay * factor^(n-1)`
    Exponential { factor: f64 },
    /// `initial_delay * n`
    Linear,
}

/// Retry policy.
///
/// Presets:
/// - [`RetryConfig::open_store()`] - opening the local database
/// - [`RetryConfig::statement()`] - one storage statement against a busy database
/// - [`RetryConfig::transport()`] - one network request
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Attempts including the first. `None` retries until success.
    pub max_attempts: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::transport()
    }
}

impl RetryConfig {
    /// 5 attempts, 200ms doubling to 2s. A bad path fails in a few seconds.
    #[must_use]
    pub fn open_store() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// 3 attempts, 50ms doubling. SQLite reports `SQLITE_BUSY` briefly
    /// while another connection checkpoints the WAL.
    #[must_use]
    pub fn statement() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// 3 attempts, waiting `1s * n` after the nth failure.
    #[must_use]
    pub fn transport() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }

    /// Linear backoff. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn linear(max_attempts: usize, base_delay: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts: Some(max_attempts),
            initial_delay: base_delay,
            max_delay: base_delay.saturating_mul(max_attempts as u32),
            backoff: Backoff::Linear,
        }
    }

    /// Wait after the nth failed attempt (1-indexed), capped at `max_delay`.
    #[must_use]
    pub fn delay_after(&self, failures: usize) -> Duration {
        let n = failures.max(1);
        let delay = match self.backoff {
            Backoff::Exponential { factor } => self.initial_delay.mul_f64(factor.powi(n as i32 - 1)),
            Backoff::Linear => self.initial_delay.saturating_mul(n as u32),
        };
        delay.min(self.max_delay)
    }

    fn exhausted(&self, failures: usize) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Retry `operation` on any error.
pub async fn retry<F, Fut, T, E>(name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(name, config, operation, |_| true).await
}

/// Retry `operation` while `retryable` accepts the error.
///
/// A rejected error is returned at once, without waiting.
pub async fn retry_if<F, Fut, T, E, P>(
    name: &str,
    config: &RetryConfig,
    mut operation: F,
    mut retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: FnMut(&E) -> bool,
{
    let mut failures = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if failures > 0 {
                    debug!(operation = name, failures, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        failures += 1;

        if !retryable(&err) || config.exhausted(failures) {
            return Err(err);
        }

        let delay = config.delay_after(failures);
        warn!(
            operation = name,
            attempt = failures,
            max_attempts = ?config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        sleep(delay).await;
    }
}
