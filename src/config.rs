//! Configuration for the offline sync client.
//!
//! # Example
//!
//! ```
//! use offline_sync::OfflineSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = OfflineSyncConfig::default();
//! assert_eq!(config.auto_sync_interval_secs, 300); // 5 minutes
//! assert!(config.store_url.is_none()); // in-memory store
//!
//! // Full config
//! let config = OfflineSyncConfig {
//!     base_url: "https://fleet.example.com".into(),
//!     store_url: Some("sqlite:offline.db?mode=rwc".into()),
//!     request_timeout_ms: 10_000,
//!     cache_ttl_secs: Some(7 * 24 * 3600),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;
use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// Configuration for the offline sync client.
///
/// All fields have defaults. At minimum, set `base_url`, and `store_url`
/// if queued writes must survive a restart.
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineSyncConfig {
    /// Document API root (e.g., "https://erp.example.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// SQLite URL for durable storage (e.g., "sqlite:offline.db?mode=rwc").
    /// `None` keeps everything in memory.
    #[serde(default)]
    pub store_url: Option<String>,

    /// Header carrying the session's anti-forgery token
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Per-request deadline
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Immediate attempts per request for transient failures (including the first)
    #[serde(default = "default_transport_max_attempts")]
    pub transport_max_attempts: usize,

    /// Base of the linear backoff between those attempts
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,

    /// Periodic drain while online (0 = disabled)
    #[serde(default = "default_auto_sync_interval_secs")]
    pub auto_sync_interval_secs: u64,

    /// Connectivity probe interval (0 = disabled, state set only by the host)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Consecutive connectivity failures before going offline
    #[serde(default = "default_probe_failure_threshold")]
    pub probe_failure_threshold: u64,

    /// Initial connectivity assumption before the first probe or event
    #[serde(default = "default_start_online")]
    pub start_online: bool,

    /// Stop serving cached reads older than this (`None` = never expire)
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Document field holding the server-assigned key
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_auth_header() -> String { "X-Frappe-CSRF-Token".to_string() }
fn default_request_timeout_ms() -> u64 { 15_000 }
fn default_transport_max_attempts() -> usize { 3 }
fn default_transport_retry_delay_ms() -> u64 { 1000 }
fn default_auto_sync_interval_secs() -> u64 { 300 } // 5 minutes
fn default_probe_interval_secs() -> u64 { 30 }
fn default_probe_failure_threshold() -> u64 { 3 }
fn default_start_online() -> bool { true }
fn default_id_field() -> String { "name".to_string() }

impl Default for OfflineSyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            store_url: None,
            auth_header: default_auth_header(),
            request_timeout_ms: default_request_timeout_ms(),
            transport_max_attempts: default_transport_max_attempts(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
            auto_sync_interval_secs: default_auto_sync_interval_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_failure_threshold: default_probe_failure_threshold(),
            start_online: default_start_online(),
            cache_ttl_secs: None,
            id_field: default_id_field(),
        }
    }
}

impl OfflineSyncConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Low-level retry policy for a single request.
    #[must_use]
    pub fn transport_retry(&self) -> RetryConfig {
        RetryConfig::linear(
            self.transport_max_attempts,
            Duration::from_millis(self.transport_retry_delay_ms),
        )
    }

    #[must_use]
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        (self.auto_sync_interval_secs > 0).then(|| Duration::from_secs(self.auto_sync_interval_secs))
    }

    #[must_use]
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}
