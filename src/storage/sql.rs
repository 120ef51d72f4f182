// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed durable key-value store.
//!
//! All partitions share one table; values are stored as JSON text:
//! ```sql
//! CREATE TABLE kv_entries (
//!   partition_name TEXT NOT NULL,
//!   entry_key      TEXT NOT NULL,
//!   value          TEXT NOT NULL,   -- JSON
//!   updated_at     INTEGER NOT NULL, -- epoch millis
//!   PRIMARY KEY (partition_name, entry_key)
//! )
//! ```
//!
//! The `Any` driver is used so the connection string alone selects the
//! backend; only SQLite is installed.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

use super::traits::{KvStore, StorageError};
use crate::queue::item::epoch_millis;
use crate::resilience::retry::{retry, retry_if, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// SQLite result code for "database or disk is full".
const SQLITE_FULL: &str = "13";

/// Primary result codes for `SQLITE_BUSY` and `SQLITE_LOCKED`.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Whether a statement is worth retrying: lock contention or a flaky pool.
/// A full disk or a constraint violation fails the same way every time.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLITE_FULL) => {
            StorageError::Unavailable(format!("device full: {}", db.message()))
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StorageError::Unavailable(err.to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

pub struct SqlKvStore {
    pool: AnyPool,
}

impl SqlKvStore {
    /// Open (or create) the store, e.g. `sqlite://offline.db?mode=rwc`.
    /// Opening is retried briefly, so a bad path fails within seconds.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        if !connection_string.starts_with("sqlite:") {
            return Err(StorageError::Backend(format!(
                "unsupported store url '{}': only sqlite is supported",
                connection_string
            )));
        }

        let pool = retry("kv_connect", &RetryConfig::open_store(), || async {
            AnyPoolOptions::new()
                // One writer keeps read-modify-write sequences from interleaving
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(map_sqlx_error)
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        // FULL: a queued write must survive power loss once enqueue returns
        sqlx::query("PRAGMA synchronous = FULL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                partition_name TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (partition_name, entry_key)
            )
        "#;

        retry("kv_init_schema", &RetryConfig::open_store(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqlKvStore {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let row = retry_if(
            "kv_get",
            &RetryConfig::statement(),
            || {
                sqlx::query("SELECT value FROM kv_entries WHERE partition_name = ? AND entry_key = ?")
                    .bind(partition)
                    .bind(key)
                    .fetch_optional(&self.pool)
            },
            is_transient,
        )
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let text: String = row.try_get("value").map_err(map_sqlx_error)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StorageError::Serialization {
                key: format!("{}/{}", partition, key),
                reason: e.to_string(),
            })
    }

    async fn set(&self, partition: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let text = serde_json::to_string(value).map_err(|e| StorageError::Serialization {
            key: format!("{}/{}", partition, key),
            reason: e.to_string(),
        })?;
        let updated_at = epoch_millis();

        retry_if(
            "kv_set",
            &RetryConfig::statement(),
            || {
                sqlx::query(
                    "INSERT INTO kv_entries (partition_name, entry_key, value, updated_at) VALUES (?, ?, ?, ?)
                     ON CONFLICT(partition_name, entry_key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                )
                .bind(partition)
                .bind(key)
                .bind(text.as_str())
                .bind(updated_at)
                .execute(&self.pool)
            },
            is_transient,
        )
        .await
        .map_err(map_sqlx_error)?;

        debug!(partition, key, bytes = text.len(), "kv entry written");
        Ok(())
    }

    async fn remove(&self, partition: &str, key: &str) -> Result<(), StorageError> {
        retry_if(
            "kv_remove",
            &RetryConfig::statement(),
            || {
                sqlx::query("DELETE FROM kv_entries WHERE partition_name = ? AND entry_key = ?")
                    .bind(partition)
                    .bind(key)
                    .execute(&self.pool)
            },
            is_transient,
        )
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn clear(&self, partition: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE partition_name = ?")
            .bind(partition)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(partition, removed = result.rows_affected(), "kv partition cleared");
        Ok(())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT entry_key FROM kv_entries WHERE partition_name = ? ORDER BY entry_key")
            .bind(partition)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("entry_key").map_err(map_sqlx_error)?;
            keys.push(key);
        }
        Ok(keys)
    }

    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM kv_entries WHERE partition_name = ?")
            .bind(partition)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let count: i64 = row.try_get("cnt").map_err(map_sqlx_error)?;
        Ok(count as usize)
    }
}
