// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A field worker's session across a dead zone.
//!
//! Demonstrates:
//! 1. Reading a trip while online (cached on the way through)
//! 2. Losing signal: reads served from cache, writes queued
//! 3. Regaining signal: the queue drains automatically
//! 4. Sync status and raw metrics
//!
//! Uses an in-process server so nothing needs to be running.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=offline_sync=debug cargo run --example field_worker
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use offline_sync::{
    InMemoryKvStore, ListQuery, OfflineClient, OfflineSyncConfig, Transport, TransportError,
};

/// Document server living in this process. Drops every request while
/// `reachable` is off, like a phone in a tunnel.
#[derive(Default)]
struct DepotServer {
    docs: Mutex<HashMap<String, Value>>,
    reachable: AtomicBool,
    next_id: AtomicU32,
}

impl DepotServer {
    fn gate(&self) -> Result<(), TransportError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Connectivity("no route to host".into()))
        }
    }
}

#[async_trait]
impl Transport for DepotServer {
    async fn fetch_document(&self, resource_type: &str, resource_key: &str) -> Result<Value, TransportError> {
        self.gate()?;
        let key = format!("{}:{}", resource_type, resource_key);
        self.docs.lock().get(&key).cloned().ok_or(TransportError::NotFound(key))
    }

    async fn list_documents(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Value>, TransportError> {
        self.gate()?;
        let prefix = format!("{}:", resource_type);
        Ok(self
            .docs
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .take(query.limit)
            .collect())
    }

    async fn call_remote_method(&self, method: &str, _args: &Value) -> Result<Value, TransportError> {
        self.gate()?;
        Ok(json!({"method": method, "ok": true}))
    }

    async fn create_document(&self, resource_type: &str, payload: &Value) -> Result<Value, TransportError> {
        self.gate()?;
        let name = format!("INC-{:03}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut doc = payload.clone();
        doc["name"] = json!(name);
        self.docs.lock().insert(format!("{}:{}", resource_type, name), doc.clone());
        Ok(doc)
    }

    async fn update_document(&self, resource_type: &str, resource_key: &str, payload: &Value) -> Result<Value, TransportError> {
        self.gate()?;
        let mut docs = self.docs.lock();
        let doc = docs
            .get_mut(&format!("{}:{}", resource_type, resource_key))
            .ok_or_else(|| TransportError::NotFound(resource_key.to_string()))?;
        if let (Some(doc), Some(patch)) = (doc.as_object_mut(), payload.as_object()) {
            doc.extend(patch.clone());
        }
        Ok(doc.clone())
    }

    async fn delete_document(&self, resource_type: &str, resource_key: &str) -> Result<(), TransportError> {
        self.gate()?;
        self.docs.lock().remove(&format!("{}:{}", resource_type, resource_key));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_sync=info")))
        .with_target(false)
        .compact()
        .init();

    let server = Arc::new(DepotServer::default());
    server.reachable.store(true, Ordering::SeqCst);
    server
        .docs
        .lock()
        .insert("Trip:T1".into(), json!({"name": "T1", "route": "Depot → Site 4", "status": "planned"}));

    let config = OfflineSyncConfig {
        transport_retry_delay_ms: 50,
        probe_interval_secs: 0,
        ..Default::default()
    };
    let client = OfflineClient::new(config, Arc::new(InMemoryKvStore::new()), server.clone());
    client.start();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Online: read the day's trip
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Online");
    let trip = client.get_doc("Trip", "T1").await?;
    println!("   └─ Trip T1: {}", trip.value().cloned().unwrap_or_default());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Dead zone
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚇 Signal lost");
    server.reachable.store(false, Ordering::SeqCst);
    client.monitor().set_online(false);

    let trip = client.get_doc("Trip", "T1").await?;
    println!("   ├─ Trip T1 from cache (stale: {}): {}", trip.is_stale(), trip.value().cloned().unwrap_or_default());

    let started = client.set_doc("Trip", "T1", json!({"status": "started"})).await?;
    let incident = client
        .create_doc("Incident", json!({"trip": "T1", "note": "Flat tyre at km 42"}))
        .await?;
    for outcome in [&started, &incident] {
        if let Some(ack) = outcome.queued() {
            println!("   ├─ {} ({})", ack.message, ack.queue_id);
        }
    }
    println!("   └─ Pending changes: {}", client.pending_count().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Back in range
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Signal restored");
    server.reachable.store(true, Ordering::SeqCst);
    client.monitor().set_online(true);

    while client.pending_count().await? > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("   ├─ Server copy of T1: {}", server.docs.lock().get("Trip:T1").cloned().unwrap_or_default());
    println!("   └─ Pending changes: {}", client.pending_count().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Status and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let status = client.status().await?;
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_millis() as i64;
    println!("\n🧾 Status");
    println!("   ├─ Online: {}", status.is_online);
    println!("   ├─ Last sync: {}", status.last_sync_label(now));
    println!("   └─ Last errors: {}", status.last_errors.len());

    println!("\n📈 Metrics");
    dump_metrics(&snapshotter);

    client.shutdown().await;
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let value = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.0}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("{}{{{}}} = {}", key.name(), labels.join(","), value)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
