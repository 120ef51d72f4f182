//! Shared test doubles: an in-process fake of the document API.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use offline_sync::{
    InMemoryKvStore, KvStore, ListQuery, OfflineClient, OfflineSyncConfig, Transport, TransportError,
};

/// Fake document server.
///
/// Holds documents keyed `Type:key`, logs every call in order, and can be
/// made unreachable or told to reject specific targets.
#[derive(Default)]
pub struct FakeServer {
    docs: Mutex<BTreeMap<String, Value>>,
    log: Mutex<Vec<String>>,
    unreachable: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    delay: Mutex<Option<Duration>>,
    /// Every nth call fails with a connectivity error (0 = never)
    flaky_every: AtomicU64,
    calls: AtomicU64,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Reject mutations of `target` (`Type:key`) with a 417.
    pub fn reject(&self, target: &str) {
        self.rejected.lock().insert(target.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn clear_delay(&self) {
        *self.delay.lock() = None;
    }

    pub fn set_flaky(&self, every: u64) {
        self.flaky_every.store(every, Ordering::SeqCst);
    }

    pub fn insert(&self, resource_type: &str, key: &str, doc: Value) {
        self.docs.lock().insert(format!("{}:{}", resource_type, key), doc);
    }

    pub fn doc(&self, resource_type: &str, key: &str) -> Option<Value> {
        self.docs.lock().get(&format!("{}:{}", resource_type, key)).cloned()
    }

    /// Calls received so far, e.g. `"update Trip:T1"`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Mutating calls only.
    pub fn mutations(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|c| c.starts_with("create") || c.starts_with("update") || c.starts_with("delete"))
            .collect()
    }

    async fn enter(&self, call: String, target: &str) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connectivity("connection refused".into()));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.flaky_every.load(Ordering::SeqCst);
        if every > 0 && n % every == 0 {
            return Err(TransportError::Connectivity("connection reset".into()));
        }
        self.log.lock().push(call);
        if self.rejected.lock().contains(target) {
            return Err(TransportError::from_status(417, format!("{} failed validation", target)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn fetch_document(&self, resource_type: &str, resource_key: &str) -> Result<Value, TransportError> {
        let target = format!("{}:{}", resource_type, resource_key);
        self.enter(format!("get {}", target), &target).await?;
        self.docs
            .lock()
            .get(&target)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(target))
    }

    async fn list_documents(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Value>, TransportError> {
        self.enter(format!("list {}", resource_type), resource_type).await?;
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

    async fn call_remote_method(&self, method: &str, args: &Value) -> Result<Value, TransportError> {
        self.enter(format!("call {}", method), method).await?;
        Ok(json!({"method": method, "args": args}))
    }

    async fn create_document(&self, resource_type: &str, payload: &Value) -> Result<Value, TransportError> {
        let name = match payload.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => format!("{}-{:04}", resource_type.to_uppercase(), self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let target = format!("{}:{}", resource_type, name);
        self.enter(format!("create {}", target), &target).await?;

        let mut doc = payload.clone();
        doc["name"] = json!(name);
        doc["doctype"] = json!(resource_type);
        self.docs.lock().insert(target, doc.clone());
        Ok(doc)
    }

    async fn update_document(&self, resource_type: &str, resource_key: &str, payload: &Value) -> Result<Value, TransportError> {
        let target = format!("{}:{}", resource_type, resource_key);
        self.enter(format!("update {}", target), &target).await?;

        let mut docs = self.docs.lock();
        let doc = docs.entry(target).or_insert_with(|| json!({"name": resource_key}));
        if let (Some(doc), Some(patch)) = (doc.as_object_mut(), payload.as_object()) {
            for (k, v) in patch {
                doc.insert(k.clone(), v.clone());
            }
        }
        Ok(doc.clone())
    }

    async fn delete_document(&self, resource_type: &str, resource_key: &str) -> Result<(), TransportError> {
        let target = format!("{}:{}", resource_type, resource_key);
        self.enter(format!("delete {}", target), &target).await?;
        match self.docs.lock().remove(&target) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotFound(target)),
        }
    }
}

/// Config with no background loops and no transport backoff delay.
pub fn test_config() -> OfflineSyncConfig {
    OfflineSyncConfig {
        base_url: "http://fake.test".into(),
        transport_retry_delay_ms: 1,
        auto_sync_interval_secs: 0,
        probe_interval_secs: 0,
        ..Default::default()
    }
}

/// Client over an in-memory store and the given fake server.
pub fn client_with(server: Arc<FakeServer>, online: bool) -> (Arc<InMemoryKvStore>, OfflineClient) {
    let store = Arc::new(InMemoryKvStore::new());
    let config = OfflineSyncConfig {
        start_online: online,
        ..test_config()
    };
    let client = OfflineClient::new(config, store.clone() as Arc<dyn KvStore>, server);
    (store, client)
}

/// Poll `pending_count` until it reaches `expected`.
pub async fn wait_for_pending(client: &OfflineClient, expected: usize) {
    for _ in 0..500 {
        if client.pending_count().await.expect("queue readable") == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never reached {} pending items", expected);
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as i64
}
