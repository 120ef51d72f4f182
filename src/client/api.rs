//! Reads and writes through the façade.
//!
//! Writes go straight to the server while online and are queued otherwise.
//! A connectivity failure on the immediate path also queues the write, so
//! the caller sees a queued acknowledgment rather than an error.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::{document_key, CachedRead, ReadKind};
use crate::error::ClientError;
use crate::queue::Operation;
use crate::transport::{ListQuery, TransportError};

use super::types::{QueuedAck, WriteOutcome};
use super::OfflineClient;

impl OfflineClient {
    // --- Reads ---

    /// Fetch one document, falling back to the cached copy when offline.
    #[tracing::instrument(skip(self))]
    pub async fn get_doc(&self, resource_type: &str, resource_key: &str) -> Result<CachedRead, ClientError> {
        self.cache
            .read(ReadKind::Document, resource_type, &json!(resource_key), || async {
                self.observe(self.transport.fetch_document(resource_type, resource_key).await)
            })
            .await
    }

    /// Run a list query, falling back to the cached result when offline.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_list(&self, resource_type: &str, query: ListQuery) -> Result<CachedRead, ClientError> {
        let args = json!({
            "fields": query.fields,
            "filters": query.filters,
            "limit": query.limit,
            "order_by": query.order_by,
        });
        self.cache
            .read(ReadKind::List, resource_type, &args, || async {
                self.observe(self.transport.list_documents(resource_type, &query).await)
                    .map(Value::Array)
            })
            .await
    }

    /// Call a remote method. The result is cached only when `cache` is set;
    /// either way a previously cached result is served when offline.
    #[tracing::instrument(skip(self, args))]
    pub async fn call(&self, method: &str, args: Value, cache: bool) -> Result<CachedRead, ClientError> {
        let fetch = || async { self.observe(self.transport.call_remote_method(method, &args).await) };
        if cache {
            self.cache.read(ReadKind::Rpc, method, &args, fetch).await
        } else {
            self.cache.read_uncached(ReadKind::Rpc, method, &args, fetch).await
        }
    }

    // --- Writes ---

    /// Create a document. The server assigns its key.
    pub async fn create_doc(&self, resource_type: &str, payload: Value) -> Result<WriteOutcome, ClientError> {
        self.write(resource_type, None, Operation::Create, payload).await
    }

    /// Update an existing document.
    pub async fn set_doc(&self, resource_type: &str, resource_key: &str, payload: Value) -> Result<WriteOutcome, ClientError> {
        self.write(resource_type, Some(resource_key), Operation::Update, payload).await
    }

    pub async fn delete_doc(&self, resource_type: &str, resource_key: &str) -> Result<WriteOutcome, ClientError> {
        self.write(resource_type, Some(resource_key), Operation::Delete, json!({})).await
    }

    #[tracing::instrument(skip(self, payload), fields(outcome))]
    async fn write(
        &self,
        resource_type: &str,
        resource_key: Option<&str>,
        operation: Operation,
        payload: Value,
    ) -> Result<WriteOutcome, ClientError> {
        if !self.monitor.is_online() {
            return self.enqueue(resource_type, resource_key, operation, payload).await;
        }

        // Keep per-document order: never overtake writes still queued
        if let Some(key) = resource_key {
            if self.queue.has_pending_for(resource_type, key).await? {
                debug!(resource_type, key, "Earlier writes still queued, queueing behind them");
                return self.enqueue(resource_type, resource_key, operation, payload).await;
            }
        }

        match self.send(resource_type, resource_key, operation, &payload).await {
            Ok(reply) => {
                tracing::Span::current().record("outcome", "applied");
                crate::metrics::record_operation("client", operation_label(operation), "applied");
                Ok(WriteOutcome::Applied(reply))
            }
            Err(e) if e.is_connectivity() => {
                info!(resource_type, error = %e, "Server unreachable, queueing write");
                self.enqueue(resource_type, resource_key, operation, payload).await
            }
            Err(e) => {
                crate::metrics::record_operation("client", operation_label(operation), "error");
                Err(e.into())
            }
        }
    }

    /// Send immediately and keep the cache in step with the server.
    async fn send(
        &self,
        resource_type: &str,
        resource_key: Option<&str>,
        operation: Operation,
        payload: &Value,
    ) -> Result<Value, TransportError> {
        let missing_key = || TransportError::Protocol(format!("{} of {} needs a resource key", operation, resource_type));

        match operation {
            Operation::Create => {
                let doc = self.observe(self.transport.create_document(resource_type, payload).await)?;
                if let Some(key) = doc.get(&self.config.id_field).and_then(Value::as_str) {
                    self.refresh_cache(&document_key(resource_type, key), Some(&doc)).await;
                }
                Ok(doc)
            }
            Operation::Update => {
                let key = resource_key.ok_or_else(missing_key)?;
                let doc = self.observe(self.transport.update_document(resource_type, key, payload).await)?;
                self.refresh_cache(&document_key(resource_type, key), Some(&doc)).await;
                Ok(doc)
            }
            Operation::Delete => {
                let key = resource_key.ok_or_else(missing_key)?;
                self.observe(self.transport.delete_document(resource_type, key).await)?;
                self.refresh_cache(&document_key(resource_type, key), None).await;
                Ok(Value::Null)
            }
        }
    }

    async fn enqueue(
        &self,
        resource_type: &str,
        resource_key: Option<&str>,
        operation: Operation,
        payload: Value,
    ) -> Result<WriteOutcome, ClientError> {
        // Storage failure here must reach the caller: never report a write
        // as queued unless it was persisted
        let item = self.queue.enqueue(resource_type, resource_key, operation, payload).await?;
        tracing::Span::current().record("outcome", "queued");
        crate::metrics::record_operation("client", operation_label(operation), "queued");
        Ok(WriteOutcome::Queued(QueuedAck::for_item(&item)))
    }

    async fn refresh_cache(&self, key: &str, doc: Option<&Value>) {
        let result = match doc {
            Some(doc) => self.cache.put(key, doc).await,
            None => self.cache.invalidate(key).await,
        };
        if let Err(e) = result {
            tracing::warn!(%key, error = %e, "Failed to refresh cache after write");
        }
    }

    /// Feed a transport outcome into the connectivity health counters.
    ///
    /// Any HTTP status proves the server is reachable. Timeouts say nothing
    /// either way.
    fn observe<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        match &result {
            Err(TransportError::Connectivity(_)) => self.monitor.record_failure(),
            Err(TransportError::Timeout(_)) => {}
            _ => self.monitor.record_success(),
        }
        result
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "create",
        Operation::Update => "update",
        Operation::Delete => "delete",
    }
}
