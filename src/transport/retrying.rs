//! Per-call timeout and transient-failure retry around any [`Transport`].
//!
//! This is the low-level retry tier: a handful of immediate attempts for a
//! single request. Anything still failing surfaces to the caller, and the
//! write queue's next drain is the outer retry tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;

use super::traits::{ListQuery, Transport, TransportError};
use crate::connectivity::ConnectivityMonitor;
use crate::resilience::retry::{retry_if, RetryConfig};

pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    retry: RetryConfig,
    timeout: Duration,
    /// When set, retries stop as soon as the monitor reports offline
    monitor: Option<Arc<ConnectivityMonitor>>,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            inner,
            retry,
            timeout,
            monitor: None,
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn online(&self) -> bool {
        self.monitor.as_ref().map_or(true, |m| m.is_online())
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let timeout = self.timeout;
        let _timer = crate::metrics::LatencyTimer::new("transport", operation);

        let result = retry_if(
            operation,
            &self.retry,
            || {
                let attempt = call();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => {
                            crate::metrics::record_timeout(operation);
                            Err(TransportError::Timeout(timeout.as_millis() as u64))
                        }
                    }
                }
            },
            |err: &TransportError| err.is_transient() && self.online(),
        )
        .await;

        match &result {
            Ok(_) => crate::metrics::record_operation("transport", operation, "success"),
            Err(e) => {
                crate::metrics::record_operation("transport", operation, "error");
                crate::metrics::record_transport_error(operation, e.class());
            }
        }
        result
    }
}

#[async_trait]
impl Transport for RetryingTransport {
    async fn fetch_document(&self, resource_type: &str, resource_key: &str) -> Result<Value, TransportError> {
        self.run("fetch_document", || self.inner.fetch_document(resource_type, resource_key)).await
    }

    async fn list_documents(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Value>, TransportError> {
        self.run("list_documents", || self.inner.list_documents(resource_type, query)).await
    }

    async fn call_remote_method(&self, method: &str, args: &Value) -> Result<Value, TransportError> {
        self.run("call_remote_method", || self.inner.call_remote_method(method, args)).await
    }

    async fn create_document(&self, resource_type: &str, payload: &Value) -> Result<Value, TransportError> {
        self.run("create_document", || self.inner.create_document(resource_type, payload)).await
    }

    async fn update_document(&self, resource_type: &str, resource_key: &str, payload: &Value) -> Result<Value, TransportError> {
        self.run("update_document", || self.inner.update_document(resource_type, resource_key, payload)).await
    }

    async fn delete_document(&self, resource_type: &str, resource_key: &str) -> Result<(), TransportError> {
        self.run("delete_document", || self.inner.delete_document(resource_type, resource_key)).await
    }
}
