use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Failure of a remote call, classified by how the caller should recover.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No network path to the server
    #[error("Connectivity failure: {0}")]
    Connectivity(String),
    /// The request did not finish within its deadline
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
    /// 5xx response
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
    /// 4xx response other than 404 (validation, auth, permission)
    #[error("Request rejected {status}: {message}")]
    Request { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    /// Response could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the failure looks like being offline (serve cache / queue write).
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Whether an immediate low-level retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_) | Self::Server { .. })
    }

    /// Whether the server understood and refused the request.
    ///
    /// Queued items failing this way are still retried on the next drain.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::NotFound(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity",
            Self::Timeout(_) => "timeout",
            Self::Server { .. } => "server",
            Self::Request { .. } => "request",
            Self::NotFound(_) => "not_found",
            Self::Protocol(_) => "protocol",
        }
    }

    /// Classify an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Request { status, message },
        }
    }
}

/// List query parameters.
///
/// Defaults match the document API: `fields = ["name"]`, no filters,
/// 20 rows, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub fields: Vec<String>,
    pub filters: Value,
    pub limit: usize,
    pub order_by: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            fields: vec!["name".to_string()],
            filters: json!({}),
            limit: 20,
            order_by: "modified desc".to_string(),
        }
    }
}

impl ListQuery {
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }
}

/// Remote document API.
///
/// Implementations attach whatever auth token the session provides; the
/// engine treats it as opaque.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_document(&self, resource_type: &str, resource_key: &str) -> Result<Value, TransportError>;

    async fn list_documents(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Value>, TransportError>;

    async fn call_remote_method(&self, method: &str, args: &Value) -> Result<Value, TransportError>;

    /// Returns the stored document including its server-assigned identifier.
    async fn create_document(&self, resource_type: &str, payload: &Value) -> Result<Value, TransportError>;

    async fn update_document(&self, resource_type: &str, resource_key: &str, payload: &Value) -> Result<Value, TransportError>;

    async fn delete_document(&self, resource_type: &str, resource_key: &str) -> Result<(), TransportError>;
}
