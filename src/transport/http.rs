// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP [`Transport`] for the document REST/RPC API.
//!
//! | Call                 | Request                                   | Body of reply   |
//! |----------------------|-------------------------------------------|-----------------|
//! | `fetch_document`     | `GET    /api/resource/{type}/{key}`       | `{"data": doc}` |
//! | `list_documents`     | `GET    /api/resource/{type}?fields=..`   | `{"data": [..]}`|
//! | `create_document`    | `POST   /api/resource/{type}`             | `{"data": doc}` |
//! | `update_document`    | `PUT    /api/resource/{type}/{key}`       | `{"data": doc}` |
//! | `delete_document`    | `DELETE /api/resource/{type}/{key}`       | ignored         |
//! | `call_remote_method` | `POST   /api/method/{method}`             | `{"message": v}`|
//!
//! The session token is attached under a configurable header on every
//! request. It is opaque here; the embedding application refreshes it with
//! [`HttpTransport::set_token`].

use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::debug;

use super::traits::{ListQuery, Transport, TransportError};
use crate::cache::canonical_json;
use crate::connectivity::ConnectivityProbe;

/// Default anti-forgery header name.
pub const DEFAULT_AUTH_HEADER: &str = "X-Frappe-CSRF-Token";

/// Method hit by [`ConnectivityProbe::probe`].
pub const PING_METHOD: &str = "ping";

pub struct HttpTransport {
    base_url: Url,
    auth_header: HeaderName,
    token: RwLock<Option<String>>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Self::with_auth_header(base_url, timeout, DEFAULT_AUTH_HEADER)
    }

    pub fn with_auth_header(base_url: &str, timeout: Duration, auth_header: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| TransportError::Protocol(format!("Invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Protocol(format!("Base URL '{}' cannot carry a path", base_url)));
        }
        let auth_header = HeaderName::from_bytes(auth_header.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("Invalid auth header '{}': {}", auth_header, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| TransportError::Protocol(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            auth_header,
            token: RwLock::new(None),
            timeout,
            client,
        })
    }

    /// Replace the session token sent with every request.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL with percent-encoded path segments appended.
    fn url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Protocol(format!("Base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.token.read().as_deref() {
            let value = HeaderValue::from_str(token)
                .map_err(|e| TransportError::Protocol(format!("Invalid token header value: {}", e)))?;
            headers.insert(self.auth_header.clone(), value);
        }
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        debug!(%method, path = url.path(), "HTTP request");
        let mut request = self.client.request(method, url).headers(self.headers()?);
        if let Some(q) = query {
            request = request.query(q);
        }
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), error_message(&text, status.as_u16())));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Protocol(format!("Failed to parse response: {}", e)))
    }

    /// Classify a failure that produced no HTTP status.
    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_decode() || e.is_builder() {
            TransportError::Protocol(e.to_string())
        } else {
            TransportError::Connectivity(e.to_string())
        }
    }
}

/// Best human-readable message from an error body.
fn error_message(body: &str, status: u16) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for field in ["message", "exception", "exc_type"] {
            if let Some(msg) = value.get(field).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        format!("HTTP error! status: {}", status)
    } else {
        body.trim().to_string()
    }
}

/// Take `field` out of a reply envelope.
fn unwrap_envelope(mut reply: Value, field: &str) -> Result<Value, TransportError> {
    match reply.get_mut(field) {
        Some(inner) => Ok(inner.take()),
        None => Err(TransportError::Protocol(format!("Response missing '{}' field", field))),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_document(&self, resource_type: &str, resource_key: &str) -> Result<Value, TransportError> {
        let url = self.url(&["api", "resource", resource_type, resource_key])?;
        let reply = self.send(Method::GET, url, None, None).await?;
        unwrap_envelope(reply, "data")
    }

    async fn list_documents(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Value>, TransportError> {
        let url = self.url(&["api", "resource", resource_type])?;
        let params = [
            ("fields", canonical_json(&Value::from(query.fields.clone()))),
            ("filters", canonical_json(&query.filters)),
            ("limit_page_length", query.limit.to_string()),
            ("order_by", query.order_by.clone()),
        ];
        let reply = self.send(Method::GET, url, Some(&params[..]), None).await?;
        match unwrap_envelope(reply, "data")? {
            Value::Array(rows) => Ok(rows),
            other => Err(TransportError::Protocol(format!("Expected list, got {}", other))),
        }
    }

    async fn call_remote_method(&self, method: &str, args: &Value) -> Result<Value, TransportError> {
        let url = self.url(&["api", "method", method])?;
        let reply = self.send(Method::POST, url, None, Some(args)).await?;
        // Methods returning nothing omit `message`
        Ok(unwrap_envelope(reply, "message").unwrap_or(Value::Null))
    }

    async fn create_document(&self, resource_type: &str, payload: &Value) -> Result<Value, TransportError> {
        let url = self.url(&["api", "resource", resource_type])?;
        let reply = self.send(Method::POST, url, None, Some(payload)).await?;
        unwrap_envelope(reply, "data")
    }

    async fn update_document(&self, resource_type: &str, resource_key: &str, payload: &Value) -> Result<Value, TransportError> {
        let url = self.url(&["api", "resource", resource_type, resource_key])?;
        let reply = self.send(Method::PUT, url, None, Some(payload)).await?;
        unwrap_envelope(reply, "data")
    }

    async fn delete_document(&self, resource_type: &str, resource_key: &str) -> Result<(), TransportError> {
        let url = self.url(&["api", "resource", resource_type, resource_key])?;
        self.send(Method::DELETE, url, None, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for HttpTransport {
    /// Reachable if the server answers at all below 500; auth failures
    /// still prove there is a network path.
    async fn probe(&self) -> bool {
        let Ok(url) = self.url(&["api", "method", PING_METHOD]) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve exactly one request with a canned reply; yields the raw request.
    async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];

            // Headers, then Content-Length bytes of body
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                if n == 0 {
                    break raw.len();
                }
            };
            let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }

            let reply = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let t = transport("http://example.test/");
        let url = t.url(&["api", "resource", "Vehicle Inspection", "VI/001"]).unwrap();
        assert_eq!(url.as_str(), "http://example.test/api/resource/Vehicle%20Inspection/VI%2F001");
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpTransport::with_auth_header("http://x.test", Duration::from_secs(1), "bad header").is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message": "Not permitted"}"#, 403), "Not permitted");
        assert_eq!(error_message(r#"{"exception": "ValidationError"}"#, 417), "ValidationError");
        assert_eq!(error_message("", 502), "HTTP error! status: 502");
        assert_eq!(error_message("gateway down", 502), "gateway down");
    }

    #[tokio::test]
    async fn test_fetch_document_unwraps_data_and_sends_token() {
        let (base, server) = serve_once(200, r#"{"data": {"name": "T1", "status": "planned"}}"#).await;
        let t = transport(&base);
        t.set_token("tok-123");

        let doc = t.fetch_document("Trip", "T1").await.unwrap();
        assert_eq!(doc, json!({"name": "T1", "status": "planned"}));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/resource/Trip/T1 "));
        assert!(request.to_lowercase().contains("x-frappe-csrf-token: tok-123"));
    }

    #[tokio::test]
    async fn test_update_sends_put_with_body() {
        let (base, server) = serve_once(200, r#"{"data": {"name": "T1", "status": "started"}}"#).await;
        let doc = transport(&base)
            .update_document("Trip", "T1", &json!({"status": "started"}))
            .await
            .unwrap();
        assert_eq!(doc["status"], "started");

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/resource/Trip/T1 "));
        assert!(request.ends_with(r#"{"status":"started"}"#));
    }

    #[tokio::test]
    async fn test_list_sends_query_params() {
        let (base, server) = serve_once(200, r#"{"data": [{"name": "V1"}, {"name": "V2"}]}"#).await;
        let query = ListQuery::default().with_filters(json!({"status": "active"})).with_limit(10);

        let rows = transport(&base).list_documents("Vehicle", &query).await.unwrap();
        assert_eq!(rows.len(), 2);

        let request = server.await.unwrap();
        let line = request.lines().next().unwrap();
        assert!(line.starts_with("GET /api/resource/Vehicle?"));
        assert!(line.contains("limit_page_length=10"));
        assert!(line.contains("order_by=modified+desc"));
    }

    #[tokio::test]
    async fn test_call_method_returns_message() {
        let (base, server) = serve_once(200, r#"{"message": {"trips": 3}}"#).await;
        let value = transport(&base)
            .call_remote_method("tems.api.pwa.driver.get_trips", &json!({"driver": "D1"}))
            .await
            .unwrap();
        assert_eq!(value, json!({"trips": 3}));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/method/tems.api.pwa.driver.get_trips "));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (base, _server) = serve_once(417, r#"{"exception": "MandatoryError"}"#).await;
        let err = transport(&base).create_document("Trip", &json!({})).await.unwrap_err();
        assert_eq!(err, TransportError::Request { status: 417, message: "MandatoryError".into() });

        let (base, _server) = serve_once(404, "{}").await;
        let err = transport(&base).fetch_document("Trip", "missing").await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));

        let (base, _server) = serve_once(503, "").await;
        let err = transport(&base).delete_document("Trip", "T1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_is_connectivity_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = transport(&format!("http://{}", addr));
        let err = t.fetch_document("Trip", "T1").await.unwrap_err();
        assert!(err.is_connectivity(), "got {:?}", err);
        assert!(!t.probe().await);
    }

    #[tokio::test]
    async fn test_probe_accepts_client_errors() {
        let (base, _server) = serve_once(403, r#"{"message": "Forbidden"}"#).await;
        assert!(transport(&base).probe().await);
    }
}
