pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

pub const SUPPORTS_ENCRYPTION_HEADER: &str = "x-supports-encryption";
pub const REQUEST_ENCRYPTED_HEADER: &str = "x-request-encrypted";
pub const RESPONSE_ENCRYPTED_HEADER: &str = "x-response-encrypted";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A call as issued by application code, before any field is sealed.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/accounts`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    /// When false, a 401 is returned to the caller instead of triggering a
    /// credential renewal. Used for sign-in style calls.
    pub refresh_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }
}

/// Per-call bookkeeping carried through retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Full API path the policy table is consulted with.
    pub path: String,
    /// Set the first and only time the call is replayed after a renewal.
    pub retried: bool,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            retried: false,
        }
    }

    pub fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// Wire-ready request: fields sealed, capability headers set.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response as received from the peer, before any field is opened.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Whether the peer says it sealed the response fields.
    pub fn claims_encrypted(&self) -> bool {
        self.headers
            .get(RESPONSE_ENCRYPTED_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to read response: {0}")]
    Body(String),
}

/// Sends prepared requests to the peer. Implemented over reqwest by
/// [`http::HttpTransport`]; tests plug in scripted peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        (**self).send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn claims_encrypted_reads_header() {
        let mut resp = RawResponse::new(StatusCode::OK, json!({}));
        assert!(!resp.claims_encrypted());

        resp.headers
            .insert(RESPONSE_ENCRYPTED_HEADER, HeaderValue::from_static("false"));
        assert!(!resp.claims_encrypted());

        resp.headers
            .insert(RESPONSE_ENCRYPTED_HEADER, HeaderValue::from_static("TRUE"));
        assert!(resp.claims_encrypted());
    }

    #[test]
    fn request_builders() {
        let req = ApiRequest::get("/transactions/date-range")
            .with_query("page", 0)
            .with_query("size", 10)
            .with_timeout(Duration::from_secs(3))
            .without_refresh();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.query, vec![("page".into(), "0".into()), ("size".into(), "10".into())]);
        assert_eq!(req.timeout, Some(Duration::from_secs(3)));
        assert!(!req.refresh_on_unauthorized);
        assert!(req.body.is_none());

        let mut ctx = RequestContext::new("/api/accounts");
        assert!(!ctx.retried);
        ctx.mark_retried();
        assert!(ctx.retried);
    }
}
