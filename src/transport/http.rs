use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::security::token_cache::TokenCache;
use crate::transport::{PreparedRequest, RawResponse, Transport, TransportError, REQUEST_ID_HEADER};

/// reqwest-backed transport. Cookies set by the peer (the ambient session)
/// are kept in the client's cookie store; a cached access token, if any, is
/// sent as a bearer credential.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    default_timeout: Duration,
    tokens: TokenCache,
}

impl HttpTransport {
    pub fn new(base_url: &str, default_timeout: Duration, tokens: TokenCache) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("parsing base url {base_url}"))?;
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .context("building http client")?;

        debug!(
            base_url = %base_url,
            timeout_secs = default_timeout.as_secs(),
            "http transport initialized"
        );

        Ok(Self {
            client,
            base_url,
            default_timeout,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn build_headers(&self, extra: &HeaderMap) -> Result<HeaderMap, TransportError> {
        let mut headers = extra.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = self.tokens.get().await {
            let bearer = format!("Bearer {}", token);
            let value = HeaderValue::from_str(&bearer).map_err(|_| {
                TransportError::InvalidRequest("access token is not a valid header value".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path);
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let headers = self.build_headers(&request.headers).await?;

        trace!(
            method = %request.method,
            url = %url,
            request_id = request.header(REQUEST_ID_HEADER).unwrap_or(""),
            timeout_secs = %timeout.as_secs(),
            "sending request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| TransportError::InvalidRequest(format!("serialize json body: {e}")))?;
            builder = builder.body(bytes);
        }

        let resp = builder.send().await.map_err(map_send_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        debug!(status_code = %status.as_u16(), url = %url, "received response");

        Ok(RawResponse {
            status,
            headers,
            body: parse_body(&text),
        })
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

// Empty bodies become null; non-JSON bodies are kept as a string.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{REQUEST_ENCRYPTED_HEADER, SUPPORTS_ENCRYPTION_HEADER};
    use mockito::{Matcher, Server};
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    fn prepared(method: Method, path: &str, body: Option<Value>) -> PreparedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(SUPPORTS_ENCRYPTION_HEADER, HeaderValue::from_static("true"));
        headers.insert(REQUEST_ENCRYPTED_HEADER, HeaderValue::from_static("false"));
        PreparedRequest {
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers,
            body,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn posts_json_with_capability_headers_and_bearer() {
        let mut server = Server::new_async().await;
        let base_url = format!("{}/api", server.url());
        let mock = server
            .mock("POST", "/api/accounts")
            .match_header("X-Supports-Encryption", "true")
            .match_header("X-Request-Encrypted", "false")
            .match_header("Authorization", Matcher::Exact("Bearer token-abc".into()))
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"fullName": "Ada"})))
            .with_status(201)
            .with_header("x-response-encrypted", "false")
            .with_body(r#"{"id":"7"}"#)
            .create_async()
            .await;

        let tokens = TokenCache::new(Some("token-abc".to_string()));
        let transport = HttpTransport::new(&base_url, Duration::from_secs(5), tokens).unwrap();
        let resp = transport
            .send(prepared(Method::POST, "/accounts", Some(json!({"fullName": "Ada"}))))
            .await
            .expect("send should succeed");

        mock.assert_async().await;
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.body, json!({"id": "7"}));
        assert!(!resp.claims_encrypted());
    }

    #[tokio::test]
    async fn omits_authorization_without_token_and_sends_query() {
        let mut server = Server::new_async().await;
        let base_url = format!("{}/api/", server.url());
        let mock = server
            .mock("GET", "/api/transactions/date-range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "0".into()),
                Matcher::UrlEncoded("size".into(), "10".into()),
            ]))
            .match_header("Authorization", Matcher::Missing)
            .with_status(204)
            .create_async()
            .await;

        let transport =
            HttpTransport::new(&base_url, Duration::from_secs(5), TokenCache::default()).unwrap();
        let mut req = prepared(Method::GET, "/transactions/date-range", None);
        req.query = vec![("page".into(), "0".into()), ("size".into(), "10".into())];
        let resp = transport.send(req).await.unwrap();

        mock.assert_async().await;
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
        assert_eq!(resp.body, Value::Null);
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_error() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9/api",
            Duration::from_secs(2),
            TokenCache::default(),
        )
        .unwrap();
        let err = transport
            .send(prepared(Method::GET, "/accounts", None))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_) | TransportError::Timeout));
    }

    #[test]
    fn parses_bodies_leniently() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body("plain"), Value::String("plain".into()));
    }

    #[test]
    fn rejects_bad_base_url() {
        let result = HttpTransport::new("not a url", Duration::from_secs(1), TokenCache::default());
        assert!(result.is_err());
    }
}
