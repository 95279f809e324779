pub mod config;
pub mod error;
pub mod pipeline;

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::config::Config;
use crate::client::error::ClientError;
use crate::client::pipeline::{ApiResponse, Pipeline};
use crate::security::audit_log::AuditLogger;
use crate::security::refresh::{RefreshCoordinator, RefreshError};
use crate::security::session::SessionStore;
use crate::transport::http::HttpTransport;
use crate::transport::{ApiRequest, RequestContext, Transport};

/// API client wrapping a transport with field encryption and single-flight
/// credential renewal.
pub struct ApiClient<T: Transport = HttpTransport> {
    transport: T,
    pipeline: Pipeline,
    session: SessionStore,
    refresh: Arc<RefreshCoordinator>,
    base_path: String,
    refresh_path: String,
    audit: AuditLogger,
}

impl ApiClient<HttpTransport> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let session = SessionStore::new();
        let transport =
            HttpTransport::new(&config.base_url, config.timeout(), session.tokens().clone())?;
        let pipeline = Pipeline::new(config.codec()?, config.policy_table()?);
        let base_url = Url::parse(&config.base_url).context("parsing base url")?;

        Ok(Self::new(transport, pipeline, session, base_url.path())
            .with_refresh_path(&config.refresh_path))
    }
}

impl<T: Transport> ApiClient<T> {
    /// `base_path` is the path component of the base URL (e.g. `/api`); it is
    /// prefixed to request paths before policy lookup.
    pub fn new(transport: T, pipeline: Pipeline, session: SessionStore, base_path: &str) -> Self {
        let refresh = Arc::new(RefreshCoordinator::new(session.clone()));
        Self {
            transport,
            pipeline,
            session,
            refresh,
            base_path: base_path.trim_end_matches('/').to_string(),
            refresh_path: "/auth/refresh".to_string(),
            audit: AuditLogger::new(),
        }
    }

    pub fn with_refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = path.to_string();
        self
    }

    /// Share a coordinator with other clients talking to the same session.
    pub fn with_coordinator(mut self, refresh: Arc<RefreshCoordinator>) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Full API path used for policy lookup.
    pub fn policy_path(&self, path: &str) -> String {
        let path = path.split('?').next().unwrap_or(path);
        if path.starts_with('/') {
            format!("{}{}", self.base_path, path)
        } else {
            format!("{}/{}", self.base_path, path)
        }
    }

    /// Send a request and return the opened response body.
    pub async fn send(&self, request: ApiRequest) -> Result<Value, ClientError> {
        self.execute(request).await.map(|r| r.body)
    }

    /// Send a request through the pipeline. A 401 triggers one renewal (or
    /// joins the one in flight) and one replay; a second 401 ends the session.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut ctx = RequestContext::new(self.policy_path(&request.path));

        loop {
            let prepared = self.pipeline.prepare(&request, &ctx.path)?;
            let raw = self.transport.send(prepared).await?;

            if raw.status != StatusCode::UNAUTHORIZED || !request.refresh_on_unauthorized {
                return self.pipeline.finish(raw, &ctx.path);
            }

            if ctx.retried {
                self.audit.retry_exhausted(&ctx.path);
                self.session.expire().await;
                return Err(ClientError::Unauthorized);
            }

            debug!(path = %ctx.path, "authentication failed; renewing credentials");
            self.refresh.renew(|| self.exchange()).await?;
            ctx.mark_retried();
        }
    }

    /// Renew credentials through the coordinator, joining any renewal
    /// already in flight.
    pub async fn refresh_token(&self) -> Result<(), ClientError> {
        self.refresh.renew(|| self.exchange()).await?;
        Ok(())
    }

    async fn exchange(&self) -> Result<(), RefreshError> {
        let request = ApiRequest::post(self.refresh_path.clone(), json!({}));
        let path = self.policy_path(&self.refresh_path);
        let prepared = self
            .pipeline
            .prepare(&request, &path)
            .map_err(|e| RefreshError::Exchange(e.to_string()))?;

        let raw = self
            .transport
            .send(prepared)
            .await
            .map_err(|e| RefreshError::Exchange(e.to_string()))?;
        if !raw.status.is_success() {
            return Err(RefreshError::Rejected(raw.status.as_u16()));
        }

        match self.pipeline.finish(raw, &path) {
            Ok(resp) => {
                if let Some(token) = resp.body.get("accessToken").and_then(Value::as_str) {
                    self.session.tokens().swap(token.to_string()).await;
                }
            }
            Err(err) => warn!(error = %err, "unreadable renewal response"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_path_prefixes_base_and_drops_query() {
        let config = Config {
            base_url: "http://localhost:8080/api/".to_string(),
            ..Config::default()
        };
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.policy_path("/accounts"), "/api/accounts");
        assert_eq!(client.policy_path("accounts/7"), "/api/accounts/7");
        assert_eq!(
            client.policy_path("/auth/verify-email?token=abc"),
            "/api/auth/verify-email"
        );
    }

    #[test]
    fn root_base_url_leaves_paths_alone() {
        let config = Config {
            base_url: "http://localhost:8080".to_string(),
            ..Config::default()
        };
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.policy_path("/accounts"), "/accounts");
    }
}
