//! Payload transform pipeline: seals request fields on the way out and opens
//! response fields on the way in, as the policy table dictates.
use std::collections::BTreeSet;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use uuid::Uuid;

use crate::client::error::ClientError;
use crate::security::audit_log::AuditLogger;
use crate::security::cipher::CipherCodec;
use crate::security::policy::{PolicyTable, ERROR_FIELDS};
use crate::transport::{
    ApiRequest, PreparedRequest, RawResponse, REQUEST_ENCRYPTED_HEADER, REQUEST_ID_HEADER,
    SUPPORTS_ENCRYPTION_HEADER,
};

/// Decoded, successful response handed back to callers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: reqwest::StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    codec: CipherCodec,
    policies: Arc<PolicyTable>,
    audit: AuditLogger,
}

impl Pipeline {
    pub fn new(codec: CipherCodec, policies: PolicyTable) -> Self {
        Self {
            codec,
            policies: Arc::new(policies),
            audit: AuditLogger::new(),
        }
    }

    pub fn codec(&self) -> &CipherCodec {
        &self.codec
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Copy of `body` with each listed string field sealed.
    pub fn transform_request(&self, body: &Value, fields: &BTreeSet<String>) -> Value {
        map_fields(body, fields, |v| self.codec.encrypt(v)).0
    }

    /// Open the listed fields, but only when the peer claims it sealed them.
    pub fn transform_response(
        &self,
        body: Value,
        fields: &BTreeSet<String>,
        server_claims_encrypted: bool,
    ) -> Value {
        if !server_claims_encrypted || fields.is_empty() {
            return body;
        }
        map_fields(&body, fields, |v| self.codec.decrypt(v)).0
    }

    /// Seal the request body for `policy_path` and attach capability headers.
    pub fn prepare(
        &self,
        request: &ApiRequest,
        policy_path: &str,
    ) -> Result<PreparedRequest, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let fields = self
            .policies
            .resolve(policy_path)
            .map(|p| &p.request_fields)
            .filter(|f| !f.is_empty() && self.codec.is_enabled());

        let (body, sealed) = match (&request.body, fields) {
            (Some(body), Some(fields)) => {
                let (out, count) = map_fields(body, fields, |v| self.codec.encrypt(v));
                (Some(out), count)
            }
            (body, _) => (body.clone(), 0),
        };
        if sealed > 0 {
            self.audit.request_encrypted(&request_id, policy_path, sealed);
        }

        let mut headers = HeaderMap::new();
        headers.insert(SUPPORTS_ENCRYPTION_HEADER, HeaderValue::from_static("true"));
        headers.insert(
            REQUEST_ENCRYPTED_HEADER,
            HeaderValue::from_static(if sealed > 0 { "true" } else { "false" }),
        );
        headers.insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&request_id)
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?,
        );

        Ok(PreparedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            headers,
            body,
            timeout: request.timeout,
        })
    }

    /// Open a received response. Non-2xx statuses become [`ClientError::Api`]
    /// with their `message`/`error` fields opened.
    pub fn finish(
        &self,
        raw: RawResponse,
        policy_path: &str,
    ) -> Result<ApiResponse, ClientError> {
        let claims = raw.claims_encrypted();
        let policy = self.policies.resolve(policy_path);

        if !raw.status.is_success() {
            let body = match policy {
                Some(_) if claims => {
                    let fields: BTreeSet<String> =
                        ERROR_FIELDS.iter().map(|f| f.as_str().to_string()).collect();
                    self.transform_response(raw.body, &fields, true)
                }
                _ => raw.body,
            };
            return Err(ClientError::Api {
                status: raw.status,
                body,
            });
        }

        let body = match policy {
            Some(p) if claims && !p.response_fields.is_empty() => {
                self.audit.response_decrypted(policy_path, p.response_fields.len());
                self.transform_response(raw.body, &p.response_fields, true)
            }
            _ => raw.body,
        };

        Ok(ApiResponse {
            status: raw.status,
            headers: raw.headers,
            body,
        })
    }
}

// Applies `f` to each non-empty string value named in `fields`, on an object
// or on each object of an array. Returns the copy and how many values changed.
fn map_fields(
    body: &Value,
    fields: &BTreeSet<String>,
    f: impl Fn(&str) -> String + Copy,
) -> (Value, usize) {
    match body {
        Value::Object(map) => {
            let mut out = map.clone();
            let mut changed = 0;
            for name in fields {
                if let Some(Value::String(s)) = out.get_mut(name) {
                    if s.is_empty() {
                        continue;
                    }
                    let next = f(s);
                    if next != *s {
                        changed += 1;
                    }
                    *s = next;
                }
            }
            (Value::Object(out), changed)
        }
        Value::Array(items) => {
            let mut changed = 0;
            let out = items
                .iter()
                .map(|item| {
                    let (v, n) = map_fields(item, fields, f);
                    changed += n;
                    v
                })
                .collect();
            (Value::Array(out), changed)
        }
        other => (other.clone(), 0),
    }
}
