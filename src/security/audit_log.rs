use tracing::{debug, error, info, warn};

/// Security-relevant events, emitted under the `audit` target. Never carries
/// field values or key material.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn request_encrypted(&self, request_id: &str, path: &str, fields: usize) {
        debug!(target: "audit", event = "request_encrypted", request_id, path, fields);
    }

    pub fn response_decrypted(&self, path: &str, fields: usize) {
        debug!(target: "audit", event = "response_decrypted", path, fields);
    }

    pub fn refresh_started(&self) {
        info!(target: "audit", event = "refresh_started");
    }

    pub fn refresh_queued(&self, position: usize) {
        debug!(target: "audit", event = "refresh_queued", position);
    }

    pub fn refresh_succeeded(&self, released: usize) {
        info!(target: "audit", event = "refresh_succeeded", released);
    }

    pub fn refresh_failed(&self, reason: &str, rejected: usize) {
        warn!(target: "audit", event = "refresh_failed", reason, rejected);
    }

    pub fn refresh_abandoned(&self, dropped: usize) {
        error!(target: "audit", event = "refresh_abandoned", dropped);
    }

    pub fn retry_exhausted(&self, path: &str) {
        warn!(target: "audit", event = "retry_exhausted", path);
    }

    pub fn session_expired(&self, redirect: bool) {
        warn!(target: "audit", event = "session_expired", redirect);
    }
}
