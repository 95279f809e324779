use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::security::refresh::RefreshError;
use crate::transport::TransportError;

/// Ultimate outcome of a failed call. Cipher soft-failures never surface
/// here; they degrade to plaintext passthrough instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed with status {status}")]
    Api { status: StatusCode, body: Value },

    #[error("authentication failed after credential renewal")]
    Unauthorized,

    #[error("credential renewal failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ClientError::Timeout,
            TransportError::InvalidRequest(msg) => ClientError::InvalidRequest(msg),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ClientError::RefreshFailed(RefreshError::Rejected(code)) => {
                StatusCode::from_u16(*code).ok()
            }
            _ => None,
        }
    }

    /// Whether the call ended the session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Unauthorized | ClientError::RefreshFailed(_))
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        if let ClientError::Api { body, .. } = self {
            if let Some(msg) = body.get("message").and_then(Value::as_str) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }

        match self {
            ClientError::Timeout | ClientError::Transport(_) => {
                "No response from server. Please check your connection.".to_string()
            }
            _ => match self.status().map(|s| s.as_u16()) {
                Some(400) => "Invalid request. Please check your data.".to_string(),
                Some(401) => "Authentication failed. Please login again.".to_string(),
                Some(403) => "You do not have permission to perform this action.".to_string(),
                Some(404) => "The requested resource was not found.".to_string(),
                Some(500) => "Server error. Please try again later.".to_string(),
                _ => "An error occurred".to_string(),
            },
        }
    }
}
