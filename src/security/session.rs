use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::security::audit_log::AuditLogger;
use crate::security::token_cache::TokenCache;

/// Display metadata for the signed-in user. Opaque to the middleware beyond
/// being cleared when the session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl SessionUser {
    /// Pick the user fields out of a sign-in response.
    pub fn from_auth_response(body: &Value) -> Self {
        let text = |key: &str| match body.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            id: text("userId").or_else(|| text("id")),
            email: text("email"),
            name: text("name"),
        }
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    Expired,
    RedirectToLogin,
}

#[derive(Debug, Default)]
struct SessionState {
    user: Option<SessionUser>,
    expired: bool,
    at_login: bool,
}

/// Locally cached session: user metadata plus the access token.
#[derive(Debug, Clone)]
pub struct SessionStore {
    state: Arc<RwLock<SessionState>>,
    tokens: TokenCache,
    events: broadcast::Sender<SessionEvent>,
    audit: AuditLogger,
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            tokens: TokenCache::default(),
            events,
            audit: AuditLogger::new(),
        }
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn user(&self) -> Option<SessionUser> {
        self.state.read().await.user.clone()
    }

    pub async fn sign_in(&self, user: SessionUser, access_token: Option<String>) {
        {
            let mut state = self.state.write().await;
            state.user = Some(user);
            state.expired = false;
        }
        if let Some(token) = access_token {
            self.tokens.swap(token).await;
        }
        let _ = self.events.send(SessionEvent::SignedIn);
    }

    pub async fn update_user(&self, update: impl FnOnce(&mut SessionUser)) {
        let mut state = self.state.write().await;
        if let Some(user) = state.user.as_mut() {
            update(user);
        }
    }

    pub async fn sign_out(&self) {
        {
            let mut state = self.state.write().await;
            state.user = None;
        }
        self.tokens.clear().await;
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    /// Record whether the UI currently shows the login surface.
    pub async fn set_at_login(&self, at_login: bool) {
        self.state.write().await.at_login = at_login;
    }

    /// Tear down the session after an unrecoverable authentication failure.
    ///
    /// Idempotent until the next sign-in: only the first call clears state
    /// and emits events. Returns whether this call did the teardown.
    pub async fn expire(&self) -> bool {
        let redirect = {
            let mut state = self.state.write().await;
            if state.expired {
                debug!("session already expired");
                return false;
            }
            state.expired = true;
            state.user = None;
            !state.at_login
        };
        self.tokens.clear().await;

        self.audit.session_expired(redirect);
        let _ = self.events.send(SessionEvent::Expired);
        if redirect {
            let _ = self.events.send(SessionEvent::RedirectToLogin);
        }
        true
    }

    pub async fn is_expired(&self) -> bool {
        self.state.read().await.expired
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
