use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Access-token cache shared between the transport and the session layer.
///
/// The token is opaque here; when absent, requests rely on the ambient
/// cookie session alone.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenCache {
    pub fn new(initial_token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(initial_token)),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Replace the token. Returns whether the cached value changed.
    pub async fn swap(&self, new_token: String) -> bool {
        let mut token = self.token.write().await;
        if token.as_deref() == Some(new_token.as_str()) {
            return false;
        }
        *token = Some(new_token);
        debug!("access token rotated");
        true
    }

    pub async fn clear(&self) {
        *self.token.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_cache_get_swap() {
        let cache = TokenCache::new(Some("initial_token".to_string()));
        assert_eq!(cache.get().await.as_deref(), Some("initial_token"));

        assert!(cache.swap("new_token".to_string()).await);
        assert_eq!(cache.get().await.as_deref(), Some("new_token"));
    }

    #[tokio::test]
    async fn test_token_cache_same_token_is_not_a_rotation() {
        let cache = TokenCache::new(Some("token".to_string()));
        assert!(!cache.swap("token".to_string()).await);
    }

    #[tokio::test]
    async fn test_token_cache_clear() {
        let cache = TokenCache::new(Some("token".to_string()));
        cache.clear().await;
        assert!(cache.get().await.is_none());
        assert!(cache.swap("token".to_string()).await);
    }

    #[tokio::test]
    async fn test_token_cache_clone_shares_state() {
        let cache = TokenCache::default();
        let cloned = cache.clone();

        cloned.swap("new_token".to_string()).await;
        assert_eq!(cache.get().await.as_deref(), Some("new_token"));
    }
}
