//! Per-shop access token storage.
//!
//! Durable storage is someone else's problem; the crate only needs the trait. The in-memory store
//! is what tests and single-process deployments use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// An offline access token for one shop.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    /// Granted scopes, comma separated, as the platform reports them.
    pub scope: Option<String>,
}

impl AccessToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), scope: None }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

// Never print the secret.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid shop domain: {0:?}")]
    InvalidShop(String),
}

/// Abstract storage for per-shop tokens.
///
/// Implementations must be safe to share across tasks; a lookup for a shop that was never
/// stored is `Ok(None)`, not an error.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    async fn get_token(&self, shop: &str) -> Result<Option<AccessToken>, TokenStoreError>;

    async fn store_token(&self, shop: &str, token: AccessToken) -> Result<(), TokenStoreError>;

    /// Returns whether a token was present.
    async fn remove_token(&self, shop: &str) -> Result<bool, TokenStoreError>;
}

/// Simple in-memory token store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(shop: &str) -> Result<String, TokenStoreError> {
    let shop = shop.trim().to_ascii_lowercase();
    if shop.is_empty() || shop.contains('/') || shop.contains(char::is_whitespace) {
        return Err(TokenStoreError::InvalidShop(shop));
    }
    Ok(shop)
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_token(&self, shop: &str) -> Result<Option<AccessToken>, TokenStoreError> {
        let key = normalize(shop)?;
        let guard = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&key).cloned())
    }

    async fn store_token(&self, shop: &str, token: AccessToken) -> Result<(), TokenStoreError> {
        let key = normalize(shop)?;
        self.tokens.write().unwrap_or_else(PoisonError::into_inner).insert(key, token);
        Ok(())
    }

    async fn remove_token(&self, shop: &str) -> Result<bool, TokenStoreError> {
        let key = normalize(shop)?;
        let removed = self.tokens.write().unwrap_or_else(PoisonError::into_inner).remove(&key);
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_get_remove() {
        let store = InMemoryTokenStore::new();
        assert_eq!(store.get_token("demo.myshopify.com").await.unwrap(), None);

        store
            .store_token("Demo.myshopify.com", AccessToken::new("shpat_1").with_scope("read_products"))
            .await
            .unwrap();
        let token = store.get_token("demo.myshopify.com").await.unwrap().unwrap();
        assert_eq!(token.access_token, "shpat_1");
        assert_eq!(token.scope.as_deref(), Some("read_products"));
        assert_eq!(store.len(), 1);

        assert!(store.remove_token("demo.myshopify.com").await.unwrap());
        assert!(!store.remove_token("demo.myshopify.com").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_shop() {
        let store = InMemoryTokenStore::new();
        let err = store.get_token("  ").await.unwrap_err();
        assert!(matches!(err, TokenStoreError::InvalidShop(_)));
        assert!(store.store_token("a/b", AccessToken::new("x")).await.is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let text = format!("{:?}", AccessToken::new("shpat_secret"));
        assert!(!text.contains("shpat_secret"));
    }
}
