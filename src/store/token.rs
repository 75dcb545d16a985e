//! Token Store Adapter
//!
//! Durable token ownership belongs to the caller.  The engine reaches it
//! through two capabilities:
//!
//! - [`TokenLoader::fetch_token`] resolves the current token for a
//!   provider/identity pair before an authenticated call
//! - [`TokenSaver::update_token`] receives every token the engine obtains
//!   through a refresh
//!
//! Both are injected at registration time.  [`NoopTokenStore`] is the
//! default; [`MemoryTokenStore`] is a process-local implementation for tests
//! and prototypes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{AuthloomError, Result};
use crate::token::{Identity, Token};

/// Loads long-lived tokens from caller-owned storage.
#[async_trait]
pub trait TokenLoader: Send + Sync {
    /// Returns the stored token for `provider` / `identity`, if any.
    async fn fetch_token(&self, provider: &str, identity: &Identity) -> Result<Option<Token>>;
}

/// Persists tokens into caller-owned storage.
#[async_trait]
pub trait TokenSaver: Send + Sync {
    /// Stores `token` as the current token for `provider` / `identity`.
    async fn update_token(&self, provider: &str, identity: &Identity, token: &Token) -> Result<()>;
}

// ---------------------------------------------------------------------------
// NoopTokenStore
// ---------------------------------------------------------------------------

/// Loader that never finds a token and saver that discards every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenStore;

#[async_trait]
impl TokenLoader for NoopTokenStore {
    async fn fetch_token(&self, _provider: &str, _identity: &Identity) -> Result<Option<Token>> {
        Ok(None)
    }
}

#[async_trait]
impl TokenSaver for NoopTokenStore {
    async fn update_token(
        &self,
        _provider: &str,
        _identity: &Identity,
        _token: &Token,
    ) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// Process-local token store keyed by provider and identity.
///
/// # Examples
///
/// ```
/// use authloom::store::{MemoryTokenStore, TokenLoader, TokenSaver};
/// use authloom::token::{Identity, OAuth1Token, Token};
///
/// # async fn example() -> authloom::error::Result<()> {
/// let store = MemoryTokenStore::new();
/// let alice = Identity::from("alice");
/// let token = Token::OAuth1(OAuth1Token {
///     token: "t".to_string(),
///     token_secret: "s".to_string(),
/// });
///
/// store.update_token("twitter", &alice, &token).await?;
/// assert_eq!(store.fetch_token("twitter", &alice).await?, Some(token));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<(String, Identity), Token>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a token without going through the async trait.
    pub fn insert(&self, provider: &str, identity: &Identity, token: Token) -> Result<()> {
        self.tokens
            .write()
            .map_err(|_| AuthloomError::Storage("token store lock poisoned".to_string()))?
            .insert((provider.to_string(), identity.clone()), token);
        Ok(())
    }
}

#[async_trait]
impl TokenLoader for MemoryTokenStore {
    async fn fetch_token(&self, provider: &str, identity: &Identity) -> Result<Option<Token>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| AuthloomError::Storage("token store lock poisoned".to_string()))?;
        Ok(tokens
            .get(&(provider.to_string(), identity.clone()))
            .cloned())
    }
}

#[async_trait]
impl TokenSaver for MemoryTokenStore {
    async fn update_token(&self, provider: &str, identity: &Identity, token: &Token) -> Result<()> {
        self.insert(provider, identity, token.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{OAuth1Token, OAuth2Token};

    fn oauth2(access: &str) -> Token {
        Token::OAuth2(OAuth2Token {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        })
    }

    #[tokio::test]
    async fn test_noop_store_never_returns_a_token() {
        let store = NoopTokenStore;
        let id = Identity::from("alice");
        store.update_token("p", &id, &oauth2("a")).await.unwrap();
        assert!(store.fetch_token("p", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_namespaces_by_provider_and_identity() {
        let store = MemoryTokenStore::new();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");

        store.update_token("github", &alice, &oauth2("a")).await.unwrap();
        store.update_token("gitlab", &alice, &oauth2("b")).await.unwrap();

        assert_eq!(
            store.fetch_token("github", &alice).await.unwrap(),
            Some(oauth2("a"))
        );
        assert_eq!(
            store.fetch_token("gitlab", &alice).await.unwrap(),
            Some(oauth2("b"))
        );
        assert!(store.fetch_token("github", &bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_update_replaces_token() {
        let store = MemoryTokenStore::new();
        let id = Identity::from("alice");
        store.update_token("p", &id, &oauth2("old")).await.unwrap();
        store.update_token("p", &id, &oauth2("new")).await.unwrap();
        assert_eq!(store.fetch_token("p", &id).await.unwrap(), Some(oauth2("new")));
    }

    #[tokio::test]
    async fn test_memory_store_returns_byte_identical_oauth1_token() {
        let store = MemoryTokenStore::new();
        let id = Identity::from("alice");
        let token = Token::OAuth1(OAuth1Token {
            token: "tok/+=".to_string(),
            token_secret: "sec ret&".to_string(),
        });
        store.update_token("twitter", &id, &token).await.unwrap();
        assert_eq!(store.fetch_token("twitter", &id).await.unwrap(), Some(token));
    }
}
