//! Token persistence via OS keyring
//!
//! [`KeyringTokenStore`] implements the Token Store Adapter on top of the
//! operating system's native credential store (Keychain on macOS, Secret
//! Service on Linux, Windows Credential Manager on Windows).
//!
//! Tokens are serialized to JSON before storage and deserialized on load.
//! Each provider gets its own keyring service name; the identity is the
//! keyring user name.  Keyring calls block, so they run on the blocking
//! thread pool.

use async_trait::async_trait;

use crate::error::{AuthloomError, Result};
use crate::store::token::{TokenLoader, TokenSaver};
use crate::token::{Identity, Token};

/// Token store backed by the OS keyring.
///
/// # Examples
///
/// ```no_run
/// use authloom::store::keyring::KeyringTokenStore;
/// use authloom::store::{TokenLoader, TokenSaver};
/// use authloom::token::{Identity, OAuth1Token, Token};
///
/// # async fn example() -> authloom::error::Result<()> {
/// let store = KeyringTokenStore::new("my-app");
/// let id = Identity::from("alice");
/// let token = Token::OAuth1(OAuth1Token {
///     token: "t".to_string(),
///     token_secret: "s".to_string(),
/// });
/// store.update_token("twitter", &id, &token).await?;
/// assert!(store.fetch_token("twitter", &id).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    app_name: String,
}

impl KeyringTokenStore {
    /// Creates a store whose service names are prefixed with `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// Builds the keyring service name for `provider`.
    ///
    /// The name is prefixed with the application name to avoid collisions
    /// with other applications that use the same keyring.
    fn service_name(&self, provider: &str) -> String {
        format!("{}-oauth-{}", self.app_name, provider)
    }

    /// Deletes the stored token for `provider` / `identity`.
    ///
    /// This is a no-op when no token exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Storage`] if the OS credential store returns
    /// an unexpected error.
    pub async fn delete_token(&self, provider: &str, identity: &Identity) -> Result<()> {
        let service = self.service_name(provider);
        let user = identity.as_str().to_string();

        run_blocking(move || {
            let entry = ::keyring::Entry::new(&service, &user).map_err(keyring_error)?;
            match entry.delete_password() {
                Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(keyring_error(e).into()),
            }
        })
        .await
    }
}

#[async_trait]
impl TokenLoader for KeyringTokenStore {
    async fn fetch_token(&self, provider: &str, identity: &Identity) -> Result<Option<Token>> {
        let service = self.service_name(provider);
        let user = identity.as_str().to_string();

        run_blocking(move || {
            let entry = ::keyring::Entry::new(&service, &user).map_err(keyring_error)?;
            match entry.get_password() {
                Ok(json_str) => {
                    let token: Token =
                        serde_json::from_str(&json_str).map_err(AuthloomError::from)?;
                    Ok(Some(token))
                }
                Err(::keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(keyring_error(e).into()),
            }
        })
        .await
    }
}

#[async_trait]
impl TokenSaver for KeyringTokenStore {
    async fn update_token(&self, provider: &str, identity: &Identity, token: &Token) -> Result<()> {
        let json_str = serde_json::to_string(token).map_err(AuthloomError::from)?;
        let service = self.service_name(provider);
        let user = identity.as_str().to_string();

        run_blocking(move || {
            let entry = ::keyring::Entry::new(&service, &user).map_err(keyring_error)?;
            entry.set_password(&json_str).map_err(keyring_error)?;
            Ok(())
        })
        .await
    }
}

fn keyring_error(e: ::keyring::Error) -> AuthloomError {
    AuthloomError::Storage(format!("keyring: {e}"))
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthloomError::Storage(format!("keyring task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::OAuth2Token;

    #[test]
    fn test_service_name_has_app_prefix() {
        let store = KeyringTokenStore::new("authloom");
        assert_eq!(store.service_name("github"), "authloom-oauth-github");
    }

    #[test]
    fn test_service_name_is_unique_per_provider() {
        let store = KeyringTokenStore::new("authloom");
        assert_ne!(store.service_name("a"), store.service_name("b"));
    }

    #[tokio::test]
    #[ignore = "requires system keyring"]
    async fn test_save_load_delete_via_keyring() {
        let store = KeyringTokenStore::new("authloom-test");
        let id = Identity::from("integration-user");
        let token = Token::OAuth2(OAuth2Token {
            access_token: "integration_access".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("integration_refresh".to_string()),
            expires_at: None,
            scope: Some("read write".to_string()),
        });

        store.update_token("test", &id, &token).await.expect("save");
        let loaded = store.fetch_token("test", &id).await.expect("load");
        assert_eq!(loaded, Some(token));

        store.delete_token("test", &id).await.expect("delete");
        assert!(store.fetch_token("test", &id).await.expect("load").is_none());
    }
}
