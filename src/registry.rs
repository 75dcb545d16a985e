//! Provider registry
//!
//! The [`Registry`] is an explicit `name -> RemoteClient` map owned by the
//! application.  It is assembled once by a [`RegistryBuilder`], which
//! resolves every [`ProviderConfig`] into immutable metadata (running server
//! metadata discovery where configured), wires in the shared HTTP client,
//! state store and token store hooks, and installs each provider's
//! compliance fixes.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use authloom::compliance::fixes;
//! use authloom::config::ProviderConfig;
//! use authloom::registry::{ProviderRegistration, Registry};
//! use authloom::store::MemoryTokenStore;
//!
//! # async fn example() -> authloom::error::Result<()> {
//! let github = ProviderConfig {
//!     name: "github".to_string(),
//!     client_id: "client-id".to_string(),
//!     client_secret: "client-secret".to_string(),
//!     authorize_url: Some("https://github.com/login/oauth/authorize".to_string()),
//!     access_token_url: Some("https://github.com/login/oauth/access_token".to_string()),
//!     api_base_url: Some("https://api.github.com/".to_string()),
//!     ..Default::default()
//! };
//!
//! let registry = Registry::builder()
//!     .token_store(Arc::new(MemoryTokenStore::new()))
//!     .register(ProviderRegistration::new(github).compliance_fix(fixes::default_token_type("bearer")))
//!     .build()
//!     .await?;
//!
//! let client = registry.get("github")?;
//! let response = client.get("user", "alice").await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::client::RemoteClient;
use crate::compliance::{ComplianceFix, CompliancePipeline};
use crate::config::{Config, ProviderConfig, ProviderMetadata};
use crate::error::{AuthloomError, Result};
use crate::oauth2::discovery;
use crate::store::{MemoryStateStore, NoopTokenStore, StateStore, TokenLoader, TokenSaver};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registered providers, by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    clients: BTreeMap<String, Arc<RemoteClient>>,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Returns the client registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::ProviderNotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<Arc<RemoteClient>> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| AuthloomError::ProviderNotFound(name.to_string()).into())
    }

    /// Returns `true` when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` when no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ProviderRegistration
// ---------------------------------------------------------------------------

/// One provider to register: its configuration plus programmatic hooks.
///
/// Token hooks set here override the builder-wide ones for this provider.
pub struct ProviderRegistration {
    config: ProviderConfig,
    pipeline: CompliancePipeline,
    loader: Option<Arc<dyn TokenLoader>>,
    saver: Option<Arc<dyn TokenSaver>>,
}

impl fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.config.name)
            .field("pipeline", &self.pipeline)
            .field("custom_loader", &self.loader.is_some())
            .field("custom_saver", &self.saver.is_some())
            .finish()
    }
}

impl ProviderRegistration {
    /// Registers `config` with no hooks.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            pipeline: CompliancePipeline::new(),
            loader: None,
            saver: None,
        }
    }

    /// Installs a compliance fix.  Fixes run in installation order.
    pub fn compliance_fix(mut self, fix: impl ComplianceFix) -> Self {
        self.pipeline.install(&fix);
        self
    }

    /// Replaces the compliance pipeline.
    pub fn pipeline(mut self, pipeline: CompliancePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Overrides the token loader for this provider.
    pub fn token_loader(mut self, loader: Arc<dyn TokenLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Overrides the token saver for this provider.
    pub fn token_saver(mut self, saver: Arc<dyn TokenSaver>) -> Self {
        self.saver = Some(saver);
        self
    }
}

impl From<ProviderConfig> for ProviderRegistration {
    fn from(config: ProviderConfig) -> Self {
        Self::new(config)
    }
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Registry`].
///
/// Defaults: a fresh `reqwest::Client`, a [`MemoryStateStore`] and
/// [`NoopTokenStore`] hooks.
pub struct RegistryBuilder {
    registrations: Vec<ProviderRegistration>,
    http: Option<Arc<reqwest::Client>>,
    state_store: Option<Arc<dyn StateStore>>,
    loader: Arc<dyn TokenLoader>,
    saver: Arc<dyn TokenSaver>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            http: None,
            state_store: None,
            loader: Arc::new(NoopTokenStore),
            saver: Arc::new(NoopTokenStore),
        }
    }

    /// Shares `http` between all providers.  TLS, proxy and redirect policy
    /// are taken from it.
    pub fn http_client(mut self, http: Arc<reqwest::Client>) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets the ephemeral state store shared by all providers.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Sets the default token loader.
    pub fn token_loader(mut self, loader: Arc<dyn TokenLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the default token saver.
    pub fn token_saver(mut self, saver: Arc<dyn TokenSaver>) -> Self {
        self.saver = saver;
        self
    }

    /// Uses `store` as both default token loader and saver.
    pub fn token_store<S>(self, store: Arc<S>) -> Self
    where
        S: TokenLoader + TokenSaver + 'static,
    {
        let loader: Arc<dyn TokenLoader> = store.clone();
        let saver: Arc<dyn TokenSaver> = store;
        self.token_loader(loader).token_saver(saver)
    }

    /// Adds a provider.
    pub fn register(mut self, registration: impl Into<ProviderRegistration>) -> Self {
        self.registrations.push(registration.into());
        self
    }

    /// Adds every provider of `config`.
    pub fn register_all(self, config: &Config) -> Self {
        config
            .providers
            .iter()
            .cloned()
            .fold(self, |builder, provider| builder.register(provider))
    }

    /// Resolves every registration and builds the registry.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::Config`] when a provider is invalid, discovery
    ///   fails, or two providers share a name
    /// - [`AuthloomError::InvalidSignatureConfiguration`] when an OAuth 1.0a
    ///   signer cannot be built
    pub async fn build(self) -> Result<Registry> {
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(reqwest::Client::new()));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));

        let mut clients = BTreeMap::new();
        for registration in self.registrations {
            let ProviderRegistration {
                mut config,
                pipeline,
                loader,
                saver,
            } = registration;

            if clients.contains_key(&config.name) {
                return Err(AuthloomError::Config(format!(
                    "provider '{}' is registered twice",
                    config.name
                ))
                .into());
            }

            if config.server_metadata_url.is_some() && !config.is_oauth1() {
                discovery::discover_into(&http, &mut config).await?;
            }

            let metadata = Arc::new(ProviderMetadata::from_config(&config)?);
            let client = RemoteClient::new(
                metadata,
                Arc::clone(&http),
                Arc::new(pipeline),
                Arc::clone(&state_store),
                loader.unwrap_or_else(|| Arc::clone(&self.loader)),
                saver.unwrap_or_else(|| Arc::clone(&self.saver)),
            )?;

            tracing::debug!(
                provider = %config.name,
                oauth1 = config.is_oauth1(),
                "registered provider"
            );
            clients.insert(config.name, Arc::new(client));
        }

        Ok(Registry { clients })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Engine;
    use crate::compliance::ExtensionPoint;

    fn oauth2(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            authorize_url: Some("https://auth.example.test/authorize".to_string()),
            access_token_url: Some("https://auth.example.test/token".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_registers_providers() {
        let mut twitter = oauth2("twitter");
        twitter.request_token_url = Some("https://auth.example.test/request".to_string());

        let registry = Registry::builder()
            .register(oauth2("github"))
            .register(twitter)
            .build()
            .await
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["github", "twitter"]);
        assert!(matches!(
            registry.get("github").unwrap().engine(),
            Engine::OAuth2(_)
        ));
        assert!(matches!(
            registry.get("twitter").unwrap().engine(),
            Engine::OAuth1(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let registry = Registry::builder().build().await.unwrap();
        assert!(registry.is_empty());
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::ProviderNotFound(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let result = Registry::builder()
            .register(oauth2("github"))
            .register(oauth2("github"))
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_provider_is_rejected() {
        let mut broken = oauth2("broken");
        broken.access_token_url = None;
        let result = Registry::builder().register(broken).build().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_register_all_from_config() {
        let config = Config {
            providers: vec![oauth2("a"), oauth2("b")],
            ..Default::default()
        };
        let registry = Registry::builder().register_all(&config).build().await.unwrap();
        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_registration_installs_fixes_in_order() {
        let registration = ProviderRegistration::new(oauth2("x"))
            .compliance_fix(crate::compliance::fixes::lowercase_token_response_keys())
            .compliance_fix(crate::compliance::fixes::default_token_type("bearer"));
        let names = registration
            .pipeline
            .hook_names(ExtensionPoint::AccessTokenResponse);
        assert_eq!(names.len(), 2);
    }
}
