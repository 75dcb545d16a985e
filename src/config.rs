//! Configuration management for Authloom
//!
//! This module handles loading, parsing, validating, and resolving provider
//! registrations from YAML files and environment variables.
//!
//! A [`ProviderConfig`] is the serializable registration record.  At
//! registration time it is resolved once into an immutable
//! [`ProviderMetadata`] (parsed URLs, durations) that every caller shares
//! read-only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthloomError, Result};
use crate::oauth1::SignaturePlacement;
use crate::oauth2::pkce::CodeChallengeMethod;
use crate::oauth2::{TokenEndpointAuthMethod, TokenPlacement};
use crate::signer::SignatureMethod;

/// Prefix of every environment variable read by [`Config::load`].
pub const ENV_PREFIX: &str = "AUTHLOOM";

/// Main configuration structure for Authloom
///
/// # Examples
///
/// ```
/// use authloom::config::Config;
///
/// let yaml = r#"
/// providers:
///   - name: github
///     client_id: abc
///     client_secret: def
///     authorize_url: https://github.com/login/oauth/authorize
///     access_token_url: https://github.com/login/oauth/access_token
/// "#;
///
/// let config = Config::from_yaml(yaml).unwrap();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.providers[0].name, "github");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registered providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

/// Logging configuration consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level filter (`trace`, `debug`, `info`, `warn`, `error`) or any
    /// `EnvFilter` directive.  `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Optional file that receives a copy of every event
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientKwargs
// ---------------------------------------------------------------------------

/// Default request options merged into every call a client makes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientKwargs {
    /// Timeout applied to every network call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Headers added to every API call unless the call sets them itself
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Query parameters added to every API call unless the call sets them
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// Default scope requested by OAuth 2.0 authorization redirects
    #[serde(default)]
    pub scope: Option<String>,

    /// How the client authenticates at the OAuth 2.0 token endpoint
    #[serde(default)]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,

    /// PKCE method; `None` disables PKCE
    #[serde(default)]
    pub code_challenge_method: Option<CodeChallengeMethod>,

    /// OAuth 1.0a signature method
    #[serde(default)]
    pub signature_method: SignatureMethod,

    /// Where OAuth 1.0a protocol parameters are placed
    #[serde(default)]
    pub signature_placement: SignaturePlacement,

    /// Where OAuth 2.0 bearer tokens are placed
    #[serde(default)]
    pub token_placement: TokenPlacement,

    /// OAuth 1.0a `realm` for the `Authorization` header
    #[serde(default)]
    pub realm: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientKwargs {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            scope: None,
            token_endpoint_auth_method: TokenEndpointAuthMethod::default(),
            code_challenge_method: None,
            signature_method: SignatureMethod::default(),
            signature_placement: SignaturePlacement::default(),
            token_placement: TokenPlacement::default(),
            realm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Registration record for one provider.
///
/// The presence of `request_token_url` selects OAuth 1.0a.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Registry name, also used to namespace state and token storage
    pub name: String,

    /// Client identifier (`oauth_consumer_key` for OAuth 1.0a)
    pub client_id: String,

    /// Client secret; may be empty for public OAuth 2.0 clients
    #[serde(default)]
    pub client_secret: String,

    /// OAuth 1.0a temporary credential endpoint
    #[serde(default)]
    pub request_token_url: Option<String>,

    /// Authorization endpoint the user agent is redirected to
    #[serde(default)]
    pub authorize_url: Option<String>,

    /// Token endpoint
    #[serde(default)]
    pub access_token_url: Option<String>,

    /// Refresh endpoint; falls back to `access_token_url`
    #[serde(default)]
    pub refresh_token_url: Option<String>,

    /// RFC 7009 revocation endpoint
    #[serde(default)]
    pub revoke_url: Option<String>,

    /// Base URL relative API paths are joined onto
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// RFC 8414 / OpenID Connect discovery document URL
    #[serde(default)]
    pub server_metadata_url: Option<String>,

    /// Default request options
    #[serde(default)]
    pub client_kwargs: ClientKwargs,

    /// PEM private key for `RSA-SHA1`
    #[serde(default)]
    pub rsa_key_pem: Option<String>,

    /// Lifetime of redirect correlation entries, in seconds
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,

    /// Seconds before `expires_at` at which an OAuth 2.0 token counts as
    /// expired
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
}

fn default_state_ttl_secs() -> u64 {
    600
}

fn default_leeway_secs() -> u64 {
    60
}

const MAX_LEEWAY_SECS: u64 = 86_400;

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            request_token_url: None,
            authorize_url: None,
            access_token_url: None,
            refresh_token_url: None,
            revoke_url: None,
            api_base_url: None,
            server_metadata_url: None,
            client_kwargs: ClientKwargs::default(),
            rsa_key_pem: None,
            state_ttl_secs: default_state_ttl_secs(),
            leeway_secs: default_leeway_secs(),
        }
    }
}

impl ProviderConfig {
    /// Returns `true` when the provider speaks OAuth 1.0a.
    pub fn is_oauth1(&self) -> bool {
        self.request_token_url.is_some()
    }

    /// Validate the provider registration
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when a required field is missing,
    /// a URL does not parse, or options contradict each other.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> anyhow::Error {
            AuthloomError::Config(format!("provider '{}': {}", self.name, msg)).into()
        };

        if self.name.trim().is_empty() {
            return Err(AuthloomError::Config("provider name cannot be empty".to_string()).into());
        }

        if self.client_id.is_empty() {
            return Err(fail("client_id cannot be empty".to_string()));
        }

        for (field, value) in [
            ("request_token_url", &self.request_token_url),
            ("authorize_url", &self.authorize_url),
            ("access_token_url", &self.access_token_url),
            ("refresh_token_url", &self.refresh_token_url),
            ("revoke_url", &self.revoke_url),
            ("api_base_url", &self.api_base_url),
            ("server_metadata_url", &self.server_metadata_url),
        ] {
            if let Some(raw) = value {
                Url::parse(raw).map_err(|e| fail(format!("invalid {field} '{raw}': {e}")))?;
            }
        }

        // Discovery may fill in the OAuth 2.0 endpoints later.
        let discoverable = !self.is_oauth1() && self.server_metadata_url.is_some();
        if !discoverable {
            if self.authorize_url.is_none() {
                return Err(fail("authorize_url is required".to_string()));
            }
            if self.access_token_url.is_none() {
                return Err(fail("access_token_url is required".to_string()));
            }
        }

        if self.client_kwargs.timeout_secs == 0 {
            return Err(fail("client_kwargs.timeout_secs must be greater than 0".to_string()));
        }

        if self.state_ttl_secs == 0 {
            return Err(fail("state_ttl_secs must be greater than 0".to_string()));
        }

        if self.leeway_secs > MAX_LEEWAY_SECS {
            return Err(fail(format!(
                "leeway_secs must be less than or equal to {MAX_LEEWAY_SECS}"
            )));
        }

        if self.is_oauth1() {
            if self.client_kwargs.signature_method == SignatureMethod::RsaSha1
                && self.rsa_key_pem.is_none()
            {
                return Err(AuthloomError::InvalidSignatureConfiguration {
                    method: SignatureMethod::RsaSha1.to_string(),
                    message: format!("provider '{}' has no rsa_key_pem", self.name),
                }
                .into());
            }
        } else if self.client_kwargs.token_endpoint_auth_method != TokenEndpointAuthMethod::None
            && self.client_secret.is_empty()
        {
            return Err(fail(format!(
                "token_endpoint_auth_method '{}' requires a client_secret",
                self.client_kwargs.token_endpoint_auth_method
            )));
        }

        Ok(())
    }

    fn apply_env_vars(&mut self) {
        let prefix = env_key(&self.name);

        if let Ok(client_id) = std::env::var(format!("{prefix}_CLIENT_ID")) {
            self.client_id = client_id;
            tracing::debug!(provider = %self.name, "Env override: {}_CLIENT_ID", prefix);
        }

        if let Ok(client_secret) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
            self.client_secret = client_secret;
            tracing::debug!(provider = %self.name, "Env override: {}_CLIENT_SECRET", prefix);
        }
    }
}

/// Builds the environment variable prefix for `provider`:
/// `AUTHLOOM_<NAME>` with the name upper-cased and every
/// non-alphanumeric character replaced by `_`.
///
/// # Examples
///
/// ```
/// use authloom::config::env_key;
///
/// assert_eq!(env_key("my-github"), "AUTHLOOM_MY_GITHUB");
/// ```
pub fn env_key(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}_{name}")
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file and environment variables
    ///
    /// A missing file yields the default (empty) configuration.
    /// Environment variables applied afterwards:
    ///
    /// - `AUTHLOOM_<PROVIDER>_CLIENT_ID` / `AUTHLOOM_<PROVIDER>_CLIENT_SECRET`
    /// - `AUTHLOOM_LOG_LEVEL`, `AUTHLOOM_LOG_JSON`, `AUTHLOOM_LOG_FILE`
    ///
    /// The result is not validated; call [`Config::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when the file exists but cannot be
    /// read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    /// Parses configuration from a YAML string without touching the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::InvalidSignatureConfiguration`] when a
    /// provider names an unsupported `signature_method`, and
    /// [`AuthloomError::Config`] on any other malformed YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(document) = serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            check_signature_methods(&document)?;
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| AuthloomError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthloomError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    fn apply_env_vars(&mut self) {
        for provider in &mut self.providers {
            provider.apply_env_vars();
        }

        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOG_LEVEL")) {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var(format!("{ENV_PREFIX}_LOG_JSON")) {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => {
                    tracing::warn!("Invalid value for {}_LOG_JSON: {}", ENV_PREFIX, json_logs);
                }
            }
        }

        if let Ok(log_file) = std::env::var(format!("{ENV_PREFIX}_LOG_FILE")) {
            self.logging.file_path = Some(PathBuf::from(log_file));
        }
    }

    /// Returns the provider registered under `name`.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] if any provider is invalid or two
    /// providers share a name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(AuthloomError::Config(format!(
                    "provider '{}' is registered twice",
                    provider.name
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Rejects unsupported `signature_method` names with the typed signature
/// error instead of a generic parse failure.
fn check_signature_methods(document: &serde_yaml::Value) -> Result<()> {
    let Some(providers) = document.get("providers").and_then(|p| p.as_sequence()) else {
        return Ok(());
    };
    for method in providers.iter().filter_map(|provider| {
        provider
            .get("client_kwargs")
            .and_then(|kwargs| kwargs.get("signature_method"))
            .and_then(|m| m.as_str())
    }) {
        method.parse::<SignatureMethod>()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ProviderMetadata
// ---------------------------------------------------------------------------

/// Resolved, immutable provider registration.
///
/// # Examples
///
/// ```
/// use authloom::config::{ProviderConfig, ProviderMetadata};
///
/// let config = ProviderConfig {
///     name: "example".to_string(),
///     client_id: "id".to_string(),
///     client_secret: "secret".to_string(),
///     authorize_url: Some("https://ex.test/authorize".to_string()),
///     access_token_url: Some("https://ex.test/token".to_string()),
///     ..Default::default()
/// };
///
/// let meta = ProviderMetadata::from_config(&config).unwrap();
/// assert!(!meta.is_oauth1());
/// assert_eq!(meta.refresh_url().as_str(), "https://ex.test/token");
/// ```
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Registry name
    pub name: String,
    /// Client identifier
    pub client_id: String,
    /// Client secret (possibly empty)
    pub client_secret: String,
    /// OAuth 1.0a temporary credential endpoint
    pub request_token_url: Option<Url>,
    /// Authorization endpoint
    pub authorize_url: Url,
    /// Token endpoint
    pub access_token_url: Url,
    /// Refresh endpoint override
    pub refresh_token_url: Option<Url>,
    /// Revocation endpoint
    pub revoke_url: Option<Url>,
    /// API base URL
    pub api_base_url: Option<Url>,
    /// Default request options
    pub client_kwargs: ClientKwargs,
    /// PEM private key for `RSA-SHA1`
    pub rsa_key_pem: Option<String>,
    /// Correlation entry lifetime
    pub state_ttl: Duration,
    /// Expiry leeway for OAuth 2.0 tokens
    pub leeway: chrono::Duration,
}

impl ProviderMetadata {
    /// Validates `config` and resolves it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when `config` fails validation or
    /// an endpoint required at runtime is still missing (for example a
    /// discovery document that has not been applied yet).
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;

        let parse = |field: &str, value: &Option<String>| -> Result<Option<Url>> {
            value
                .as_deref()
                .map(|raw| {
                    Url::parse(raw).map_err(|e| {
                        AuthloomError::Config(format!(
                            "provider '{}': invalid {field}: {e}",
                            config.name
                        ))
                        .into()
                    })
                })
                .transpose()
        };
        let required = |field: &str, value: &Option<String>| -> Result<Url> {
            parse(field, value)?.ok_or_else(|| {
                AuthloomError::Config(format!(
                    "provider '{}': {field} is required",
                    config.name
                ))
                .into()
            })
        };

        Ok(Self {
            name: config.name.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            request_token_url: parse("request_token_url", &config.request_token_url)?,
            authorize_url: required("authorize_url", &config.authorize_url)?,
            access_token_url: required("access_token_url", &config.access_token_url)?,
            refresh_token_url: parse("refresh_token_url", &config.refresh_token_url)?,
            revoke_url: parse("revoke_url", &config.revoke_url)?,
            api_base_url: parse("api_base_url", &config.api_base_url)?,
            client_kwargs: config.client_kwargs.clone(),
            rsa_key_pem: config.rsa_key_pem.clone(),
            state_ttl: Duration::from_secs(config.state_ttl_secs),
            leeway: chrono::Duration::seconds(config.leeway_secs as i64),
        })
    }

    /// Returns `true` when the provider speaks OAuth 1.0a.
    pub fn is_oauth1(&self) -> bool {
        self.request_token_url.is_some()
    }

    /// Endpoint used for refresh-token grants.
    pub fn refresh_url(&self) -> &Url {
        self.refresh_token_url
            .as_ref()
            .unwrap_or(&self.access_token_url)
    }

    /// Timeout applied to every network call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.client_kwargs.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth2_provider() -> ProviderConfig {
        ProviderConfig {
            name: "example".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            authorize_url: Some("https://ex.test/authorize".to_string()),
            access_token_url: Some("https://ex.test/token".to_string()),
            ..Default::default()
        }
    }

    fn oauth1_provider() -> ProviderConfig {
        ProviderConfig {
            name: "twitter".to_string(),
            client_id: "consumer".to_string(),
            client_secret: "secret".to_string(),
            request_token_url: Some("https://ex.test/oauth/request_token".to_string()),
            authorize_url: Some("https://ex.test/oauth/authorize".to_string()),
            access_token_url: Some("https://ex.test/oauth/access_token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.providers.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_defaults() {
        let provider = ProviderConfig::default();
        assert_eq!(provider.state_ttl_secs, 600);
        assert_eq!(provider.leeway_secs, 60);
        assert_eq!(provider.client_kwargs.timeout_secs, 30);
        assert_eq!(
            provider.client_kwargs.token_endpoint_auth_method,
            TokenEndpointAuthMethod::ClientSecretBasic
        );
        assert_eq!(
            provider.client_kwargs.signature_method,
            SignatureMethod::HmacSha1
        );
    }

    #[test]
    fn test_config_validation_success() {
        assert!(oauth2_provider().validate().is_ok());
        assert!(oauth1_provider().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let mut provider = oauth2_provider();
        provider.name = " ".to_string();
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_missing_client_id() {
        let mut provider = oauth2_provider();
        provider.client_id.clear();
        let err = provider.validate().unwrap_err();
        assert!(err.to_string().contains("client_id"), "{err}");
    }

    #[test]
    fn test_validation_rejects_missing_endpoints() {
        let mut provider = oauth2_provider();
        provider.access_token_url = None;
        let err = provider.validate().unwrap_err();
        assert!(err.to_string().contains("access_token_url"), "{err}");

        let mut provider = oauth2_provider();
        provider.authorize_url = None;
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_validation_allows_missing_endpoints_with_discovery() {
        let mut provider = oauth2_provider();
        provider.authorize_url = None;
        provider.access_token_url = None;
        provider.server_metadata_url =
            Some("https://ex.test/.well-known/openid-configuration".to_string());
        assert!(provider.validate().is_ok());
        // Still unresolvable until discovery has run.
        assert!(ProviderMetadata::from_config(&provider).is_err());
    }

    #[test]
    fn test_validation_rejects_invalid_url() {
        let mut provider = oauth2_provider();
        provider.api_base_url = Some("not a url".to_string());
        let err = provider.validate().unwrap_err();
        assert!(err.to_string().contains("api_base_url"), "{err}");
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut provider = oauth2_provider();
        provider.client_kwargs.timeout_secs = 0;
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_rsa_without_key() {
        let mut provider = oauth1_provider();
        provider.client_kwargs.signature_method = SignatureMethod::RsaSha1;
        let err = provider.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::InvalidSignatureConfiguration { .. })
        ));
    }

    #[test]
    fn test_validation_requires_secret_for_confidential_client() {
        let mut provider = oauth2_provider();
        provider.client_secret.clear();
        assert!(provider.validate().is_err());

        provider.client_kwargs.token_endpoint_auth_method = TokenEndpointAuthMethod::None;
        assert!(provider.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_duplicate_names() {
        let config = Config {
            providers: vec![oauth2_provider(), oauth2_provider()],
            logging: LoggingConfig::default(),
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("twice"), "{err}");
    }

    #[test]
    fn test_env_key_sanitizes_name() {
        assert_eq!(env_key("github"), "AUTHLOOM_GITHUB");
        assert_eq!(env_key("my.provider-2"), "AUTHLOOM_MY_PROVIDER_2");
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
logging:
  level: debug
  json_format: true
providers:
  - name: twitter
    client_id: consumer
    client_secret: secret
    request_token_url: https://api.twitter.com/oauth/request_token
    authorize_url: https://api.twitter.com/oauth/authenticate
    access_token_url: https://api.twitter.com/oauth/access_token
    api_base_url: https://api.twitter.com/1.1/
    client_kwargs:
      signature_method: HMAC-SHA256
      signature_placement: query
      realm: photos
  - name: google
    client_id: gid
    client_secret: gsecret
    server_metadata_url: https://accounts.google.com/.well-known/openid-configuration
    leeway_secs: 30
    client_kwargs:
      scope: openid email
      token_endpoint_auth_method: client_secret_post
      code_challenge_method: S256
      token_placement: uri
      timeout_secs: 10
      headers:
        User-Agent: authloom
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        let twitter = config.provider("twitter").unwrap();
        assert!(twitter.is_oauth1());
        assert_eq!(
            twitter.client_kwargs.signature_method,
            SignatureMethod::HmacSha256
        );
        assert_eq!(
            twitter.client_kwargs.signature_placement,
            SignaturePlacement::Query
        );
        assert_eq!(twitter.client_kwargs.realm.as_deref(), Some("photos"));

        let google = config.provider("google").unwrap();
        assert!(!google.is_oauth1());
        assert_eq!(google.leeway_secs, 30);
        assert_eq!(
            google.client_kwargs.token_endpoint_auth_method,
            TokenEndpointAuthMethod::ClientSecretPost
        );
        assert_eq!(
            google.client_kwargs.code_challenge_method,
            Some(CodeChallengeMethod::S256)
        );
        assert_eq!(google.client_kwargs.token_placement, TokenPlacement::Uri);
        assert_eq!(google.client_kwargs.headers["User-Agent"], "authloom");
    }

    #[test]
    fn test_config_from_yaml_rejects_garbage() {
        let err = Config::from_yaml("providers: [[[").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Config(_))
        ));
    }

    #[test]
    fn test_metadata_resolves_urls_and_durations() {
        let mut provider = oauth2_provider();
        provider.refresh_token_url = Some("https://ex.test/refresh".to_string());
        provider.leeway_secs = 5;
        provider.state_ttl_secs = 120;

        let meta = ProviderMetadata::from_config(&provider).unwrap();
        assert_eq!(meta.refresh_url().as_str(), "https://ex.test/refresh");
        assert_eq!(meta.leeway, chrono::Duration::seconds(5));
        assert_eq!(meta.state_ttl, Duration::from_secs(120));
        assert_eq!(meta.timeout(), Duration::from_secs(30));
    }
}
