//! Authorization server metadata discovery
//!
//! Implements RFC 8414 / OpenID Connect Discovery 1.0 so a provider can be
//! registered with just a `server_metadata_url` instead of explicit
//! endpoint URLs.
//!
//! `server_metadata_url` is either the full URL of the metadata document
//! (anything under `/.well-known/`) or an issuer identifier.  For an issuer,
//! the well-known locations are tried in this order:
//!
//! 1. `/.well-known/oauth-authorization-server<path>` (path insertion)
//! 2. `/.well-known/openid-configuration<path>` (path insertion)
//! 3. `<issuer>/.well-known/openid-configuration` (path appending)
//!
//! For a root issuer (no path) these collapse to two distinct URLs.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ProviderConfig;
use crate::error::{AuthloomError, FlowStep, Result};
use crate::http::{self, CallContext, HttpRequest};
use crate::oauth2::pkce::{self, CodeChallengeMethod};

// ---------------------------------------------------------------------------
// AuthorizationServerMetadata
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.0 / OIDC authorization server.
///
/// # Examples
///
/// ```
/// use authloom::oauth2::discovery::AuthorizationServerMetadata;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token",
///     "code_challenge_methods_supported": ["S256"]
/// }"#;
///
/// let meta: AuthorizationServerMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.token_endpoint, "https://auth.example.com/token");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier.
    pub issuer: String,

    /// Authorization endpoint (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// Token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Revocation endpoint (RFC 7009).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,

    /// OpenID Connect UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// `response_type` values the server supports.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// `grant_type` values the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Client authentication methods accepted at the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// PKCE methods the server supports (e.g. `["S256"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AuthorizationServerMetadata {
    /// Fills the endpoints `config` leaves unset.
    ///
    /// Explicitly configured values always win.  When no
    /// `code_challenge_method` is configured and the server advertises
    /// `S256`, PKCE is enabled with `S256`.
    ///
    /// # Examples
    ///
    /// ```
    /// use authloom::config::ProviderConfig;
    /// use authloom::oauth2::discovery::AuthorizationServerMetadata;
    ///
    /// let meta: AuthorizationServerMetadata = serde_json::from_str(r#"{
    ///     "issuer": "https://auth.example.com",
    ///     "authorization_endpoint": "https://auth.example.com/authorize",
    ///     "token_endpoint": "https://auth.example.com/token"
    /// }"#).unwrap();
    ///
    /// let mut config = ProviderConfig {
    ///     access_token_url: Some("https://override.example.com/token".to_string()),
    ///     ..Default::default()
    /// };
    /// meta.apply_to(&mut config);
    ///
    /// assert_eq!(config.authorize_url.as_deref(), Some("https://auth.example.com/authorize"));
    /// assert_eq!(config.access_token_url.as_deref(), Some("https://override.example.com/token"));
    /// ```
    pub fn apply_to(&self, config: &mut ProviderConfig) {
        config
            .authorize_url
            .get_or_insert_with(|| self.authorization_endpoint.clone());
        config
            .access_token_url
            .get_or_insert_with(|| self.token_endpoint.clone());
        if config.revoke_url.is_none() {
            config.revoke_url = self.revocation_endpoint.clone();
        }

        let kwargs = &mut config.client_kwargs;
        if kwargs.code_challenge_method.is_none() {
            let supported = self
                .code_challenge_methods_supported
                .as_deref()
                .unwrap_or_default();
            if pkce::is_supported(supported, CodeChallengeMethod::S256) {
                kwargs.code_challenge_method = Some(CodeChallengeMethod::S256);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Returns the URLs to try for `server_metadata_url`, in order.
fn candidate_urls(server_metadata_url: &Url) -> Vec<Url> {
    if server_metadata_url.path().contains("/.well-known/") {
        return vec![server_metadata_url.clone()];
    }

    let path = server_metadata_url.path().trim_end_matches('/');
    let mut base = server_metadata_url.clone();
    base.set_query(None);
    base.set_fragment(None);

    let with_path = |p: String| {
        let mut url = base.clone();
        url.set_path(&p);
        url
    };

    let mut candidates = vec![
        with_path(format!("/.well-known/oauth-authorization-server{path}")),
        with_path(format!("/.well-known/openid-configuration{path}")),
        with_path(format!("{path}/.well-known/openid-configuration")),
    ];
    candidates.dedup();
    candidates
}

/// Fetches the metadata document for `provider`.
///
/// Candidates that fail to load or parse are skipped; the first usable
/// document wins.
///
/// # Errors
///
/// Returns [`AuthloomError::Config`] when no candidate yields a document,
/// or [`AuthloomError::Timeout`] when a candidate exceeds `timeout`.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use authloom::oauth2::discovery::fetch_server_metadata;
///
/// # async fn example() -> authloom::error::Result<()> {
/// let http = reqwest::Client::new();
/// let issuer = Url::parse("https://accounts.google.com")?;
/// let meta = fetch_server_metadata(&http, "google", &issuer, Duration::from_secs(10)).await?;
/// println!("token endpoint: {}", meta.token_endpoint);
/// # Ok(())
/// # }
/// ```
pub async fn fetch_server_metadata(
    http: &reqwest::Client,
    provider: &str,
    server_metadata_url: &Url,
    timeout: Duration,
) -> Result<AuthorizationServerMetadata> {
    for candidate in candidate_urls(server_metadata_url) {
        let request = HttpRequest::new(Method::GET, candidate.clone());
        let ctx = CallContext {
            provider,
            step: FlowStep::Discovery,
            timeout,
        };

        let response = match http::send(http, request, ctx).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(AuthloomError::Timeout { .. }) = e.downcast_ref::<AuthloomError>() {
                    return Err(e);
                }
                tracing::debug!(provider, url = %candidate, error = %e, "discovery candidate failed");
                continue;
            }
        };

        if !response.is_success() {
            tracing::debug!(provider, url = %candidate, status = %response.status, "discovery candidate not found");
            continue;
        }

        match response.json::<AuthorizationServerMetadata>() {
            Ok(meta) => {
                tracing::debug!(provider, url = %candidate, issuer = %meta.issuer, "loaded server metadata");
                return Ok(meta);
            }
            Err(e) => {
                tracing::debug!(provider, url = %candidate, error = %e, "discovery candidate unparseable");
            }
        }
    }

    Err(AuthloomError::Config(format!(
        "authorization server metadata not found for provider '{provider}' at {server_metadata_url}"
    ))
    .into())
}

/// Resolves `config.server_metadata_url`, if set, and fills the missing
/// endpoints.
///
/// # Errors
///
/// Returns [`AuthloomError::Config`] when the URL is invalid or discovery
/// fails.
pub async fn discover_into(http: &reqwest::Client, config: &mut ProviderConfig) -> Result<()> {
    let Some(raw) = config.server_metadata_url.as_deref() else {
        return Ok(());
    };
    let url = Url::parse(raw).map_err(|e| {
        AuthloomError::Config(format!(
            "provider '{}': invalid server_metadata_url '{raw}': {e}",
            config.name
        ))
    })?;

    let timeout = Duration::from_secs(config.client_kwargs.timeout_secs);
    let meta = fetch_server_metadata(http, &config.name, &url, timeout).await?;
    meta.apply_to(config);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
