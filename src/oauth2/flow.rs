//! OAuth 2.0 authorization code flow, token grants and bearer requests
//!
//! # Flow overview
//!
//! 1. [`OAuth2Engine::authorize_redirect`] generates a random `state`, a PKCE
//!    challenge when enabled, and an OpenID Connect `nonce` when the scope
//!    contains `openid`.  The pending authorization is parked in the state
//!    store under `state` and the authorization URL is returned.
//! 2. The provider redirects back with `code` and `state`.
//! 3. [`OAuth2Engine::authorize_access_token`] consumes the pending
//!    authorization and exchanges the code at the token endpoint.
//! 4. [`OAuth2Engine::request`] attaches the bearer token to API calls,
//!    refreshing it when it is expired or rejected with `401`.
//!
//! # References
//!
//! - RFC 6749 <https://www.rfc-editor.org/rfc/rfc6749>
//! - RFC 6750 <https://www.rfc-editor.org/rfc/rfc6750>
//! - RFC 7009 <https://www.rfc-editor.org/rfc/rfc7009>
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::future::FutureExt;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::compliance::{CompliancePipeline, ExtensionPoint};
use crate::config::ProviderMetadata;
use crate::error::{into_authloom, AuthloomError, FlowStep, Result};
use crate::http::{self, CallContext, HttpRequest, HttpResponse};
use crate::oauth2::pkce::{self, random_urlsafe};
use crate::oauth2::refresh::RefreshCoordinator;
use crate::oauth2::{TokenEndpointAuthMethod, TokenPlacement};
use crate::redirect::{AuthorizationRedirect, AuthorizeOptions, CallbackParams};
use crate::store::state::{put_json, take_json};
use crate::store::{FlowCorrelationId, StateStore, TokenLoader, TokenSaver};
use crate::token::{Identity, OAuth2Token, Token};

/// Random bytes in `state` and `nonce` values.
const STATE_BYTES: usize = 16;

/// Pending authorization parked between redirect and callback.
#[derive(Debug, Serialize, Deserialize)]
struct PendingAuthorization {
    state: String,
    redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
}

/// Hook points a token endpoint call runs through.
#[derive(Debug, Clone, Copy)]
struct GrantHooks {
    request: Option<ExtensionPoint>,
    response: ExtensionPoint,
}

const ACCESS_TOKEN_HOOKS: GrantHooks = GrantHooks {
    request: None,
    response: ExtensionPoint::AccessTokenResponse,
};

const REFRESH_TOKEN_HOOKS: GrantHooks = GrantHooks {
    request: Some(ExtensionPoint::RefreshTokenRequest),
    response: ExtensionPoint::RefreshTokenResponse,
};

// ---------------------------------------------------------------------------
// OAuth2Engine
// ---------------------------------------------------------------------------

/// Drives the OAuth 2.0 grants and bearer-authenticated calls for one
/// provider.
///
/// The engine is cheap to clone; clones share the refresh coordinator, so
/// concurrent refreshes for one identity are coalesced across clones.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use authloom::compliance::CompliancePipeline;
/// use authloom::config::{ProviderConfig, ProviderMetadata};
/// use authloom::oauth2::OAuth2Engine;
/// use authloom::redirect::AuthorizeOptions;
/// use authloom::store::{MemoryStateStore, NoopTokenStore};
///
/// # async fn example() -> authloom::error::Result<()> {
/// let config = ProviderConfig {
///     name: "github".to_string(),
///     client_id: "client-id".to_string(),
///     client_secret: "client-secret".to_string(),
///     authorize_url: Some("https://github.com/login/oauth/authorize".to_string()),
///     access_token_url: Some("https://github.com/login/oauth/access_token".to_string()),
///     ..Default::default()
/// };
///
/// let engine = OAuth2Engine::new(
///     Arc::new(ProviderMetadata::from_config(&config)?),
///     Arc::new(reqwest::Client::new()),
///     Arc::new(CompliancePipeline::new()),
///     Arc::new(MemoryStateStore::new()),
///     Arc::new(NoopTokenStore),
///     Arc::new(NoopTokenStore),
/// )?;
///
/// let redirect = engine
///     .authorize_redirect(
///         "https://app.test/callback",
///         &AuthorizeOptions::new().scope("read:user"),
///     )
///     .await?;
/// println!("send the user to {}", redirect.url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OAuth2Engine {
    metadata: Arc<ProviderMetadata>,
    http: Arc<reqwest::Client>,
    pipeline: Arc<CompliancePipeline>,
    state_store: Arc<dyn StateStore>,
    loader: Arc<dyn TokenLoader>,
    saver: Arc<dyn TokenSaver>,
    refresher: RefreshCoordinator,
}

impl std::fmt::Debug for OAuth2Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Engine")
            .field("provider", &self.metadata.name)
            .field("pipeline", &self.pipeline)
            .field("refresher", &self.refresher)
            .finish()
    }
}

impl OAuth2Engine {
    /// Creates an engine for `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when the provider is configured for
    /// OAuth 1.0a.
    pub fn new(
        metadata: Arc<ProviderMetadata>,
        http: Arc<reqwest::Client>,
        pipeline: Arc<CompliancePipeline>,
        state_store: Arc<dyn StateStore>,
        loader: Arc<dyn TokenLoader>,
        saver: Arc<dyn TokenSaver>,
    ) -> Result<Self> {
        if metadata.is_oauth1() {
            return Err(AuthloomError::Config(format!(
                "provider '{}' has a request_token_url and is not an OAuth 2.0 provider",
                metadata.name
            ))
            .into());
        }

        Ok(Self {
            metadata,
            http,
            pipeline,
            state_store,
            loader,
            saver,
            refresher: RefreshCoordinator::default(),
        })
    }

    /// The provider this engine serves.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    // -----------------------------------------------------------------------
    // Authorization code grant
    // -----------------------------------------------------------------------

    /// Builds the authorization redirect and parks the pending
    /// authorization in the state store.
    ///
    /// The requested scope is `options.scope`, falling back to
    /// `client_kwargs.scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Storage`] when the state store fails.
    pub async fn authorize_redirect(
        &self,
        redirect_uri: &str,
        options: &AuthorizeOptions,
    ) -> Result<AuthorizationRedirect> {
        let provider = self.metadata.name.as_str();
        let state = random_urlsafe(STATE_BYTES);
        let scope = options
            .scope
            .clone()
            .or_else(|| self.metadata.client_kwargs.scope.clone());
        let challenge = self
            .metadata
            .client_kwargs
            .code_challenge_method
            .map(pkce::generate);
        let nonce = scope
            .as_deref()
            .filter(|s| s.split_whitespace().any(|scope| scope == "openid"))
            .map(|_| random_urlsafe(STATE_BYTES));

        let correlation_id = FlowCorrelationId::new(state.clone());
        put_json(
            self.state_store.as_ref(),
            &correlation_id.storage_key(provider),
            &PendingAuthorization {
                state: state.clone(),
                redirect_uri: redirect_uri.to_string(),
                code_verifier: challenge.as_ref().map(|c| c.verifier.clone()),
                nonce: nonce.clone(),
            },
            self.metadata.state_ttl,
        )
        .await?;

        let mut url = self.metadata.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.metadata.client_id)
                .append_pair("redirect_uri", redirect_uri);
            if let Some(scope) = &scope {
                query.append_pair("scope", scope);
            }
            query.append_pair("state", &state);
            if let Some(challenge) = &challenge {
                query
                    .append_pair("code_challenge", &challenge.challenge)
                    .append_pair("code_challenge_method", challenge.method.as_str());
            }
            if let Some(nonce) = &nonce {
                query.append_pair("nonce", nonce);
            }
            for (k, v) in &options.extra_params {
                query.append_pair(k, v);
            }
        }

        tracing::debug!(
            provider,
            pkce = challenge.is_some(),
            oidc = nonce.is_some(),
            "built authorization redirect"
        );

        Ok(AuthorizationRedirect {
            url,
            correlation_id,
        })
    }

    /// Exchanges the callback's authorization code for a token.
    ///
    /// The pending authorization is consumed before the exchange, so a
    /// callback can never be replayed, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::OAuthCallback`] when the callback carries `error`
    /// - [`AuthloomError::MismatchingState`] when `code` or `state` is
    ///   missing, or `state` is unknown, expired, already consumed or does
    ///   not match
    /// - [`AuthloomError::TokenEndpoint`] when the token endpoint rejects the
    ///   code or returns an unusable body
    pub async fn authorize_access_token(&self, params: &CallbackParams) -> Result<OAuth2Token> {
        let provider = self.metadata.name.as_str();

        if let Some(error) = params.get("error") {
            if let Some(state) = params.get("state") {
                let key = FlowCorrelationId::new(state).storage_key(provider);
                self.state_store.delete(&key).await?;
            }
            tracing::warn!(provider, error, "provider returned callback error");
            return Err(AuthloomError::OAuthCallback {
                provider: provider.to_string(),
                error: error.to_string(),
                description: params.get("error_description").map(str::to_string),
                uri: params.get("error_uri").map(str::to_string),
            }
            .into());
        }

        let mismatch = |message: &str| AuthloomError::MismatchingState {
            provider: provider.to_string(),
            step: FlowStep::Callback,
            message: message.to_string(),
        };

        let code = params
            .get("code")
            .ok_or_else(|| mismatch("callback is missing code"))?;
        let state = params
            .get("state")
            .ok_or_else(|| mismatch("callback is missing state"))?;

        let key = FlowCorrelationId::new(state).storage_key(provider);
        let pending: PendingAuthorization = take_json(self.state_store.as_ref(), &key)
            .await?
            .ok_or_else(|| mismatch("state is unknown, expired or already used"))?;
        if pending.state != state {
            tracing::warn!(provider, "callback state does not match stored state");
            return Err(mismatch("state does not match").into());
        }

        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), pending.redirect_uri),
        ];
        if let Some(verifier) = pending.code_verifier {
            form.push(("code_verifier".to_string(), verifier));
        }

        let token = self
            .token_grant(
                self.metadata.access_token_url.clone(),
                form,
                FlowStep::AccessToken,
                ACCESS_TOKEN_HOOKS,
            )
            .await?;

        tracing::info!(provider, "obtained access token");
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Other grants
    // -----------------------------------------------------------------------

    /// Runs a client-credentials grant (RFC 6749 section 4.4).
    ///
    /// `scope` falls back to `client_kwargs.scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::TokenEndpoint`] when the token endpoint
    /// rejects the client or returns an unusable body.
    pub async fn client_credentials_token(&self, scope: Option<&str>) -> Result<OAuth2Token> {
        let mut form = vec![("grant_type".to_string(), "client_credentials".to_string())];
        if let Some(scope) = scope.or(self.metadata.client_kwargs.scope.as_deref()) {
            form.push(("scope".to_string(), scope.to_string()));
        }

        let token = self
            .token_grant(
                self.metadata.access_token_url.clone(),
                form,
                FlowStep::AccessToken,
                ACCESS_TOKEN_HOOKS,
            )
            .await?;

        tracing::info!(
            provider = %self.metadata.name,
            "obtained client credentials token"
        );
        Ok(token)
    }

    /// Refreshes `token` for `identity` and hands the result to the token
    /// saver.
    ///
    /// Concurrent calls for the same identity are coalesced: one refresh
    /// grant runs and every caller receives its outcome.  Before refreshing,
    /// the token store is re-read; a fresh token stored by another caller is
    /// reused instead of refreshing again.  When the response omits
    /// `refresh_token`, the previous one is kept.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::TokenExpired`] when no refresh token is available
    /// - [`AuthloomError::TokenEndpoint`] when the refresh grant is rejected
    pub async fn refresh_token(
        &self,
        identity: &Identity,
        token: &OAuth2Token,
    ) -> Result<OAuth2Token> {
        let engine = self.clone();
        let leader_identity = identity.clone();
        let stale = token.clone();

        self.refresher
            .run(identity, move || {
                async move {
                    let provider = engine.metadata.name.clone();
                    engine
                        .lead_refresh(&leader_identity, stale)
                        .await
                        .map_err(|e| {
                            let e = into_authloom(e);
                            tracing::warn!(
                                provider = %provider,
                                identity = %leader_identity,
                                error = %e,
                                "token refresh failed"
                            );
                            e
                        })
                }
                .boxed()
            })
            .await
    }

    /// Revokes `token` at the provider's revocation endpoint (RFC 7009).
    ///
    /// `hint` is sent as `token_type_hint` (`access_token` or
    /// `refresh_token`).
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::Config`] when no `revoke_url` is configured
    /// - [`AuthloomError::TokenEndpoint`] when the endpoint rejects the
    ///   request
    pub async fn revoke_token(&self, token: &str, hint: Option<&str>) -> Result<()> {
        let provider = self.metadata.name.as_str();
        let revoke_url = self.metadata.revoke_url.clone().ok_or_else(|| {
            AuthloomError::Config(format!("provider '{provider}' has no revoke_url"))
        })?;

        let mut form = vec![("token".to_string(), token.to_string())];
        if let Some(hint) = hint {
            form.push(("token_type_hint".to_string(), hint.to_string()));
        }

        let mut request = HttpRequest::new(Method::POST, revoke_url);
        self.authenticate_client(&mut request, &mut form)?;
        request.set_form_params(&form);
        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;

        let response = self.send(request, FlowStep::Revoke, None).await?;
        if !response.is_success() {
            return Err(endpoint_error(provider, FlowStep::Revoke, &response).into());
        }

        tracing::info!(provider, "revoked token");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bearer requests
    // -----------------------------------------------------------------------

    /// Attaches `token` to `request` according to `client_kwargs.token_placement`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when body placement is configured
    /// for a request whose body is not form-encoded.
    pub fn attach_token(&self, request: &mut HttpRequest, token: &OAuth2Token) -> Result<()> {
        match self.metadata.client_kwargs.token_placement {
            TokenPlacement::Header => {
                request.set_header("Authorization", &format!("Bearer {}", token.access_token))?;
            }
            TokenPlacement::Uri => {
                request
                    .url
                    .query_pairs_mut()
                    .append_pair("access_token", &token.access_token);
            }
            TokenPlacement::Body => {
                if request.body.is_some() && !request.is_form() {
                    return Err(AuthloomError::Config(format!(
                        "provider '{}': body token placement requires a form-encoded body",
                        self.metadata.name
                    ))
                    .into());
                }
                let mut form = request.form_params();
                form.push(("access_token".to_string(), token.access_token.clone()));
                request.set_form_params(&form);
            }
        }
        Ok(())
    }

    /// Sends an authenticated API request.
    ///
    /// A token that is expired (within the configured leeway) is refreshed
    /// first.  A `401 Unauthorized` response triggers one refresh and one
    /// retry of the original request, unless the token was already
    /// refreshed for this call.  Any other non-2xx response is returned
    /// as-is.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::TokenExpired`] when a refresh is needed but no
    ///   refresh token is available
    /// - refresh, hook, transport and timeout errors
    pub async fn request(
        &self,
        request: HttpRequest,
        identity: &Identity,
        token: OAuth2Token,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let provider = self.metadata.name.as_str();
        let mut token = token;
        let mut refreshed = false;

        if token.is_expired(self.metadata.leeway) {
            tracing::debug!(provider, identity = %identity, "access token expired, refreshing");
            token = self.refresh_token(identity, &token).await?;
            refreshed = true;
        }

        let response = self
            .send_protected(request.clone(), &token, timeout)
            .await?;
        if response.status != StatusCode::UNAUTHORIZED || refreshed {
            return Ok(response);
        }

        tracing::debug!(provider, identity = %identity, "access token rejected, refreshing");
        let token = self.refresh_token(identity, &token).await?;
        self.send_protected(request, &token, timeout).await
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn lead_refresh(&self, identity: &Identity, stale: OAuth2Token) -> Result<OAuth2Token> {
        let provider = self.metadata.name.as_str();

        let stored = self
            .loader
            .fetch_token(provider, identity)
            .await?
            .and_then(|token| match token {
                Token::OAuth2(token) => Some(token),
                Token::OAuth1(_) => None,
            });

        if let Some(current) = &stored {
            if current.access_token != stale.access_token
                && !current.is_expired(self.metadata.leeway)
            {
                tracing::debug!(provider, identity = %identity, "reusing token refreshed by another caller");
                return Ok(current.clone());
            }
        }

        let refresh_token = stored
            .and_then(|t| t.refresh_token)
            .or(stale.refresh_token)
            .ok_or_else(|| AuthloomError::TokenExpired {
                provider: provider.to_string(),
                identity: identity.to_string(),
            })?;

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.clone()),
        ];
        let mut fresh = self
            .token_grant(
                self.metadata.refresh_url().clone(),
                form,
                FlowStep::Refresh,
                REFRESH_TOKEN_HOOKS,
            )
            .await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        self.saver
            .update_token(provider, identity, &Token::OAuth2(fresh.clone()))
            .await?;

        tracing::info!(provider, identity = %identity, "refreshed access token");
        Ok(fresh)
    }

    async fn token_grant(
        &self,
        url: Url,
        mut form: Vec<(String, String)>,
        step: FlowStep,
        hooks: GrantHooks,
    ) -> Result<OAuth2Token> {
        let provider = self.metadata.name.as_str();

        let mut request = HttpRequest::new(Method::POST, url);
        request.set_header("Accept", "application/json")?;
        self.authenticate_client(&mut request, &mut form)?;
        request.set_form_params(&form);

        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;
        if let Some(point) = hooks.request {
            self.pipeline.apply_request(point, &mut request)?;
        }

        let mut response = self.send(request, step, None).await?;
        self.pipeline.apply_response(hooks.response, &mut response)?;

        parse_token_response(provider, step, &response)
    }

    fn authenticate_client(
        &self,
        request: &mut HttpRequest,
        form: &mut Vec<(String, String)>,
    ) -> Result<()> {
        let client_id = &self.metadata.client_id;
        match self.metadata.client_kwargs.token_endpoint_auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => {
                let credentials = format!(
                    "{}:{}",
                    form_encode(client_id),
                    form_encode(&self.metadata.client_secret)
                );
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                request.set_header("Authorization", &format!("Basic {encoded}"))?;
            }
            TokenEndpointAuthMethod::ClientSecretPost => {
                form.push(("client_id".to_string(), client_id.clone()));
                form.push((
                    "client_secret".to_string(),
                    self.metadata.client_secret.clone(),
                ));
            }
            TokenEndpointAuthMethod::None => {
                form.push(("client_id".to_string(), client_id.clone()));
            }
        }
        Ok(())
    }

    async fn send_protected(
        &self,
        mut request: HttpRequest,
        token: &OAuth2Token,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;
        self.attach_token(&mut request, token)?;
        self.pipeline
            .apply_request(ExtensionPoint::ProtectedRequest, &mut request)?;
        self.send(request, FlowStep::ProtectedRequest, timeout).await
    }

    async fn send(
        &self,
        request: HttpRequest,
        step: FlowStep,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        http::send(
            &self.http,
            request,
            CallContext {
                provider: &self.metadata.name,
                step,
                timeout: timeout.unwrap_or_else(|| self.metadata.timeout()),
            },
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parses a token endpoint response.
///
/// Non-2xx responses become [`AuthloomError::TokenEndpoint`] carrying the
/// provider's `error` / `error_description` when the body is JSON.
fn parse_token_response(
    provider: &str,
    step: FlowStep,
    response: &HttpResponse,
) -> Result<OAuth2Token> {
    if !response.is_success() {
        return Err(endpoint_error(provider, step, response).into());
    }
    OAuth2Token::from_response_body(provider, step, response.status.as_u16(), &response.body)
}

fn endpoint_error(provider: &str, step: FlowStep, response: &HttpResponse) -> AuthloomError {
    let body: Option<serde_json::Value> = serde_json::from_slice(&response.body).ok();
    let field = |name: &str| {
        body.as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let error = field("error");
    let description = field("error_description").or_else(|| {
        let excerpt = response.excerpt();
        (error.is_none() && !excerpt.is_empty()).then_some(excerpt)
    });

    AuthloomError::TokenEndpoint {
        provider: provider.to_string(),
        step,
        status: Some(response.status.as_u16()),
        error,
        description,
    }
}

/// `application/x-www-form-urlencoded` encoding of a Basic credential part
/// (RFC 6749 section 2.3.1).
fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::store::{MemoryStateStore, MemoryTokenStore};

    fn engine_with(configure: impl FnOnce(&mut ProviderConfig)) -> (OAuth2Engine, Arc<MemoryStateStore>) {
        let mut config = ProviderConfig {
            name: "example".to_string(),
            client_id: "client id".to_string(),
            client_secret: "s3cr:t".to_string(),
            authorize_url: Some("https://auth.example.test/authorize".to_string()),
            access_token_url: Some("https://auth.example.test/token".to_string()),
            ..Default::default()
        };
        configure(&mut config);
        let states = Arc::new(MemoryStateStore::new());
        let tokens = Arc::new(MemoryTokenStore::new());
        let engine = OAuth2Engine::new(
            Arc::new(ProviderMetadata::from_config(&config).unwrap()),
            Arc::new(reqwest::Client::new()),
            Arc::new(CompliancePipeline::new()),
            states.clone(),
            tokens.clone(),
            tokens,
        )
        .unwrap();
        (engine, states)
    }

    fn query_map(url: &Url) -> std::collections::HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn bearer(value: &str) -> OAuth2Token {
        OAuth2Token {
            access_token: value.to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_authorize_redirect_builds_url_and_stores_state() {
        let (engine, states) = engine_with(|c| c.client_kwargs.scope = Some("read".to_string()));
        let redirect = engine
            .authorize_redirect(
                "https://app.test/cb",
                &AuthorizeOptions::new().param("prompt", "consent"),
            )
            .await
            .unwrap();

        let query = query_map(&redirect.url);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client id");
        assert_eq!(query["redirect_uri"], "https://app.test/cb");
        assert_eq!(query["scope"], "read");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["state"], redirect.correlation_id.as_str());
        assert!(!query.contains_key("code_challenge"), "PKCE is off by default");
        assert!(!query.contains_key("nonce"), "nonce only for openid scope");
        assert_eq!(states.len(), 1, "pending authorization must be stored");
    }

    #[tokio::test]
    async fn test_authorize_redirect_with_pkce_and_openid() {
        let (engine, _) = engine_with(|c| {
            c.client_kwargs.code_challenge_method = Some(pkce::CodeChallengeMethod::S256)
        });
        let redirect = engine
            .authorize_redirect(
                "https://app.test/cb",
                &AuthorizeOptions::new().scope("openid email"),
            )
            .await
            .unwrap();

        let query = query_map(&redirect.url);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["code_challenge"].len(), 43);
        assert!(query.contains_key("nonce"));
        assert_eq!(query["scope"], "openid email");
    }

    #[tokio::test]
    async fn test_authorize_redirect_states_are_unique() {
        let (engine, states) = engine_with(|_| {});
        let a = engine
            .authorize_redirect("https://app.test/cb", &AuthorizeOptions::new())
            .await
            .unwrap();
        let b = engine
            .authorize_redirect("https://app.test/cb", &AuthorizeOptions::new())
            .await
            .unwrap();
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(states.len(), 2);
    }

    #[tokio::test]
    async fn test_callback_error_is_surfaced_and_state_consumed() {
        let (engine, states) = engine_with(|_| {});
        let redirect = engine
            .authorize_redirect("https://app.test/cb", &AuthorizeOptions::new())
            .await
            .unwrap();

        let params = CallbackParams::from_pairs([
            ("error", "access_denied"),
            ("error_description", "user said no"),
            ("state", redirect.correlation_id.as_str()),
        ]);
        let err = engine.authorize_access_token(&params).await.unwrap_err();
        match err.downcast_ref::<AuthloomError>() {
            Some(AuthloomError::OAuthCallback {
                error, description, ..
            }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("user said no"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(states.is_empty(), "rejected callback must consume the state");
    }

    #[tokio::test]
    async fn test_unknown_state_is_mismatch() {
        let (engine, _) = engine_with(|_| {});
        let params = CallbackParams::from_pairs([("code", "c"), ("state", "forged")]);
        let err = engine.authorize_access_token(&params).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::MismatchingState { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_code_is_mismatch() {
        let (engine, _) = engine_with(|_| {});
        let params = CallbackParams::from_pairs([("state", "s")]);
        let err = engine.authorize_access_token(&params).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::MismatchingState { .. })
        ));
    }

    #[test]
    fn test_client_secret_basic_encodes_credentials() {
        let (engine, _) = engine_with(|_| {});
        let mut request = HttpRequest::new(
            Method::POST,
            Url::parse("https://auth.example.test/token").unwrap(),
        );
        let mut form = Vec::new();
        engine.authenticate_client(&mut request, &mut form).unwrap();

        let expected = base64::engine::general_purpose::STANDARD.encode("client+id:s3cr%3At");
        assert_eq!(
            request.headers["authorization"].to_str().unwrap(),
            format!("Basic {expected}")
        );
        assert!(form.is_empty(), "basic auth must not leak into the body");
    }

    #[test]
    fn test_client_secret_post_puts_credentials_in_body() {
        let (engine, _) = engine_with(|c| {
            c.client_kwargs.token_endpoint_auth_method = TokenEndpointAuthMethod::ClientSecretPost
        });
        let mut request = HttpRequest::new(
            Method::POST,
            Url::parse("https://auth.example.test/token").unwrap(),
        );
        let mut form = Vec::new();
        engine.authenticate_client(&mut request, &mut form).unwrap();

        assert!(request.headers.get("authorization").is_none());
        assert!(form.contains(&("client_id".to_string(), "client id".to_string())));
        assert!(form.contains(&("client_secret".to_string(), "s3cr:t".to_string())));
    }

    #[test]
    fn test_auth_method_none_sends_only_client_id() {
        let (engine, _) = engine_with(|c| {
            c.client_secret = String::new();
            c.client_kwargs.token_endpoint_auth_method = TokenEndpointAuthMethod::None;
        });
        let mut request = HttpRequest::new(
            Method::POST,
            Url::parse("https://auth.example.test/token").unwrap(),
        );
        let mut form = Vec::new();
        engine.authenticate_client(&mut request, &mut form).unwrap();

        assert!(request.headers.get("authorization").is_none());
        assert_eq!(form, vec![("client_id".to_string(), "client id".to_string())]);
    }

    #[test]
    fn test_attach_token_placements() {
        let url = Url::parse("https://api.example.test/me?x=1").unwrap();

        let (header, _) = engine_with(|_| {});
        let mut req = HttpRequest::new(Method::GET, url.clone());
        header.attach_token(&mut req, &bearer("abc")).unwrap();
        assert_eq!(req.headers["authorization"].to_str().unwrap(), "Bearer abc");

        let (uri, _) = engine_with(|c| c.client_kwargs.token_placement = TokenPlacement::Uri);
        let mut req = HttpRequest::new(Method::GET, url.clone());
        uri.attach_token(&mut req, &bearer("abc")).unwrap();
        assert_eq!(req.url.query(), Some("x=1&access_token=abc"));

        let (body, _) = engine_with(|c| c.client_kwargs.token_placement = TokenPlacement::Body);
        let mut req = HttpRequest::new(Method::POST, url).with_form(&[("a", "b")]);
        body.attach_token(&mut req, &bearer("abc")).unwrap();
        assert_eq!(
            req.form_params(),
            vec![
                ("a".to_string(), "b".to_string()),
                ("access_token".to_string(), "abc".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_revoke_without_url_is_config_error() {
        let (engine, _) = engine_with(|_| {});
        let err = engine.revoke_token("tok", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_token_expired() {
        let (engine, _) = engine_with(|_| {});
        let err = engine
            .refresh_token(&Identity::new("alice"), &bearer("old"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::TokenExpired { .. })
        ));
    }

    #[test]
    fn test_parse_token_response_non_2xx_carries_error_code() {
        let response = HttpResponse::new(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"code expired"}"#,
        );
        let err = parse_token_response("p", FlowStep::AccessToken, &response).unwrap_err();
        match err.downcast_ref::<AuthloomError>() {
            Some(AuthloomError::TokenEndpoint {
                status,
                error,
                description,
                ..
            }) => {
                assert_eq!(*status, Some(400));
                assert_eq!(error.as_deref(), Some("invalid_grant"));
                assert_eq!(description.as_deref(), Some("code expired"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_token_response_non_json_error_body() {
        let response = HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "upstream down");
        let err = parse_token_response("p", FlowStep::Refresh, &response).unwrap_err();
        match err.downcast_ref::<AuthloomError>() {
            Some(AuthloomError::TokenEndpoint {
                error, description, ..
            }) => {
                assert!(error.is_none());
                assert_eq!(description.as_deref(), Some("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_engine_rejects_oauth1_provider() {
        let config = ProviderConfig {
            name: "oauth1".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            request_token_url: Some("https://ex.test/request".to_string()),
            authorize_url: Some("https://ex.test/authorize".to_string()),
            access_token_url: Some("https://ex.test/token".to_string()),
            ..Default::default()
        };
        let tokens = Arc::new(MemoryTokenStore::new());
        let result = OAuth2Engine::new(
            Arc::new(ProviderMetadata::from_config(&config).unwrap()),
            Arc::new(reqwest::Client::new()),
            Arc::new(CompliancePipeline::new()),
            Arc::new(MemoryStateStore::new()),
            tokens.clone(),
            tokens,
        );
        assert!(result.is_err());
    }
}
