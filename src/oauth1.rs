//! OAuth 1.0a flow engine (RFC 5849)
//!
//! # Flow overview
//!
//! 1. [`OAuth1Engine::authorize_redirect`] obtains temporary credentials from
//!    the request-token endpoint, parks them in the state store under the
//!    temporary `oauth_token`, and returns the authorization URL.
//! 2. The user approves access at the provider, which redirects back with
//!    `oauth_token` and `oauth_verifier`.
//! 3. [`OAuth1Engine::authorize_access_token`] consumes the parked
//!    credentials and exchanges the verifier for token credentials.
//! 4. [`OAuth1Engine::request`] signs every API call with the token
//!    credentials.
//!
//! # References
//!
//! - RFC 5849 <https://www.rfc-editor.org/rfc/rfc5849>

use std::sync::Arc;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng as _;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::compliance::{CompliancePipeline, ExtensionPoint};
use crate::config::ProviderMetadata;
use crate::error::{AuthloomError, FlowStep, Result};
use crate::http::{self, CallContext, HttpRequest, HttpResponse};
use crate::redirect::{AuthorizationRedirect, AuthorizeOptions, CallbackParams};
use crate::signer::{percent_encode, signature_base_string, Signer};
use crate::store::state::{put_json, take_json};
use crate::store::{FlowCorrelationId, StateStore};
use crate::token::OAuth1Token;

/// Length of the random `oauth_nonce`.
const NONCE_LEN: usize = 32;

// ---------------------------------------------------------------------------
// SignaturePlacement
// ---------------------------------------------------------------------------

/// Where the protocol parameters and signature travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePlacement {
    /// `Authorization: OAuth ...` header
    #[default]
    Header,
    /// Request URL query string
    Query,
    /// Form-encoded request body
    Body,
}

/// Temporary credentials parked between redirect and callback.
#[derive(Debug, Serialize, Deserialize)]
struct TemporaryCredentials {
    token: String,
    token_secret: String,
}

// ---------------------------------------------------------------------------
// OAuth1Engine
// ---------------------------------------------------------------------------

/// Drives the three-legged OAuth 1.0a handshake and signs API requests for
/// one provider.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use authloom::compliance::CompliancePipeline;
/// use authloom::config::{ProviderConfig, ProviderMetadata};
/// use authloom::oauth1::OAuth1Engine;
/// use authloom::redirect::AuthorizeOptions;
/// use authloom::store::MemoryStateStore;
///
/// # async fn example() -> authloom::error::Result<()> {
/// let config = ProviderConfig {
///     name: "twitter".to_string(),
///     client_id: "consumer-key".to_string(),
///     client_secret: "consumer-secret".to_string(),
///     request_token_url: Some("https://api.twitter.com/oauth/request_token".to_string()),
///     authorize_url: Some("https://api.twitter.com/oauth/authenticate".to_string()),
///     access_token_url: Some("https://api.twitter.com/oauth/access_token".to_string()),
///     ..Default::default()
/// };
///
/// let engine = OAuth1Engine::new(
///     Arc::new(ProviderMetadata::from_config(&config)?),
///     Arc::new(reqwest::Client::new()),
///     Arc::new(CompliancePipeline::new()),
///     Arc::new(MemoryStateStore::new()),
/// )?;
///
/// let redirect = engine
///     .authorize_redirect("https://app.test/callback", &AuthorizeOptions::new())
///     .await?;
/// println!("send the user to {}", redirect.url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OAuth1Engine {
    metadata: Arc<ProviderMetadata>,
    signer: Signer,
    http: Arc<reqwest::Client>,
    pipeline: Arc<CompliancePipeline>,
    state_store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for OAuth1Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Engine")
            .field("provider", &self.metadata.name)
            .field("signer", &self.signer)
            .finish()
    }
}

impl OAuth1Engine {
    /// Creates an engine for `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when the provider has no
    /// `request_token_url`, and
    /// [`AuthloomError::InvalidSignatureConfiguration`] when the signer
    /// cannot be built.
    pub fn new(
        metadata: Arc<ProviderMetadata>,
        http: Arc<reqwest::Client>,
        pipeline: Arc<CompliancePipeline>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        if !metadata.is_oauth1() {
            return Err(AuthloomError::Config(format!(
                "provider '{}' has no request_token_url and is not an OAuth 1.0a provider",
                metadata.name
            ))
            .into());
        }

        let signer = Signer::new(
            metadata.client_kwargs.signature_method,
            metadata.client_secret.clone(),
            metadata.rsa_key_pem.as_deref(),
        )?;

        Ok(Self {
            metadata,
            signer,
            http,
            pipeline,
            state_store,
        })
    }

    /// The provider this engine serves.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Obtains temporary credentials and builds the authorization redirect.
    ///
    /// `options.extra_params` are appended to the authorization URL after
    /// `oauth_token`.  OAuth 1.0a has no scope parameter, so
    /// `options.scope` is ignored.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::TemporaryCredential`] on a non-2xx response, a
    ///   response without `oauth_token` / `oauth_token_secret`, or an
    ///   unconfirmed callback
    /// - [`AuthloomError::Transport`] / [`AuthloomError::Timeout`] on
    ///   network failure
    pub async fn authorize_redirect(
        &self,
        callback_uri: &str,
        options: &AuthorizeOptions,
    ) -> Result<AuthorizationRedirect> {
        let provider = self.metadata.name.as_str();
        let request_token_url = self.metadata.request_token_url.clone().ok_or_else(|| {
            AuthloomError::Config(format!("provider '{provider}' has no request_token_url"))
        })?;

        let mut request = HttpRequest::new(Method::POST, request_token_url);
        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;
        self.sign(&mut request, None, &[("oauth_callback", callback_uri)])?;

        let response = self.send(request, FlowStep::RequestToken, None).await?;

        let temporary_error = |message: String| AuthloomError::TemporaryCredential {
            provider: provider.to_string(),
            status: Some(response.status.as_u16()),
            message,
        };

        if !response.is_success() {
            return Err(temporary_error(response.excerpt()).into());
        }

        let fields = response.form_params();
        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let token = field("oauth_token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| temporary_error("response is missing oauth_token".to_string()))?;
        let token_secret = field("oauth_token_secret").ok_or_else(|| {
            temporary_error("response is missing oauth_token_secret".to_string())
        })?;
        if let Some(confirmed) = field("oauth_callback_confirmed") {
            if confirmed != "true" {
                return Err(temporary_error(format!(
                    "oauth_callback_confirmed is '{confirmed}'"
                ))
                .into());
            }
        }

        let correlation_id = FlowCorrelationId::new(token.clone());
        put_json(
            self.state_store.as_ref(),
            &correlation_id.storage_key(provider),
            &TemporaryCredentials {
                token: token.clone(),
                token_secret,
            },
            self.metadata.state_ttl,
        )
        .await?;

        let mut url = self.metadata.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("oauth_token", &token);
            for (k, v) in &options.extra_params {
                query.append_pair(k, v);
            }
        }

        tracing::debug!(provider, "obtained temporary credentials");

        Ok(AuthorizationRedirect {
            url,
            correlation_id,
        })
    }

    /// Exchanges the callback's `oauth_verifier` for token credentials.
    ///
    /// The parked temporary credentials are consumed before the exchange, so
    /// a callback can never be replayed, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::OAuthCallback`] when the provider reports `denied`
    ///   or `error`; the temporary credentials named by the callback are
    ///   discarded either way
    /// - [`AuthloomError::MismatchingState`] when `oauth_token` or
    ///   `oauth_verifier` is missing, or the temporary credentials are
    ///   unknown, expired or already consumed
    /// - [`AuthloomError::TokenEndpoint`] on a non-2xx or malformed response
    pub async fn authorize_access_token(&self, params: &CallbackParams) -> Result<OAuth1Token> {
        let provider = self.metadata.name.as_str();

        if let Some(denied) = params.get("denied") {
            let key = FlowCorrelationId::new(denied).storage_key(provider);
            self.state_store.delete(&key).await?;
            tracing::warn!(provider, "authorization denied by user");
            return Err(AuthloomError::OAuthCallback {
                provider: provider.to_string(),
                error: "access_denied".to_string(),
                description: None,
                uri: None,
            }
            .into());
        }

        if let Some(error) = params.get("error") {
            if let Some(token) = params.get("oauth_token") {
                let key = FlowCorrelationId::new(token).storage_key(provider);
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

        let token = params
            .get("oauth_token")
            .ok_or_else(|| mismatch("callback is missing oauth_token"))?;
        let verifier = params
            .get("oauth_verifier")
            .ok_or_else(|| mismatch("callback is missing oauth_verifier"))?;

        let key = FlowCorrelationId::new(token).storage_key(provider);
        let temporary: TemporaryCredentials = take_json(self.state_store.as_ref(), &key)
            .await?
            .ok_or_else(|| mismatch("oauth_token is unknown, expired or already used"))?;

        let mut request = HttpRequest::new(Method::POST, self.metadata.access_token_url.clone());
        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;
        self.sign(
            &mut request,
            Some((&temporary.token, &temporary.token_secret)),
            &[("oauth_verifier", verifier)],
        )?;

        let mut response = self.send(request, FlowStep::AccessToken, None).await?;
        self.pipeline
            .apply_response(ExtensionPoint::AccessTokenResponse, &mut response)?;

        let token = parse_token_credentials(provider, &response)?;
        tracing::info!(provider, "obtained OAuth 1.0a token credentials");
        Ok(token)
    }

    /// Signs `request` with `token` using a fresh nonce and the current
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when body placement is configured
    /// for a request whose body is not form-encoded.
    pub fn sign_request(&self, request: &mut HttpRequest, token: &OAuth1Token) -> Result<()> {
        self.sign(request, Some((&token.token, &token.token_secret)), &[])
    }

    /// Runs the `request` and `protected_request` hooks, signs `request`
    /// with `token` and sends it.
    ///
    /// Non-2xx API responses are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns hook, signing, transport and timeout errors.
    pub async fn request(
        &self,
        mut request: HttpRequest,
        token: &OAuth1Token,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        self.pipeline
            .apply_request(ExtensionPoint::Request, &mut request)?;
        self.pipeline
            .apply_request(ExtensionPoint::ProtectedRequest, &mut request)?;
        self.sign_request(&mut request, token)?;
        self.send(request, FlowStep::ProtectedRequest, timeout).await
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn sign(
        &self,
        request: &mut HttpRequest,
        credentials: Option<(&str, &str)>,
        extra: &[(&str, &str)],
    ) -> Result<()> {
        let nonce = generate_nonce();
        let timestamp = chrono::Utc::now().timestamp();
        self.sign_with(request, credentials, extra, &nonce, timestamp)
    }

    fn sign_with(
        &self,
        request: &mut HttpRequest,
        credentials: Option<(&str, &str)>,
        extra: &[(&str, &str)],
        nonce: &str,
        timestamp: i64,
    ) -> Result<()> {
        let mut protocol: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_string(), self.metadata.client_id.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                self.signer.method().as_str().to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some((token, _)) = credentials {
            protocol.push(("oauth_token".to_string(), token.to_string()));
        }
        protocol.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        protocol.sort();

        let placement = self.metadata.client_kwargs.signature_placement;
        if placement == SignaturePlacement::Body && request.body.is_some() && !request.is_form() {
            return Err(AuthloomError::Config(format!(
                "provider '{}': body signature placement requires a form-encoded body",
                self.metadata.name
            ))
            .into());
        }

        let mut params = request.query_params();
        params.extend(request.form_params());
        params.extend(protocol.iter().cloned());

        let base_string = signature_base_string(request.method.as_str(), &request.url, &params);
        let signature = self
            .signer
            .sign(&base_string, credentials.map(|(_, secret)| secret))?;
        protocol.push(("oauth_signature".to_string(), signature));

        match placement {
            SignaturePlacement::Header => {
                let header =
                    authorization_header(&protocol, self.metadata.client_kwargs.realm.as_deref());
                request.set_header("Authorization", &header)?;
            }
            SignaturePlacement::Query => {
                let mut query = request.url.query_pairs_mut();
                for (k, v) in &protocol {
                    query.append_pair(k, v);
                }
            }
            SignaturePlacement::Body => {
                let mut form = request.form_params();
                form.extend(protocol);
                request.set_form_params(&form);
            }
        }

        Ok(())
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

/// Builds the `Authorization: OAuth ...` header value.
///
/// # Examples
///
/// ```
/// use authloom::oauth1::authorization_header;
///
/// let header = authorization_header(
///     &[("oauth_token".to_string(), "a b".to_string())],
///     Some("Photos"),
/// );
/// assert_eq!(header, r#"OAuth realm="Photos", oauth_token="a%20b""#);
/// ```
pub fn authorization_header(params: &[(String, String)], realm: Option<&str>) -> String {
    let mut parts = Vec::with_capacity(params.len() + 1);
    if let Some(realm) = realm {
        parts.push(format!("realm=\"{}\"", realm.replace('"', "\\\"")));
    }
    parts.extend(
        params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v))),
    );
    format!("OAuth {}", parts.join(", "))
}

fn generate_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn parse_token_credentials(provider: &str, response: &HttpResponse) -> Result<OAuth1Token> {
    let endpoint_error = |description: String| AuthloomError::TokenEndpoint {
        provider: provider.to_string(),
        step: FlowStep::AccessToken,
        status: Some(response.status.as_u16()),
        error: None,
        description: Some(description),
    };

    if !response.is_success() {
        return Err(endpoint_error(response.excerpt()).into());
    }

    let fields = response.form_params();
    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let token = field("oauth_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| endpoint_error("response is missing oauth_token".to_string()))?;
    let token_secret = field("oauth_token_secret")
        .ok_or_else(|| endpoint_error("response is missing oauth_token_secret".to_string()))?;

    Ok(OAuth1Token {
        token,
        token_secret,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
