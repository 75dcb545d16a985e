//! Remote client facade
//!
//! [`RemoteClient`] binds one provider's metadata to the protocol engine it
//! speaks, so applications drive every provider through the same calls:
//!
//! - [`RemoteClient::authorize_redirect`] / [`RemoteClient::authorize_access_token`]
//!   for the interactive flow
//! - [`RemoteClient::request`] and the verb helpers for authenticated API
//!   calls
//!
//! Providers with a `request_token_url` speak OAuth 1.0a; all others speak
//! OAuth 2.0.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use url::Url;

use crate::compliance::CompliancePipeline;
use crate::config::ProviderMetadata;
use crate::error::{AuthloomError, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::oauth1::OAuth1Engine;
use crate::oauth2::OAuth2Engine;
use crate::redirect::{AuthorizationRedirect, AuthorizeOptions, CallbackParams};
use crate::store::{StateStore, TokenLoader, TokenSaver};
use crate::token::{Identity, OAuth2Token, Token};

// ---------------------------------------------------------------------------
// ApiRequest
// ---------------------------------------------------------------------------

/// Body of an API request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    /// `application/x-www-form-urlencoded` parameters.  Covered by OAuth 1.0a
    /// signatures.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(serde_json::Value),
    /// Raw bytes with an explicit content type.
    Raw {
        /// `Content-Type` header value
        content_type: String,
        /// Body bytes
        bytes: Bytes,
    },
}

/// An authenticated API call.
///
/// # Examples
///
/// ```
/// use authloom::client::ApiRequest;
///
/// let request = ApiRequest::get("user/repos", "alice")
///     .query("per_page", "50")
///     .header("Accept", "application/vnd.github+json");
/// assert_eq!(request.path(), "user/repos");
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    identity: Identity,
    token: Option<Token>,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<ApiBody>,
    timeout: Option<Duration>,
}

impl ApiRequest {
    /// Creates a request for `path` on behalf of `identity`.
    ///
    /// `path` is either absolute or relative to the provider's
    /// `api_base_url`.
    pub fn new(method: Method, path: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self {
            method,
            path: path.into(),
            identity: identity.into(),
            token: None,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// `GET` request.
    pub fn get(path: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self::new(Method::GET, path, identity)
    }

    /// `POST` request.
    pub fn post(path: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self::new(Method::POST, path, identity)
    }

    /// `PUT` request.
    pub fn put(path: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self::new(Method::PUT, path, identity)
    }

    /// `DELETE` request.
    pub fn delete(path: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self::new(Method::DELETE, path, identity)
    }

    /// Uses `token` instead of asking the token loader.
    pub fn token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Adds a header; overrides a default header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter; overrides a default parameter of the same
    /// name.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: ApiBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a form body.
    pub fn form<K: Into<String>, V: Into<String>>(
        self,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body(ApiBody::Form(
            params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Sets a JSON body.
    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(ApiBody::Json(value))
    }

    /// Overrides the provider's timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The request path as given.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The identity the call is made for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// The protocol engine behind a [`RemoteClient`].
#[derive(Debug, Clone)]
pub enum Engine {
    /// OAuth 1.0a
    OAuth1(OAuth1Engine),
    /// OAuth 2.0
    OAuth2(OAuth2Engine),
}

/// A registered provider.
///
/// Built by the [`Registry`](crate::registry::Registry); see
/// [`RegistryBuilder`](crate::registry::RegistryBuilder).
pub struct RemoteClient {
    metadata: Arc<ProviderMetadata>,
    engine: Engine,
    loader: Arc<dyn TokenLoader>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("name", &self.metadata.name)
            .field("engine", &self.engine)
            .finish()
    }
}

impl RemoteClient {
    /// Creates a client, selecting the engine from `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::InvalidSignatureConfiguration`] when an
    /// OAuth 1.0a signer cannot be built.
    pub fn new(
        metadata: Arc<ProviderMetadata>,
        http: Arc<reqwest::Client>,
        pipeline: Arc<CompliancePipeline>,
        state_store: Arc<dyn StateStore>,
        loader: Arc<dyn TokenLoader>,
        saver: Arc<dyn TokenSaver>,
    ) -> Result<Self> {
        let engine = if metadata.is_oauth1() {
            Engine::OAuth1(OAuth1Engine::new(
                Arc::clone(&metadata),
                http,
                pipeline,
                state_store,
            )?)
        } else {
            Engine::OAuth2(OAuth2Engine::new(
                Arc::clone(&metadata),
                http,
                pipeline,
                state_store,
                Arc::clone(&loader),
                saver,
            )?)
        };

        Ok(Self {
            metadata,
            engine,
            loader,
        })
    }

    /// The registered provider name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The resolved provider metadata.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// The protocol engine, for protocol-specific operations.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Builds the authorization redirect.
    ///
    /// # Errors
    ///
    /// See [`OAuth1Engine::authorize_redirect`] and
    /// [`OAuth2Engine::authorize_redirect`].
    pub async fn authorize_redirect(
        &self,
        redirect_uri: &str,
        options: &AuthorizeOptions,
    ) -> Result<AuthorizationRedirect> {
        match &self.engine {
            Engine::OAuth1(engine) => engine.authorize_redirect(redirect_uri, options).await,
            Engine::OAuth2(engine) => engine.authorize_redirect(redirect_uri, options).await,
        }
    }

    /// Completes the flow from the callback parameters.
    ///
    /// The returned token is not stored; persisting it is the caller's
    /// decision.
    ///
    /// # Errors
    ///
    /// See [`OAuth1Engine::authorize_access_token`] and
    /// [`OAuth2Engine::authorize_access_token`].
    pub async fn authorize_access_token(&self, params: &CallbackParams) -> Result<Token> {
        match &self.engine {
            Engine::OAuth1(engine) => engine.authorize_access_token(params).await.map(Token::OAuth1),
            Engine::OAuth2(engine) => engine.authorize_access_token(params).await.map(Token::OAuth2),
        }
    }

    /// Runs an OAuth 2.0 client-credentials grant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] for OAuth 1.0a providers.
    pub async fn client_credentials_token(&self, scope: Option<&str>) -> Result<Token> {
        let engine = self.oauth2("client credentials grant")?;
        engine.client_credentials_token(scope).await.map(Token::OAuth2)
    }

    /// Refreshes an OAuth 2.0 token for `identity` and hands it to the token
    /// saver.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] for OAuth 1.0a providers and
    /// [`AuthloomError::TokenExpired`] without a refresh token.
    pub async fn refresh_token(&self, identity: &Identity, token: &OAuth2Token) -> Result<Token> {
        let engine = self.oauth2("token refresh")?;
        engine.refresh_token(identity, token).await.map(Token::OAuth2)
    }

    /// Revokes an OAuth 2.0 token (RFC 7009).
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] for OAuth 1.0a providers or when no
    /// `revoke_url` is configured.
    pub async fn revoke_token(&self, token: &str, hint: Option<&str>) -> Result<()> {
        self.oauth2("token revocation")?
            .revoke_token(token, hint)
            .await
    }

    /// Sends an authenticated API call.
    ///
    /// The token is the one set on `request`, otherwise the one returned by
    /// the token loader for the request's identity.  Non-2xx API responses
    /// are returned, not turned into errors.
    ///
    /// # Errors
    ///
    /// - [`AuthloomError::MissingToken`] when no token can be resolved
    /// - [`AuthloomError::Config`] when the token belongs to the other
    ///   protocol, or a relative path is used without `api_base_url`
    /// - engine errors (refresh, transport, timeout)
    pub async fn request(&self, request: ApiRequest) -> Result<HttpResponse> {
        let token = self.resolve_token(&request).await?;
        let timeout = request.timeout;
        let identity = request.identity.clone();
        let http_request = self.build_request(request)?;

        match (&self.engine, token) {
            (Engine::OAuth1(engine), Token::OAuth1(token)) => {
                engine.request(http_request, &token, timeout).await
            }
            (Engine::OAuth2(engine), Token::OAuth2(token)) => {
                engine.request(http_request, &identity, token, timeout).await
            }
            (Engine::OAuth1(_), Token::OAuth2(_)) | (Engine::OAuth2(_), Token::OAuth1(_)) => {
                Err(AuthloomError::Config(format!(
                    "token protocol does not match provider '{}'",
                    self.name()
                ))
                .into())
            }
        }
    }

    /// `GET path` for `identity`.
    ///
    /// # Errors
    ///
    /// See [`RemoteClient::request`].
    pub async fn get(&self, path: &str, identity: impl Into<Identity>) -> Result<HttpResponse> {
        self.request(ApiRequest::get(path, identity)).await
    }

    /// `POST path` for `identity` with `body`.
    ///
    /// # Errors
    ///
    /// See [`RemoteClient::request`].
    pub async fn post(
        &self,
        path: &str,
        identity: impl Into<Identity>,
        body: ApiBody,
    ) -> Result<HttpResponse> {
        self.request(ApiRequest::post(path, identity).body(body))
            .await
    }

    /// `PUT path` for `identity` with `body`.
    ///
    /// # Errors
    ///
    /// See [`RemoteClient::request`].
    pub async fn put(
        &self,
        path: &str,
        identity: impl Into<Identity>,
        body: ApiBody,
    ) -> Result<HttpResponse> {
        self.request(ApiRequest::put(path, identity).body(body)).await
    }

    /// `DELETE path` for `identity`.
    ///
    /// # Errors
    ///
    /// See [`RemoteClient::request`].
    pub async fn delete(&self, path: &str, identity: impl Into<Identity>) -> Result<HttpResponse> {
        self.request(ApiRequest::delete(path, identity)).await
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn oauth2(&self, operation: &str) -> Result<&OAuth2Engine> {
        match &self.engine {
            Engine::OAuth2(engine) => Ok(engine),
            Engine::OAuth1(_) => Err(AuthloomError::Config(format!(
                "{operation} is not available for OAuth 1.0a provider '{}'",
                self.name()
            ))
            .into()),
        }
    }

    async fn resolve_token(&self, request: &ApiRequest) -> Result<Token> {
        if let Some(token) = &request.token {
            return Ok(token.clone());
        }
        self.loader
            .fetch_token(self.name(), &request.identity)
            .await?
            .ok_or_else(|| {
                AuthloomError::MissingToken {
                    provider: self.name().to_string(),
                    identity: request.identity.to_string(),
                }
                .into()
            })
    }

    fn build_request(&self, request: ApiRequest) -> Result<HttpRequest> {
        let kwargs = &self.metadata.client_kwargs;
        let mut url = self.resolve_url(&request.path)?;

        let overridden = |name: &str| request.query.iter().any(|(k, _)| k == name);
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in &kwargs.query {
                if !overridden(k) {
                    query.append_pair(k, v);
                }
            }
            for (k, v) in &request.query {
                query.append_pair(k, v);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut http_request = HttpRequest::new(request.method, url);
        for (name, value) in &kwargs.headers {
            http_request.set_header(name, value)?;
        }
        for (name, value) in &request.headers {
            http_request.set_header(name, value)?;
        }

        match request.body {
            None => {}
            Some(ApiBody::Form(params)) => http_request.set_form_params(&params),
            Some(ApiBody::Json(value)) => http_request = http_request.with_json(&value)?,
            Some(ApiBody::Raw {
                content_type,
                bytes,
            }) => {
                http_request.set_header("Content-Type", &content_type)?;
                http_request.body = Some(bytes);
            }
        }

        Ok(http_request)
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        let base = self.metadata.api_base_url.as_ref().ok_or_else(|| {
            AuthloomError::Config(format!(
                "provider '{}' has no api_base_url for relative path '{path}'",
                self.name()
            ))
        })?;
        base.join(path).map_err(|e| {
            AuthloomError::Config(format!("cannot join '{path}' onto {base}: {e}")).into()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::store::{MemoryStateStore, MemoryTokenStore, NoopTokenStore};

    fn client_with(configure: impl FnOnce(&mut ProviderConfig)) -> RemoteClient {
        let mut config = ProviderConfig {
            name: "example".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            authorize_url: Some("https://auth.example.test/authorize".to_string()),
            access_token_url: Some("https://auth.example.test/token".to_string()),
            api_base_url: Some("https://api.example.test/v1/".to_string()),
            ..Default::default()
        };
        configure(&mut config);
        RemoteClient::new(
            Arc::new(ProviderMetadata::from_config(&config).unwrap()),
            Arc::new(reqwest::Client::new()),
            Arc::new(CompliancePipeline::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::new(NoopTokenStore),
            Arc::new(NoopTokenStore),
        )
        .unwrap()
    }

    fn oauth1_config(config: &mut ProviderConfig) {
        config.request_token_url = Some("https://auth.example.test/request".to_string());
    }

    #[test]
    fn test_engine_selection() {
        assert!(matches!(client_with(|_| {}).engine(), Engine::OAuth2(_)));
        assert!(matches!(client_with(oauth1_config).engine(), Engine::OAuth1(_)));
    }

    #[test]
    fn test_relative_path_joins_api_base_url() {
        let client = client_with(|_| {});
        let req = client
            .build_request(ApiRequest::get("user/repos", "alice"))
            .unwrap();
        assert_eq!(req.url.as_str(), "https://api.example.test/v1/user/repos");
    }

    #[test]
    fn test_absolute_url_is_used_as_is() {
        let client = client_with(|_| {});
        let req = client
            .build_request(ApiRequest::get("https://other.test/x", "alice"))
            .unwrap();
        assert_eq!(req.url.as_str(), "https://other.test/x");
    }

    #[test]
    fn test_relative_path_without_base_is_config_error() {
        let client = client_with(|c| c.api_base_url = None);
        let err = client
            .build_request(ApiRequest::get("user", "alice"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Config(_))
        ));
    }

    #[test]
    fn test_client_kwargs_merge_with_per_call_precedence() {
        let client = client_with(|c| {
            c.client_kwargs
                .headers
                .insert("User-Agent".to_string(), "authloom".to_string());
            c.client_kwargs
                .headers
                .insert("Accept".to_string(), "text/plain".to_string());
            c.client_kwargs
                .query
                .insert("format".to_string(), "xml".to_string());
            c.client_kwargs
                .query
                .insert("lang".to_string(), "en".to_string());
        });

        let req = client
            .build_request(
                ApiRequest::get("items", "alice")
                    .header("Accept", "application/json")
                    .query("format", "json"),
            )
            .unwrap();

        assert_eq!(req.headers["accept"], "application/json");
        assert_eq!(req.headers["user-agent"], "authloom");
        let query = req.query_params();
        assert!(query.contains(&("lang".to_string(), "en".to_string())));
        assert!(query.contains(&("format".to_string(), "json".to_string())));
        assert!(!query.contains(&("format".to_string(), "xml".to_string())));
    }

    #[test]
    fn test_no_query_leaves_url_clean() {
        let client = client_with(|_| {});
        let req = client
            .build_request(ApiRequest::get("items", "alice"))
            .unwrap();
        assert_eq!(req.url.query(), None);
    }

    #[test]
    fn test_bodies() {
        let client = client_with(|_| {});

        let form = client
            .build_request(ApiRequest::post("items", "alice").form([("a", "1")]))
            .unwrap();
        assert!(form.is_form());
        assert_eq!(form.form_params(), vec![("a".to_string(), "1".to_string())]);

        let json = client
            .build_request(ApiRequest::post("items", "alice").json(serde_json::json!({"a": 1})))
            .unwrap();
        assert_eq!(json.headers["content-type"], "application/json");

        let raw = client
            .build_request(ApiRequest::put("items", "alice").body(ApiBody::Raw {
                content_type: "text/plain".to_string(),
                bytes: Bytes::from_static(b"hi"),
            }))
            .unwrap();
        assert_eq!(raw.headers["content-type"], "text/plain");
        assert_eq!(raw.body.as_deref(), Some(&b"hi"[..]));
    }

    #[tokio::test]
    async fn test_request_without_token_is_missing_token() {
        let client = client_with(|_| {});
        let err = client.get("user", "alice").await.unwrap_err();
        match err.downcast_ref::<AuthloomError>() {
            Some(AuthloomError::MissingToken { provider, identity }) => {
                assert_eq!(provider, "example");
                assert_eq!(identity, "alice");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_protocol_token_is_config_error() {
        let client = client_with(|_| {});
        let request = ApiRequest::get("user", "alice").token(crate::token::OAuth1Token {
            token: "t".to_string(),
            token_secret: "s".to_string(),
        });
        let err = client.request(request).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_token_loader_is_consulted() {
        let store = Arc::new(MemoryTokenStore::new());
        let config = ProviderConfig {
            name: "example".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            request_token_url: Some("https://auth.example.test/request".to_string()),
            authorize_url: Some("https://auth.example.test/authorize".to_string()),
            access_token_url: Some("https://auth.example.test/token".to_string()),
            ..Default::default()
        };
        let client = RemoteClient::new(
            Arc::new(ProviderMetadata::from_config(&config).unwrap()),
            Arc::new(reqwest::Client::new()),
            Arc::new(CompliancePipeline::new()),
            Arc::new(MemoryStateStore::new()),
            store.clone(),
            store.clone(),
        )
        .unwrap();

        let request = ApiRequest::get("https://api.example.test/me", "alice");
        assert!(client.resolve_token(&request).await.is_err());

        let token = Token::OAuth1(crate::token::OAuth1Token {
            token: "t".to_string(),
            token_secret: "s".to_string(),
        });
        store
            .insert("example", &Identity::new("alice"), token.clone())
            .unwrap();
        assert_eq!(client.resolve_token(&request).await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_oauth2_only_operations_rejected_for_oauth1() {
        let client = client_with(oauth1_config);
        let err = client.revoke_token("t", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Config(_))
        ));
        assert!(client.client_credentials_token(None).await.is_err());
    }
}
