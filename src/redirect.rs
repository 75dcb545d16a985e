//! Values exchanged across the redirect boundary
//!
//! [`AuthorizationRedirect`] leaves the engine when the user agent is sent to
//! the provider; [`CallbackParams`] comes back when the provider redirects to
//! the application's callback URI.  The host framework is responsible for
//! issuing the HTTP redirect and for extracting the callback query string.

use std::collections::BTreeMap;

use url::Url;

use crate::store::FlowCorrelationId;

/// Where to send the user agent, and the id that links the callback back to
/// this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    /// Fully-built authorization URL
    pub url: Url,
    /// `oauth_token` (OAuth 1.0a) or `state` (OAuth 2.0)
    pub correlation_id: FlowCorrelationId,
}

/// Per-call options for building an authorization redirect.
///
/// # Examples
///
/// ```
/// use authloom::redirect::AuthorizeOptions;
///
/// let options = AuthorizeOptions::new()
///     .scope("openid email")
///     .param("prompt", "consent");
/// assert_eq!(options.scope.as_deref(), Some("openid email"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeOptions {
    /// Scope override; falls back to `client_kwargs.scope`
    pub scope: Option<String>,
    /// Extra query parameters appended to the authorization URL
    pub extra_params: Vec<(String, String)>,
}

impl AuthorizeOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Appends an extra authorization URL parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((name.into(), value.into()));
        self
    }
}

/// Query parameters received on the callback URI.
///
/// # Examples
///
/// ```
/// use authloom::redirect::CallbackParams;
///
/// let params = CallbackParams::from_query("code=abc&state=xyz");
/// assert_eq!(params.get("code"), Some("abc"));
/// assert_eq!(params.get("missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams(BTreeMap<String, String>);

impl CallbackParams {
    /// Parses a raw (`application/x-www-form-urlencoded`) query string.
    ///
    /// A leading `?` is ignored.  When a name repeats, the first value wins.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Extracts the parameters of a full callback URL.
    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }

    /// Builds parameters from name/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.entry(k.into()).or_insert_with(|| v.into());
        }
        Self(map)
    }

    /// Returns a non-empty parameter value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
