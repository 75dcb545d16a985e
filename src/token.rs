//! Token data model
//!
//! Tokens are discriminated by protocol.  OAuth 1.0a tokens are a
//! `token` / `token_secret` pair that never expires on its own; OAuth 2.0
//! tokens are bearer credentials with an optional expiry and refresh token.
//!
//! All types serialize with `serde` so that a caller-owned token store can
//! persist them verbatim.  The engine itself never persists a [`Token`].

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthloomError, FlowStep, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque caller-supplied label (for example a user id) that namespaces
/// token store lookups.
///
/// The engine never interprets the value.
///
/// # Examples
///
/// ```
/// use authloom::token::Identity;
///
/// let id = Identity::from("user-42");
/// assert_eq!(id.as_str(), "user-42");
/// assert_eq!(id.to_string(), "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// OAuth1Token
// ---------------------------------------------------------------------------

/// OAuth 1.0a token credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth1Token {
    /// The `oauth_token` value.
    pub token: String,

    /// The `oauth_token_secret` value.
    pub token_secret: String,
}

// ---------------------------------------------------------------------------
// OAuth2Token
// ---------------------------------------------------------------------------

/// An OAuth 2.0 token as returned by a token endpoint.
///
/// `expires_at` is computed from the `expires_in` seconds in the token
/// response and serialized as Unix seconds so that it survives a round trip
/// through any JSON-backed store.
///
/// # Examples
///
/// ```
/// use authloom::token::OAuth2Token;
///
/// let token = OAuth2Token {
///     access_token: "abc".to_string(),
///     token_type: "bearer".to_string(),
///     refresh_token: None,
///     expires_at: None,
///     scope: None,
/// };
///
/// // A token with no expiry is never considered expired.
/// assert!(!token.is_expired(chrono::Duration::seconds(60)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// Refresh token that can be exchanged for a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// UTC timestamp at which the access token expires.
    ///
    /// `None` means the provider did not report a lifetime; such tokens are
    /// treated as non-expiring until a `401` says otherwise.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuth2Token {
    /// Returns `true` when the access token is expired or expires within
    /// `leeway`.
    ///
    /// # Examples
    ///
    /// ```
    /// use authloom::token::OAuth2Token;
    /// use chrono::{Duration, Utc};
    ///
    /// let mut token = OAuth2Token {
    ///     access_token: "tok".to_string(),
    ///     token_type: "Bearer".to_string(),
    ///     refresh_token: None,
    ///     expires_at: Some(Utc::now() - Duration::seconds(1)),
    ///     scope: None,
    /// };
    /// assert!(token.is_expired(Duration::zero()));
    ///
    /// token.expires_at = Some(Utc::now() + Duration::hours(1));
    /// assert!(!token.is_expired(Duration::seconds(60)));
    /// ```
    pub fn is_expired(&self, leeway: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => Utc::now() >= expires_at - leeway,
        }
    }

    /// Parses a token endpoint JSON body.
    ///
    /// `expires_in` may be a number or a numeric string (several providers
    /// send the latter); fractional values are rounded.  An `error` member turns the body into a
    /// [`AuthloomError::TokenEndpoint`] even when the HTTP status was 2xx.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::TokenEndpoint`] when the body is not JSON,
    /// carries an `error`, lacks `access_token` / `token_type`, or has a
    /// non-numeric `expires_in`.
    ///
    /// # Examples
    ///
    /// ```
    /// use authloom::error::FlowStep;
    /// use authloom::token::OAuth2Token;
    ///
    /// let body = br#"{"access_token":"abc","token_type":"bearer","expires_in":3600}"#;
    /// let token = OAuth2Token::from_response_body("example", FlowStep::AccessToken, 200, body).unwrap();
    /// assert_eq!(token.access_token, "abc");
    /// assert!(token.expires_at.is_some());
    /// ```
    pub fn from_response_body(
        provider: &str,
        step: FlowStep,
        status: u16,
        body: &[u8],
    ) -> Result<Self> {
        let invalid = |description: String| AuthloomError::TokenEndpoint {
            provider: provider.to_string(),
            step,
            status: Some(status),
            error: None,
            description: Some(description),
        };

        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| invalid(format!("token response is not valid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| invalid("token response is not a JSON object".to_string()))?;

        if let Some(error) = object.get("error").and_then(|v| v.as_str()) {
            return Err(AuthloomError::TokenEndpoint {
                provider: provider.to_string(),
                step,
                status: Some(status),
                error: Some(error.to_string()),
                description: object
                    .get("error_description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }
            .into());
        }

        let string_field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let access_token = string_field("access_token")
            .ok_or_else(|| invalid("token response is missing access_token".to_string()))?;
        let token_type = string_field("token_type")
            .ok_or_else(|| invalid("token response is missing token_type".to_string()))?;

        // Whole seconds only: stored tokens serialize `expires_at` as a Unix
        // timestamp.
        let field = |name: &str| object.get(name).filter(|v| !v.is_null());
        let expires_at = match (field("expires_in"), field("expires_at")) {
            (Some(expires_in), _) => {
                let secs = whole_seconds(expires_in).ok_or_else(|| {
                    invalid(format!("token response has an invalid expires_in: {expires_in}"))
                })?;
                Utc::now()
                    .timestamp()
                    .checked_add(secs)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))
            }
            (None, Some(at)) => whole_seconds(at).and_then(|ts| DateTime::from_timestamp(ts, 0)),
            (None, None) => None,
        };

        Ok(Self {
            access_token,
            token_type,
            refresh_token: string_field("refresh_token"),
            expires_at,
            scope: string_field("scope"),
        })
    }
}

/// Reads a JSON number or numeric string as whole seconds, rounding
/// fractional values.
fn whole_seconds(value: &serde_json::Value) -> Option<i64> {
    let float = |f: f64| f.is_finite().then(|| f.round() as i64);
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A protocol-discriminated token.
///
/// # Examples
///
/// ```
/// use authloom::token::{OAuth1Token, Token};
///
/// let token = Token::OAuth1(OAuth1Token {
///     token: "t".to_string(),
///     token_secret: "s".to_string(),
/// });
/// let json = serde_json::to_string(&token).unwrap();
/// let back: Token = serde_json::from_str(&json).unwrap();
/// assert_eq!(back, token);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum Token {
    /// OAuth 1.0a credentials.
    #[serde(rename = "oauth1")]
    OAuth1(OAuth1Token),
    /// OAuth 2.0 bearer token.
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Token),
}

impl Token {
    /// Returns the OAuth 1.0a credentials, if this is one.
    pub fn as_oauth1(&self) -> Option<&OAuth1Token> {
        match self {
            Token::OAuth1(t) => Some(t),
            Token::OAuth2(_) => None,
        }
    }

    /// Returns the OAuth 2.0 token, if this is one.
    pub fn as_oauth2(&self) -> Option<&OAuth2Token> {
        match self {
            Token::OAuth2(t) => Some(t),
            Token::OAuth1(_) => None,
        }
    }
}

impl From<OAuth1Token> for Token {
    fn from(token: OAuth1Token) -> Self {
        Token::OAuth1(token)
    }
}

impl From<OAuth2Token> for Token {
    fn from(token: OAuth2Token) -> Self {
        Token::OAuth2(token)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
