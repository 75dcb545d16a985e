//! Error types for Authloom
//!
//! This module defines the error taxonomy shared by both protocol engines,
//! using `thiserror` for ergonomic error handling.  Every variant carries
//! enough structured detail (provider name, flow step, provider-returned
//! error code) for a caller to render a meaningful message or redirect to an
//! error page.
//!
//! Fallible functions return [`Result`], an `anyhow` alias.  Callers that
//! need to branch on the failure kind downcast to [`AuthloomError`]:
//!
//! ```
//! use authloom::error::{AuthloomError, FlowStep};
//!
//! let err: anyhow::Error = AuthloomError::MismatchingState {
//!     provider: "example".to_string(),
//!     step: FlowStep::Callback,
//!     message: "state not found".to_string(),
//! }
//! .into();
//!
//! assert!(matches!(
//!     err.downcast_ref::<AuthloomError>(),
//!     Some(AuthloomError::MismatchingState { .. })
//! ));
//! ```

use std::fmt;

use thiserror::Error;

/// The protocol step during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStep {
    /// OAuth 1.0a temporary credential request.
    RequestToken,
    /// Building the authorization redirect.
    Authorize,
    /// Processing the callback from the authorization endpoint.
    Callback,
    /// Exchanging an authorization artifact for an access token.
    AccessToken,
    /// Refresh-token grant.
    Refresh,
    /// Token revocation (RFC 7009).
    Revoke,
    /// Authenticated API call.
    ProtectedRequest,
    /// Authorization server metadata discovery.
    Discovery,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStep::RequestToken => "request_token",
            FlowStep::Authorize => "authorize",
            FlowStep::Callback => "callback",
            FlowStep::AccessToken => "access_token",
            FlowStep::Refresh => "refresh_token",
            FlowStep::Revoke => "revoke_token",
            FlowStep::ProtectedRequest => "protected_request",
            FlowStep::Discovery => "discovery",
        };
        f.write_str(name)
    }
}

fn describe(description: &Option<String>) -> String {
    match description {
        Some(d) => format!(" ({d})"),
        None => String::new(),
    }
}

fn error_code(error: &Option<String>) -> &str {
    error.as_deref().unwrap_or("invalid_response")
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" [HTTP {s}]"),
        None => String::new(),
    }
}

/// Main error type for Authloom operations
///
/// The type is `Clone` so that the outcome of a coalesced token refresh can
/// be handed to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthloomError {
    /// The OAuth 1.0a request-token step failed.
    #[error("Temporary credential error for provider '{provider}'{}: {message}", status_suffix(.status))]
    TemporaryCredential {
        /// Provider name
        provider: String,
        /// HTTP status returned by the request-token endpoint, if any
        status: Option<u16>,
        /// What went wrong
        message: String,
    },

    /// CSRF state or OAuth1 verifier mismatch, or a reused/expired
    /// correlation id.
    #[error("Mismatching state for provider '{provider}' during {step}: {message}")]
    MismatchingState {
        /// Provider name
        provider: String,
        /// Step at which the mismatch was detected
        step: FlowStep,
        /// What went wrong
        message: String,
    },

    /// The provider returned an explicit error on the callback.
    #[error("OAuth callback error from provider '{provider}': {error}{}", describe(.description))]
    OAuthCallback {
        /// Provider name
        provider: String,
        /// Provider error code (e.g. `access_denied`)
        error: String,
        /// Provider `error_description`, if any
        description: Option<String>,
        /// Provider `error_uri`, if any
        uri: Option<String>,
    },

    /// The access token expired and no usable refresh token is available.
    #[error("Access token for provider '{provider}' (identity '{identity}') expired and cannot be refreshed")]
    TokenExpired {
        /// Provider name
        provider: String,
        /// Identity whose token expired
        identity: String,
    },

    /// An authenticated call was attempted without a resolvable token.
    #[error("No token available for provider '{provider}' (identity '{identity}')")]
    MissingToken {
        /// Provider name
        provider: String,
        /// Identity the lookup was made for
        identity: String,
    },

    /// An unsupported or misconfigured signature method was requested.
    #[error("Invalid signature configuration for method '{method}': {message}")]
    InvalidSignatureConfiguration {
        /// The signature method name as requested
        method: String,
        /// What is wrong with it
        message: String,
    },

    /// A token endpoint rejected the request or returned an unusable body.
    #[error("Token endpoint error for provider '{provider}' during {step}{}: {}{}", status_suffix(.status), error_code(.error), describe(.description))]
    TokenEndpoint {
        /// Provider name
        provider: String,
        /// Step that issued the request
        step: FlowStep,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Provider error code, if any
        error: Option<String>,
        /// Provider error description or parse failure detail
        description: Option<String>,
    },

    /// A network-level failure.
    #[error("Transport error for provider '{provider}' during {step}: {message}")]
    Transport {
        /// Provider name
        provider: String,
        /// Step that issued the request
        step: FlowStep,
        /// Underlying failure
        message: String,
    },

    /// A network call exceeded its configured timeout.
    #[error("Request to provider '{provider}' timed out after {seconds}s during {step}")]
    Timeout {
        /// Provider name
        provider: String,
        /// Step that issued the request
        step: FlowStep,
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No provider is registered under the requested name.
    #[error("Provider not registered: {0}")]
    ProviderNotFound(String),

    /// Ephemeral state store or token store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON / YAML serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthloomError {
    /// Returns the provider name the error refers to, when it carries one.
    ///
    /// # Examples
    ///
    /// ```
    /// use authloom::error::AuthloomError;
    ///
    /// let err = AuthloomError::MissingToken {
    ///     provider: "github".to_string(),
    ///     identity: "user-1".to_string(),
    /// };
    /// assert_eq!(err.provider(), Some("github"));
    /// assert_eq!(AuthloomError::Config("x".to_string()).provider(), None);
    /// ```
    pub fn provider(&self) -> Option<&str> {
        match self {
            AuthloomError::TemporaryCredential { provider, .. }
            | AuthloomError::MismatchingState { provider, .. }
            | AuthloomError::OAuthCallback { provider, .. }
            | AuthloomError::TokenExpired { provider, .. }
            | AuthloomError::MissingToken { provider, .. }
            | AuthloomError::TokenEndpoint { provider, .. }
            | AuthloomError::Transport { provider, .. }
            | AuthloomError::Timeout { provider, .. } => Some(provider),
            AuthloomError::ProviderNotFound(name) => Some(name),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AuthloomError {
    fn from(e: serde_json::Error) -> Self {
        AuthloomError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for AuthloomError {
    fn from(e: serde_yaml::Error) -> Self {
        AuthloomError::Serialization(e.to_string())
    }
}

/// Result type alias for Authloom operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Recovers an [`AuthloomError`] from an `anyhow::Error`, wrapping foreign
/// errors as [`AuthloomError::Storage`].
pub(crate) fn into_authloom(err: anyhow::Error) -> AuthloomError {
    match err.downcast::<AuthloomError>() {
        Ok(e) => e,
        Err(other) => AuthloomError::Storage(format!("{other:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = AuthloomError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_mismatching_state_display_mentions_step() {
        let error = AuthloomError::MismatchingState {
            provider: "example".to_string(),
            step: FlowStep::Callback,
            message: "state not found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Mismatching state for provider 'example' during callback: state not found"
        );
    }

    #[test]
    fn test_callback_error_display_with_description() {
        let error = AuthloomError::OAuthCallback {
            provider: "example".to_string(),
            error: "access_denied".to_string(),
            description: Some("user declined".to_string()),
            uri: None,
        };
        assert_eq!(
            error.to_string(),
            "OAuth callback error from provider 'example': access_denied (user declined)"
        );
    }

    #[test]
    fn test_callback_error_display_without_description() {
        let error = AuthloomError::OAuthCallback {
            provider: "example".to_string(),
            error: "access_denied".to_string(),
            description: None,
            uri: None,
        };
        assert!(error.to_string().ends_with("access_denied"));
    }

    #[test]
    fn test_token_endpoint_display_includes_status_and_code() {
        let error = AuthloomError::TokenEndpoint {
            provider: "example".to_string(),
            step: FlowStep::Refresh,
            status: Some(400),
            error: Some("invalid_grant".to_string()),
            description: Some("refresh token revoked".to_string()),
        };
        let s = error.to_string();
        assert!(s.contains("[HTTP 400]"), "{s}");
        assert!(s.contains("invalid_grant"), "{s}");
        assert!(s.contains("refresh token revoked"), "{s}");
        assert!(s.contains("refresh_token"), "{s}");
    }

    #[test]
    fn test_token_endpoint_display_without_error_code() {
        let error = AuthloomError::TokenEndpoint {
            provider: "example".to_string(),
            step: FlowStep::AccessToken,
            status: None,
            error: None,
            description: None,
        };
        assert!(error.to_string().contains("invalid_response"));
    }

    #[test]
    fn test_temporary_credential_display() {
        let error = AuthloomError::TemporaryCredential {
            provider: "twitter".to_string(),
            status: Some(401),
            message: "missing oauth_token".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Temporary credential error for provider 'twitter' [HTTP 401]: missing oauth_token"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = AuthloomError::Timeout {
            provider: "example".to_string(),
            step: FlowStep::AccessToken,
            seconds: 5,
        };
        assert_eq!(
            error.to_string(),
            "Request to provider 'example' timed out after 5s during access_token"
        );
    }

    #[test]
    fn test_provider_accessor() {
        let error = AuthloomError::TokenExpired {
            provider: "google".to_string(),
            identity: "alice".to_string(),
        };
        assert_eq!(error.provider(), Some("google"));
        assert_eq!(
            AuthloomError::ProviderNotFound("gitlab".to_string()).provider(),
            Some("gitlab")
        );
        assert_eq!(AuthloomError::Storage("x".to_string()).provider(), None);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: AuthloomError = json_error.into();
        assert!(matches!(error, AuthloomError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: AuthloomError = yaml_error.into();
        assert!(matches!(error, AuthloomError::Serialization(_)));
    }

    #[test]
    fn test_into_authloom_preserves_variant() {
        let err: anyhow::Error = AuthloomError::Config("bad".to_string()).into();
        assert_eq!(
            into_authloom(err),
            AuthloomError::Config("bad".to_string())
        );
    }

    #[test]
    fn test_into_authloom_wraps_foreign_error() {
        let err = anyhow::anyhow!("disk full");
        assert!(matches!(into_authloom(err), AuthloomError::Storage(m) if m.contains("disk full")));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthloomError>();
    }
}
