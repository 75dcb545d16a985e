//! OAuth 2.0 flow engine
//!
//! This module provides:
//!
//! - [`pkce`] -- PKCE verifier/challenge generation (RFC 7636)
//! - [`discovery`] -- authorization server metadata discovery (RFC 8414 /
//!   OpenID Connect Discovery 1.0)
//! - [`flow`] -- [`OAuth2Engine`]: authorization code grant, client
//!   credentials grant, refresh, revocation and bearer-authenticated calls
//! - `refresh` -- per-identity single-flight coordination of refresh grants

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod discovery;
pub mod flow;
pub mod pkce;
mod refresh;

pub use flow::OAuth2Engine;
pub use pkce::CodeChallengeMethod;

/// How the client authenticates at the token endpoint (RFC 6749 section
/// 2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with `client_id:client_secret`.
    #[default]
    ClientSecretBasic,
    /// `client_id` and `client_secret` in the form body.
    ClientSecretPost,
    /// Public client: only `client_id` in the form body.
    None,
}

impl TokenEndpointAuthMethod {
    /// Returns the registered method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEndpointAuthMethod::ClientSecretBasic => "client_secret_basic",
            TokenEndpointAuthMethod::ClientSecretPost => "client_secret_post",
            TokenEndpointAuthMethod::None => "none",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bearer token is placed on API requests (RFC 6750 section 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`
    #[default]
    Header,
    /// `access_token` query parameter
    Uri,
    /// `access_token` form body parameter
    Body,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_serde_names() {
        let method: TokenEndpointAuthMethod =
            serde_json::from_str("\"client_secret_post\"").unwrap();
        assert_eq!(method, TokenEndpointAuthMethod::ClientSecretPost);
        assert_eq!(
            serde_json::to_string(&TokenEndpointAuthMethod::None).unwrap(),
            "\"none\""
        );
        assert_eq!(
            TokenEndpointAuthMethod::default().to_string(),
            "client_secret_basic"
        );
    }

    #[test]
    fn test_token_placement_serde_names() {
        let placement: TokenPlacement = serde_json::from_str("\"uri\"").unwrap();
        assert_eq!(placement, TokenPlacement::Uri);
        assert_eq!(TokenPlacement::default(), TokenPlacement::Header);
    }
}
