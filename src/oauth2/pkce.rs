//! PKCE challenge generation (RFC 7636)
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the `code_verifier`.
//! 2. The client derives the `code_challenge` from it: base64url(SHA-256) for
//!    `S256`, the verifier itself for `plain`.
//! 3. The authorization request carries `code_challenge` and
//!    `code_challenge_method`.
//! 4. The token exchange request carries the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares it to
//!    the value sent in step 3, proving possession of the verifier.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthloomError, Result};

// ---------------------------------------------------------------------------
// CodeChallengeMethod
// ---------------------------------------------------------------------------

/// PKCE transformation applied to the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`.
    #[default]
    #[serde(rename = "S256")]
    S256,
    /// The challenge is the verifier.
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    /// Returns the wire name (`S256` or `plain`).
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = AuthloomError;

    /// Parses the wire name.  The comparison is case-sensitive as in
    /// RFC 7636.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(AuthloomError::Config(format!(
                "unsupported code_challenge_method '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE verifier together with its derived challenge.
///
/// # Examples
///
/// ```
/// use authloom::oauth2::pkce::{generate, CodeChallengeMethod};
///
/// let pkce = generate(CodeChallengeMethod::S256);
/// assert_eq!(pkce.method, CodeChallengeMethod::S256);
/// assert_eq!(pkce.verifier.len(), 43);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    /// The code verifier: 32 random bytes, base64url without padding
    /// (43 characters).
    ///
    /// Sent to the token endpoint as `code_verifier`.
    pub verifier: String,

    /// The derived challenge, sent to the authorization endpoint as
    /// `code_challenge`.
    pub challenge: String,

    /// How `challenge` was derived.
    pub method: CodeChallengeMethod,
}

/// Generates a fresh verifier and derives its challenge with `method`.
pub fn generate(method: CodeChallengeMethod) -> PkceChallenge {
    let verifier = random_urlsafe(32);
    let challenge = derive_challenge(&verifier, method);
    PkceChallenge {
        verifier,
        challenge,
        method,
    }
}

/// Computes the challenge for `verifier`.
///
/// # Examples
///
/// ```
/// use authloom::oauth2::pkce::{derive_challenge, CodeChallengeMethod};
///
/// // RFC 7636 Appendix B
/// assert_eq!(
///     derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk", CodeChallengeMethod::S256),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
/// );
/// ```
pub fn derive_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
        }
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Returns `true` when `supported` (a discovery document's
/// `code_challenge_methods_supported`) lists `method`.
pub fn is_supported(supported: &[String], method: CodeChallengeMethod) -> bool {
    supported.iter().any(|m| m == method.as_str())
}

/// `len` cryptographically random bytes, base64url-encoded without padding.
///
/// Used for verifiers, `state` and `nonce` values.
pub(crate) fn random_urlsafe(len: usize) -> String {
    use rand::RngCore as _;

    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_correct_verifier_length() {
        let pkce = generate(CodeChallengeMethod::S256);
        assert_eq!(
            pkce.verifier.len(),
            43,
            "32 random bytes in base64url without padding produces 43 chars"
        );
    }

    #[test]
    fn test_s256_challenge_is_sha256_of_verifier() {
        let pkce = generate(CodeChallengeMethod::S256);
        let digest = Sha256::digest(pkce.verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());
        assert_eq!(
            pkce.challenge, expected,
            "challenge must equal base64url(SHA256(verifier))"
        );
    }

    #[test]
    fn test_plain_challenge_equals_verifier() {
        let pkce = generate(CodeChallengeMethod::Plain);
        assert_eq!(pkce.challenge, pkce.verifier);
        assert_eq!(pkce.method.as_str(), "plain");
    }

    #[test]
    fn test_generate_produces_unique_verifiers() {
        let a = generate(CodeChallengeMethod::S256);
        let b = generate(CodeChallengeMethod::S256);
        assert_ne!(
            a.verifier, b.verifier,
            "successive calls must produce distinct verifiers"
        );
    }

    #[test]
    fn test_verifier_uses_url_safe_base64_no_padding() {
        let pkce = generate(CodeChallengeMethod::S256);
        assert!(
            pkce.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must only contain base64url characters, got: {}",
            pkce.verifier
        );
        assert!(!pkce.challenge.contains('='), "challenge must not be padded");
    }

    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        assert_eq!(
            derive_challenge(
                "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
                CodeChallengeMethod::S256
            ),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
            "S256 challenge must match RFC 7636 Appendix B test vector"
        );
    }

    #[test]
    fn test_method_parsing_is_case_sensitive() {
        assert_eq!(
            "S256".parse::<CodeChallengeMethod>().unwrap(),
            CodeChallengeMethod::S256
        );
        assert_eq!(
            "plain".parse::<CodeChallengeMethod>().unwrap(),
            CodeChallengeMethod::Plain
        );
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
    }

    #[test]
    fn test_is_supported() {
        let methods = vec!["plain".to_string(), "S256".to_string()];
        assert!(is_supported(&methods, CodeChallengeMethod::S256));
        assert!(!is_supported(&["plain".to_string()], CodeChallengeMethod::S256));
        assert!(!is_supported(&[], CodeChallengeMethod::Plain));
    }

    #[test]
    fn test_random_urlsafe_length() {
        assert_eq!(random_urlsafe(16).len(), 22);
    }
}
