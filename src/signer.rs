//! OAuth 1.0a request signing primitives
//!
//! This module implements the signature base string construction of
//! RFC 5849 section 3.4.1 and the signature methods of section 3.4.2-3.4.4:
//!
//! - `HMAC-SHA1` (default) and `HMAC-SHA256`, keyed with
//!   `enc(client_secret)&enc(token_secret)`
//! - `RSA-SHA1`, PKCS#1 v1.5 over SHA-1 with the client's RSA private key
//! - `PLAINTEXT`, where the signature is the key itself
//!
//! Everything here is stateless and deterministic for fixed inputs; nonces
//! and timestamps are supplied by the caller.
//!
//! # References
//!
//! - RFC 5849 <https://www.rfc-editor.org/rfc/rfc5849>

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use url::Url;

use crate::error::{AuthloomError, Result};

/// RFC 3986 section 2.3 unreserved characters are the only ones left as-is.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// ---------------------------------------------------------------------------
// SignatureMethod
// ---------------------------------------------------------------------------

/// Supported OAuth 1.0a signature methods.
///
/// # Examples
///
/// ```
/// use authloom::signer::SignatureMethod;
///
/// let method: SignatureMethod = "RSA-SHA1".parse().unwrap();
/// assert_eq!(method, SignatureMethod::RsaSha1);
/// assert_eq!(method.to_string(), "RSA-SHA1");
/// assert!("MD5".parse::<SignatureMethod>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SignatureMethod {
    /// `HMAC-SHA1`
    #[default]
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    /// `HMAC-SHA256`
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
    /// `RSA-SHA1`
    #[serde(rename = "RSA-SHA1")]
    RsaSha1,
    /// `PLAINTEXT`
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
}

impl SignatureMethod {
    /// Returns the wire name sent as `oauth_signature_method`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
            SignatureMethod::HmacSha256 => "HMAC-SHA256",
            SignatureMethod::RsaSha1 => "RSA-SHA1",
            SignatureMethod::Plaintext => "PLAINTEXT",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureMethod {
    type Err = AuthloomError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HMAC-SHA1" => Ok(SignatureMethod::HmacSha1),
            "HMAC-SHA256" => Ok(SignatureMethod::HmacSha256),
            "RSA-SHA1" => Ok(SignatureMethod::RsaSha1),
            "PLAINTEXT" => Ok(SignatureMethod::Plaintext),
            _ => Err(AuthloomError::InvalidSignatureConfiguration {
                method: s.to_string(),
                message: "unsupported signature method".to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for SignatureMethod {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Base string construction
// ---------------------------------------------------------------------------

/// Percent-encodes a value per RFC 5849 section 3.6.
///
/// # Examples
///
/// ```
/// use authloom::signer::percent_encode;
///
/// assert_eq!(percent_encode("a b*c~d"), "a%20b%2Ac~d");
/// assert_eq!(percent_encode("ü"), "%C3%BC");
/// ```
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// Builds the base string URI: scheme and host in lower case, default port
/// omitted, no query or fragment.
///
/// # Examples
///
/// ```
/// use authloom::signer::normalize_base_url;
/// use url::Url;
///
/// let url = Url::parse("HTTP://Example.COM:80/r%20v/X?id=123#frag").unwrap();
/// assert_eq!(normalize_base_url(&url), "http://example.com/r%20v/X");
///
/// let url = Url::parse("https://www.example.net:8080/?q=1").unwrap();
/// assert_eq!(normalize_base_url(&url), "https://www.example.net:8080/");
/// ```
pub fn normalize_base_url(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}{}", url.path()),
        None => format!("{scheme}://{host}{}", url.path()),
    }
}

/// Normalizes request parameters per RFC 5849 section 3.4.1.3.2.
///
/// Names and values are encoded, sorted by name then value, and joined.
/// `oauth_signature` is excluded.
pub fn normalize_parameters(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "oauth_signature")
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the signature base string for a request.
///
/// `params` must already contain every query, form-body and `oauth_*`
/// protocol parameter that takes part in the signature.
///
/// # Examples
///
/// ```
/// use authloom::signer::signature_base_string;
/// use url::Url;
///
/// let url = Url::parse("https://api.example.com/status").unwrap();
/// let params = vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())];
/// assert_eq!(
///     signature_base_string("get", &url, &params),
///     "GET&https%3A%2F%2Fapi.example.com%2Fstatus&a%3D1%26b%3D2"
/// );
/// ```
pub fn signature_base_string(method: &str, url: &Url, params: &[(String, String)]) -> String {
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&normalize_base_url(url)),
        percent_encode(&normalize_parameters(params))
    )
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Signs signature base strings with a fixed method and client credentials.
///
/// # Examples
///
/// ```
/// use authloom::signer::{SignatureMethod, Signer};
///
/// let signer = Signer::new(SignatureMethod::HmacSha1, "kd94hf93k423kf44", None).unwrap();
/// let sig = signer.sign("GET&x&y", Some("pfkkdhi9sl3r4s00")).unwrap();
/// assert!(signer.verify("GET&x&y", Some("pfkkdhi9sl3r4s00"), &sig));
/// assert!(!signer.verify("GET&x&z", Some("pfkkdhi9sl3r4s00"), &sig));
/// ```
#[derive(Clone)]
pub struct Signer {
    method: SignatureMethod,
    client_secret: String,
    rsa_key: Option<SigningKey<Sha1>>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("method", &self.method)
            .field("has_rsa_key", &self.rsa_key.is_some())
            .finish()
    }
}

impl Signer {
    /// Creates a signer.
    ///
    /// `rsa_key_pem` is required for `RSA-SHA1` and accepts PKCS#8
    /// (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.  It is
    /// ignored by the other methods.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::InvalidSignatureConfiguration`] when
    /// `RSA-SHA1` is requested without a parseable private key.
    pub fn new(
        method: SignatureMethod,
        client_secret: impl Into<String>,
        rsa_key_pem: Option<&str>,
    ) -> Result<Self> {
        let rsa_key = match (method, rsa_key_pem) {
            (SignatureMethod::RsaSha1, Some(pem)) => Some(parse_rsa_key(pem)?),
            (SignatureMethod::RsaSha1, None) => {
                return Err(AuthloomError::InvalidSignatureConfiguration {
                    method: method.to_string(),
                    message: "RSA-SHA1 requires an RSA private key".to_string(),
                }
                .into())
            }
            _ => None,
        };

        Ok(Self {
            method,
            client_secret: client_secret.into(),
            rsa_key,
        })
    }

    /// The configured signature method.
    pub fn method(&self) -> SignatureMethod {
        self.method
    }

    /// Signs `base_string`.
    ///
    /// HMAC and RSA signatures are base64-encoded.  `PLAINTEXT` returns the
    /// signing key and ignores the base string.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::InvalidSignatureConfiguration`] when the HMAC
    /// key cannot be initialized.
    pub fn sign(&self, base_string: &str, token_secret: Option<&str>) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let key = self.signing_key(token_secret);

        let signature = match self.method {
            SignatureMethod::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
                    .map_err(|e| self.config_error(e.to_string()))?;
                mac.update(base_string.as_bytes());
                b64.encode(mac.finalize().into_bytes())
            }
            SignatureMethod::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| self.config_error(e.to_string()))?;
                mac.update(base_string.as_bytes());
                b64.encode(mac.finalize().into_bytes())
            }
            SignatureMethod::RsaSha1 => {
                let signing_key = self
                    .rsa_key
                    .as_ref()
                    .ok_or_else(|| self.config_error("missing RSA private key".to_string()))?;
                let signature: Signature = signing_key.sign(base_string.as_bytes());
                b64.encode(signature.to_bytes())
            }
            SignatureMethod::Plaintext => key,
        };

        Ok(signature)
    }

    /// Checks `signature` against `base_string`.
    ///
    /// HMAC comparisons are constant-time.
    pub fn verify(&self, base_string: &str, token_secret: Option<&str>, signature: &str) -> bool {
        let b64 = base64::engine::general_purpose::STANDARD;
        let key = self.signing_key(token_secret);

        match self.method {
            SignatureMethod::HmacSha1 => {
                let Ok(expected) = b64.decode(signature) else {
                    return false;
                };
                let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(key.as_bytes()) else {
                    return false;
                };
                mac.update(base_string.as_bytes());
                mac.verify_slice(&expected).is_ok()
            }
            SignatureMethod::HmacSha256 => {
                let Ok(expected) = b64.decode(signature) else {
                    return false;
                };
                let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key.as_bytes()) else {
                    return false;
                };
                mac.update(base_string.as_bytes());
                mac.verify_slice(&expected).is_ok()
            }
            SignatureMethod::RsaSha1 => {
                let Some(signing_key) = &self.rsa_key else {
                    return false;
                };
                let Ok(raw) = b64.decode(signature) else {
                    return false;
                };
                let Ok(signature) = Signature::try_from(raw.as_slice()) else {
                    return false;
                };
                let private: &RsaPrivateKey = signing_key.as_ref();
                let verifying_key = VerifyingKey::<Sha1>::new(private.to_public_key());
                verifying_key
                    .verify(base_string.as_bytes(), &signature)
                    .is_ok()
            }
            SignatureMethod::Plaintext => key == signature,
        }
    }

    fn signing_key(&self, token_secret: Option<&str>) -> String {
        format!(
            "{}&{}",
            percent_encode(&self.client_secret),
            percent_encode(token_secret.unwrap_or_default())
        )
    }

    fn config_error(&self, message: String) -> AuthloomError {
        AuthloomError::InvalidSignatureConfiguration {
            method: self.method.to_string(),
            message,
        }
    }
}

fn parse_rsa_key(pem: &str) -> Result<SigningKey<Sha1>> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthloomError::InvalidSignatureConfiguration {
            method: SignatureMethod::RsaSha1.to_string(),
            message: format!("invalid RSA private key: {e}"),
        })?;
    Ok(SigningKey::<Sha1>::new(key))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
