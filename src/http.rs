//! HTTP request/response values exchanged with providers
//!
//! Both protocol engines build an [`HttpRequest`], run it through the
//! compliance pipeline, and hand it to [`send`].  The raw [`HttpResponse`]
//! is exposed to response-side compliance hooks before any parsing takes
//! place.
//!
//! TLS and redirect policy belong to the caller-supplied
//! [`reqwest::Client`].

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{AuthloomError, FlowStep, Result};

/// MIME type of form-encoded bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ---------------------------------------------------------------------------
// HttpRequest
// ---------------------------------------------------------------------------

/// An outgoing HTTP request that compliance hooks may rewrite.
///
/// # Examples
///
/// ```
/// use authloom::http::HttpRequest;
/// use reqwest::Method;
/// use url::Url;
///
/// let request = HttpRequest::new(Method::POST, Url::parse("https://ex.test/token").unwrap())
///     .with_form(&[("grant_type", "client_credentials")]);
///
/// assert!(request.is_form());
/// assert_eq!(
///     request.form_params(),
///     vec![("grant_type".to_string(), "client_credentials".to_string())]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL including query string.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body, if any.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Replaces the body with form-encoded `params` and sets the content type.
    pub fn with_form<K: AsRef<str>, V: AsRef<str>>(mut self, params: &[(K, V)]) -> Self {
        self.set_form_params(params);
        self
    }

    /// Replaces the body with serialized JSON and sets the content type.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Serialization`] when `value` cannot be
    /// serialized.
    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(AuthloomError::from)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Inserts a header, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when the name or value is not a
    /// valid HTTP header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthloomError::Config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AuthloomError::Config(format!("invalid value for header '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Returns `true` when the body is declared as form-encoded.
    pub fn is_form(&self) -> bool {
        content_type_is(&self.headers, FORM_CONTENT_TYPE)
    }

    /// Decodes the body as form parameters.
    ///
    /// Returns an empty list when the body is absent or not form-encoded.
    pub fn form_params(&self) -> Vec<(String, String)> {
        match (&self.body, self.is_form()) {
            (Some(body), true) => url::form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replaces the body with form-encoded `params`.
    pub fn set_form_params<K: AsRef<str>, V: AsRef<str>>(&mut self, params: &[(K, V)]) {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        self.body = Some(Bytes::from(encoded));
    }

    /// Returns the query parameters of the request URL.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// HttpResponse
// ---------------------------------------------------------------------------

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response from its parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use authloom::http::HttpResponse;
    /// use reqwest::StatusCode;
    ///
    /// let resp = HttpResponse::new(StatusCode::OK, "oauth_token=t&oauth_token_secret=s");
    /// assert!(resp.is_success());
    /// assert_eq!(resp.form_params().len(), 2);
    /// ```
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns the body text bounded to a short excerpt, for error
    /// messages.
    pub fn excerpt(&self) -> String {
        const MAX_CHARS: usize = 200;
        let text = self.text();
        match text.char_indices().nth(MAX_CHARS) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text,
        }
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Serialization`] when the body is not valid
    /// JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| AuthloomError::from(e).into())
    }

    /// Decodes the body as form parameters (OAuth 1.0a responses).
    pub fn form_params(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

fn content_type_is(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case(expected)
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Identifies a network call for error reporting and timeout bounds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallContext<'a> {
    pub provider: &'a str,
    pub step: FlowStep,
    pub timeout: Duration,
}

/// Sends `request` and reads the full response body within
/// `ctx.timeout`.
///
/// A timeout is reported as [`AuthloomError::Timeout`]; it is never
/// retried.
pub(crate) async fn send(
    http: &reqwest::Client,
    request: HttpRequest,
    ctx: CallContext<'_>,
) -> Result<HttpResponse> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
    } = request;

    tracing::debug!(provider = ctx.provider, step = %ctx.step, %method, url = %redact(&url), "sending request");

    let mut builder = http.request(method, url).headers(headers);
    if let Some(body) = body {
        builder = builder.body(body);
    }

    let transport_err = |e: reqwest::Error| -> anyhow::Error {
        if e.is_timeout() {
            timeout_error(ctx).into()
        } else {
            AuthloomError::Transport {
                provider: ctx.provider.to_string(),
                step: ctx.step,
                message: e.to_string(),
            }
            .into()
        }
    };

    let call = async {
        let resp = builder.send().await.map_err(transport_err)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(transport_err)?;
        Ok::<_, anyhow::Error>(HttpResponse {
            status,
            headers,
            body,
        })
    };

    let response = tokio::time::timeout(ctx.timeout, call)
        .await
        .map_err(|_| timeout_error(ctx))??;

    tracing::debug!(provider = ctx.provider, step = %ctx.step, status = %response.status, "received response");
    Ok(response)
}

fn timeout_error(ctx: CallContext<'_>) -> AuthloomError {
    AuthloomError::Timeout {
        provider: ctx.provider.to_string(),
        step: ctx.step,
        seconds: ctx.timeout.as_secs(),
    }
}

/// Strips the query string so tokens carried in URLs never reach the logs.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest::new(
            Method::POST,
            Url::parse("https://api.example.com/resource?a=1&b=two").unwrap(),
        )
    }

    #[test]
    fn test_form_params_roundtrip() {
        let req = request().with_form(&[("name", "a b"), ("x", "&=")]);
        assert_eq!(
            req.form_params(),
            vec![
                ("name".to_string(), "a b".to_string()),
                ("x".to_string(), "&=".to_string()),
            ]
        );
    }

    #[test]
    fn test_form_params_empty_for_json_body() {
        let req = request()
            .with_json(&serde_json::json!({"a": 1}))
            .expect("serializable");
        assert!(!req.is_form());
        assert!(req.form_params().is_empty());
    }

    #[test]
    fn test_is_form_ignores_charset_parameter() {
        let mut req = request();
        req.set_header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
            .unwrap();
        assert!(req.is_form());
    }

    #[test]
    fn test_set_header_rejects_invalid_value() {
        let mut req = request();
        assert!(req.set_header("X-Test", "line\nbreak").is_err());
    }

    #[test]
    fn test_query_params() {
        assert_eq!(
            request().query_params(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
            ]
        );
    }

    #[test]
    fn test_response_json_error_is_serialization() {
        let resp = HttpResponse::new(StatusCode::OK, "not json");
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthloomError>(),
            Some(AuthloomError::Serialization(_))
        ));
    }

    #[test]
    fn test_excerpt_bounds_long_bodies() {
        let long = HttpResponse::new(StatusCode::BAD_REQUEST, "x".repeat(500));
        assert_eq!(long.excerpt().len(), 203);
        let short = HttpResponse::new(StatusCode::BAD_REQUEST, "denied");
        assert_eq!(short.excerpt(), "denied");
    }

    #[test]
    fn test_redact_drops_query() {
        let url = Url::parse("https://api.example.com/me?access_token=secret").unwrap();
        assert_eq!(redact(&url), "https://api.example.com/me");
    }
}
