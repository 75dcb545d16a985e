//! Built-in compliance fixes for common provider deviations
//!
//! Each function returns a [`ComplianceFix`] ready to be passed to
//! [`CompliancePipeline::install`] or to a registry builder.  The response
//! fixes install on both
//! [`ExtensionPoint::AccessTokenResponse`](crate::compliance::ExtensionPoint::AccessTokenResponse)
//! and [`ExtensionPoint::RefreshTokenResponse`](crate::compliance::ExtensionPoint::RefreshTokenResponse).

use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Map, Value};

use crate::compliance::{ComplianceFix, CompliancePipeline};
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};

fn install_on_responses<T>(pipeline: &mut CompliancePipeline, name: &str, transformer: T)
where
    T: Fn(&mut HttpResponse) -> Result<()> + Clone + Send + Sync + 'static,
{
    pipeline
        .on_access_token_response(name, transformer.clone())
        .on_refresh_token_response(name, transformer);
}

/// Parses `body` as a JSON object, returning `None` for anything else.
fn json_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn write_json(response: &mut HttpResponse, map: Map<String, Value>) -> Result<()> {
    let body = serde_json::to_vec(&Value::Object(map))
        .map_err(crate::error::AuthloomError::from)?;
    response.body = Bytes::from(body);
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(())
}

/// Lower-cases every top-level key of a JSON token response.
///
/// Some providers answer with `Access_Token` or `EXPIRES_IN`.  Bodies that
/// are not JSON objects pass through untouched.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{fixes, CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpResponse;
/// use reqwest::StatusCode;
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.install(&fixes::lowercase_token_response_keys());
///
/// let mut resp = HttpResponse::new(StatusCode::OK, r#"{"Access_Token":"abc"}"#);
/// pipeline.apply_response(ExtensionPoint::AccessTokenResponse, &mut resp).unwrap();
/// assert_eq!(resp.text(), r#"{"access_token":"abc"}"#);
/// ```
pub fn lowercase_token_response_keys() -> impl ComplianceFix {
    |pipeline: &mut CompliancePipeline| {
        install_on_responses(
            pipeline,
            "lowercase_token_response_keys",
            |resp: &mut HttpResponse| -> Result<()> {
                let Some(map) = json_object(&resp.body) else {
                    return Ok(());
                };
                let lowered = map
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect();
                write_json(resp, lowered)
            },
        );
    }
}

/// Converts a form-encoded token response (`access_token=..&expires_in=..`)
/// into JSON.
///
/// Numeric values are kept as strings; the token parser accepts string
/// `expires_in`.  JSON bodies pass through untouched.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{fixes, CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpResponse;
/// use reqwest::StatusCode;
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.install(&fixes::form_encoded_token_response());
///
/// let mut resp = HttpResponse::new(StatusCode::OK, "access_token=abc&token_type=bearer");
/// pipeline.apply_response(ExtensionPoint::AccessTokenResponse, &mut resp).unwrap();
/// let json: serde_json::Value = resp.json().unwrap();
/// assert_eq!(json["access_token"], "abc");
/// ```
pub fn form_encoded_token_response() -> impl ComplianceFix {
    |pipeline: &mut CompliancePipeline| {
        install_on_responses(
            pipeline,
            "form_encoded_token_response",
            |resp: &mut HttpResponse| -> Result<()> {
                if resp.body.is_empty()
                    || serde_json::from_slice::<Value>(&resp.body).is_ok()
                {
                    return Ok(());
                }
                let map = resp
                    .form_params()
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                write_json(resp, map)
            },
        );
    }
}

/// Inserts `token_type` into JSON token responses that omit it.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{fixes, CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpResponse;
/// use reqwest::StatusCode;
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.install(&fixes::default_token_type("Bearer"));
///
/// let mut resp = HttpResponse::new(StatusCode::OK, r#"{"access_token":"abc"}"#);
/// pipeline.apply_response(ExtensionPoint::RefreshTokenResponse, &mut resp).unwrap();
/// let json: serde_json::Value = resp.json().unwrap();
/// assert_eq!(json["token_type"], "Bearer");
/// ```
pub fn default_token_type(token_type: impl Into<String>) -> impl ComplianceFix {
    let token_type = token_type.into();
    move |pipeline: &mut CompliancePipeline| {
        let token_type = token_type.clone();
        install_on_responses(
            pipeline,
            "default_token_type",
            move |resp: &mut HttpResponse| -> Result<()> {
                let Some(mut map) = json_object(&resp.body) else {
                    return Ok(());
                };
                if map.contains_key("token_type") || map.contains_key("error") {
                    return Ok(());
                }
                map.insert("token_type".to_string(), Value::String(token_type.clone()));
                write_json(resp, map)
            },
        );
    }
}

/// Moves a bearer token from the `Authorization` header into the query
/// string under `param` (for example `access_token` or `oauth2_access_token`).
///
/// Installs on
/// [`ExtensionPoint::ProtectedRequest`](crate::compliance::ExtensionPoint::ProtectedRequest),
/// which runs after the
/// token has been attached.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{fixes, CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpRequest;
/// use reqwest::Method;
/// use url::Url;
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.install(&fixes::access_token_in_query("oauth2_access_token"));
///
/// let mut req = HttpRequest::new(Method::GET, Url::parse("https://api.ex.test/me").unwrap());
/// req.set_header("Authorization", "Bearer abc").unwrap();
/// pipeline.apply_request(ExtensionPoint::ProtectedRequest, &mut req).unwrap();
///
/// assert!(req.headers.get("authorization").is_none());
/// assert_eq!(req.url.as_str(), "https://api.ex.test/me?oauth2_access_token=abc");
/// ```
pub fn access_token_in_query(param: impl Into<String>) -> impl ComplianceFix {
    let param = param.into();
    move |pipeline: &mut CompliancePipeline| {
        let param = param.clone();
        pipeline.on_protected_request(
            "access_token_in_query",
            move |req: &mut HttpRequest| -> Result<()> {
                let token = req
                    .headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| {
                        v.split_once(' ')
                            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
                            .map(|(_, token)| token.trim().to_string())
                    });
                if let Some(token) = token {
                    req.headers.remove(AUTHORIZATION);
                    req.url.query_pairs_mut().append_pair(&param, &token);
                }
                Ok(())
            },
        );
    }
}
