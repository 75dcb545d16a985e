//! Compliance Pipeline
//!
//! Real providers deviate from the RFCs: non-standard content types, extra
//! required headers, token responses that are not JSON.  Instead of teaching
//! the protocol engines about each deviation, the engines expose fixed
//! extension points and run whatever hooks were registered there.
//!
//! | Point | Artifact | Runs on |
//! |---|---|---|
//! | [`ExtensionPoint::Request`] | [`HttpRequest`] | every outgoing request |
//! | [`ExtensionPoint::ProtectedRequest`] | [`HttpRequest`] | authenticated API calls |
//! | [`ExtensionPoint::AccessTokenResponse`] | [`HttpResponse`] | access-token / client-credentials responses |
//! | [`ExtensionPoint::RefreshTokenRequest`] | [`HttpRequest`] | refresh-token grants |
//! | [`ExtensionPoint::RefreshTokenResponse`] | [`HttpResponse`] | refresh-token responses |
//!
//! Hooks at the same point run in registration order.  A hook may only
//! rewrite the artifact it is handed; an error returned by a hook aborts the
//! call.
//!
//! Provider-specific bundles implement [`ComplianceFix`]; a handful of common
//! ones live in [`fixes`].

pub mod fixes;

use std::fmt;
use std::sync::Arc;

use crate::error::{AuthloomError, Result};
use crate::http::{HttpRequest, HttpResponse};

// ---------------------------------------------------------------------------
// ExtensionPoint
// ---------------------------------------------------------------------------

/// The fixed places at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    /// Every outgoing request, before any protocol-specific hook.
    Request,
    /// Authenticated API requests, after the token has been attached.
    ProtectedRequest,
    /// Raw token endpoint response of an access-token grant.
    AccessTokenResponse,
    /// Outgoing refresh-token grant.
    RefreshTokenRequest,
    /// Raw token endpoint response of a refresh-token grant.
    RefreshTokenResponse,
}

impl ExtensionPoint {
    /// Returns the hook point's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionPoint::Request => "request",
            ExtensionPoint::ProtectedRequest => "protected_request",
            ExtensionPoint::AccessTokenResponse => "access_token_response",
            ExtensionPoint::RefreshTokenRequest => "refresh_token_request",
            ExtensionPoint::RefreshTokenResponse => "refresh_token_response",
        }
    }

    /// Returns `true` for points whose hooks rewrite responses.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            ExtensionPoint::AccessTokenResponse | ExtensionPoint::RefreshTokenResponse
        )
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transformers
// ---------------------------------------------------------------------------

/// Rewrites an outgoing request in place.
///
/// Any `Fn(&mut HttpRequest) -> Result<()>` closure implements this trait.
pub trait RequestTransformer: Send + Sync {
    /// Applies the rewrite.
    fn transform(&self, request: &mut HttpRequest) -> Result<()>;
}

impl<F> RequestTransformer for F
where
    F: Fn(&mut HttpRequest) -> Result<()> + Send + Sync,
{
    fn transform(&self, request: &mut HttpRequest) -> Result<()> {
        self(request)
    }
}

/// Rewrites a raw response in place before it is parsed.
///
/// Any `Fn(&mut HttpResponse) -> Result<()>` closure implements this trait.
pub trait ResponseTransformer: Send + Sync {
    /// Applies the rewrite.
    fn transform(&self, response: &mut HttpResponse) -> Result<()>;
}

impl<F> ResponseTransformer for F
where
    F: Fn(&mut HttpResponse) -> Result<()> + Send + Sync,
{
    fn transform(&self, response: &mut HttpResponse) -> Result<()> {
        self(response)
    }
}

#[derive(Clone)]
enum Transformer {
    Request(Arc<dyn RequestTransformer>),
    Response(Arc<dyn ResponseTransformer>),
}

#[derive(Clone)]
struct Hook {
    name: String,
    point: ExtensionPoint,
    transformer: Transformer,
}

// ---------------------------------------------------------------------------
// CompliancePipeline
// ---------------------------------------------------------------------------

/// Ordered hooks keyed by extension point.
///
/// The pipeline is assembled once at client construction and is read-only
/// afterwards; cloning it is cheap.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpRequest;
/// use reqwest::Method;
/// use url::Url;
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.on_request("user-agent", |req: &mut HttpRequest| {
///     req.set_header("User-Agent", "authloom")
/// });
///
/// let mut req = HttpRequest::new(Method::GET, Url::parse("https://ex.test/").unwrap());
/// pipeline.apply_request(ExtensionPoint::Request, &mut req).unwrap();
/// assert_eq!(req.headers["user-agent"], "authloom");
/// ```
#[derive(Clone, Default)]
pub struct CompliancePipeline {
    hooks: Vec<Hook>,
}

impl fmt::Debug for CompliancePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.hooks
                    .iter()
                    .map(|h| format!("{}:{}", h.point, h.name)),
            )
            .finish()
    }
}

impl CompliancePipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the hooks registered at `point`, in invocation order.
    pub fn hook_names(&self, point: ExtensionPoint) -> Vec<&str> {
        self.hooks
            .iter()
            .filter(|h| h.point == point)
            .map(|h| h.name.as_str())
            .collect()
    }

    /// Registers a request-side hook at `point`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when `point` is a response-side
    /// extension point.
    pub fn register_request_hook(
        &mut self,
        point: ExtensionPoint,
        name: impl Into<String>,
        transformer: impl RequestTransformer + 'static,
    ) -> Result<&mut Self> {
        let name = name.into();
        if point.is_response() {
            return Err(AuthloomError::Config(format!(
                "hook '{name}' transforms requests but '{point}' is a response extension point"
            ))
            .into());
        }
        Ok(self.push_request(point, name, transformer))
    }

    /// Registers a response-side hook at `point`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthloomError::Config`] when `point` is a request-side
    /// extension point.
    pub fn register_response_hook(
        &mut self,
        point: ExtensionPoint,
        name: impl Into<String>,
        transformer: impl ResponseTransformer + 'static,
    ) -> Result<&mut Self> {
        let name = name.into();
        if !point.is_response() {
            return Err(AuthloomError::Config(format!(
                "hook '{name}' transforms responses but '{point}' is a request extension point"
            ))
            .into());
        }
        Ok(self.push_response(point, name, transformer))
    }

    /// Registers a hook on [`ExtensionPoint::Request`].
    pub fn on_request(
        &mut self,
        name: impl Into<String>,
        transformer: impl RequestTransformer + 'static,
    ) -> &mut Self {
        self.push_request(ExtensionPoint::Request, name.into(), transformer)
    }

    /// Registers a hook on [`ExtensionPoint::ProtectedRequest`].
    pub fn on_protected_request(
        &mut self,
        name: impl Into<String>,
        transformer: impl RequestTransformer + 'static,
    ) -> &mut Self {
        self.push_request(ExtensionPoint::ProtectedRequest, name.into(), transformer)
    }

    /// Registers a hook on [`ExtensionPoint::RefreshTokenRequest`].
    pub fn on_refresh_token_request(
        &mut self,
        name: impl Into<String>,
        transformer: impl RequestTransformer + 'static,
    ) -> &mut Self {
        self.push_request(ExtensionPoint::RefreshTokenRequest, name.into(), transformer)
    }

    /// Registers a hook on [`ExtensionPoint::AccessTokenResponse`].
    pub fn on_access_token_response(
        &mut self,
        name: impl Into<String>,
        transformer: impl ResponseTransformer + 'static,
    ) -> &mut Self {
        self.push_response(ExtensionPoint::AccessTokenResponse, name.into(), transformer)
    }

    /// Registers a hook on [`ExtensionPoint::RefreshTokenResponse`].
    pub fn on_refresh_token_response(
        &mut self,
        name: impl Into<String>,
        transformer: impl ResponseTransformer + 'static,
    ) -> &mut Self {
        self.push_response(ExtensionPoint::RefreshTokenResponse, name.into(), transformer)
    }

    /// Installs every hook of `fix`.
    pub fn install(&mut self, fix: &dyn ComplianceFix) -> &mut Self {
        fix.install(self);
        self
    }

    /// Runs the request hooks registered at `point` in order.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error.
    pub fn apply_request(&self, point: ExtensionPoint, request: &mut HttpRequest) -> Result<()> {
        for hook in self.hooks.iter().filter(|h| h.point == point) {
            if let Transformer::Request(t) = &hook.transformer {
                tracing::trace!(hook = %hook.name, %point, "applying compliance hook");
                t.transform(request)?;
            }
        }
        Ok(())
    }

    /// Runs the response hooks registered at `point` in order.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error.
    pub fn apply_response(&self, point: ExtensionPoint, response: &mut HttpResponse) -> Result<()> {
        for hook in self.hooks.iter().filter(|h| h.point == point) {
            if let Transformer::Response(t) = &hook.transformer {
                tracing::trace!(hook = %hook.name, %point, "applying compliance hook");
                t.transform(response)?;
            }
        }
        Ok(())
    }

    fn push_request(
        &mut self,
        point: ExtensionPoint,
        name: String,
        transformer: impl RequestTransformer + 'static,
    ) -> &mut Self {
        self.hooks.push(Hook {
            name,
            point,
            transformer: Transformer::Request(Arc::new(transformer)),
        });
        self
    }

    fn push_response(
        &mut self,
        point: ExtensionPoint,
        name: String,
        transformer: impl ResponseTransformer + 'static,
    ) -> &mut Self {
        self.hooks.push(Hook {
            name,
            point,
            transformer: Transformer::Response(Arc::new(transformer)),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// ComplianceFix
// ---------------------------------------------------------------------------

/// A bundle of hooks that corrects one provider's deviations.
///
/// Any `Fn(&mut CompliancePipeline)` closure is a fix.
///
/// # Examples
///
/// ```
/// use authloom::compliance::{ComplianceFix, CompliancePipeline, ExtensionPoint};
/// use authloom::http::HttpRequest;
///
/// let fix = |p: &mut CompliancePipeline| {
///     p.on_request("accept-json", |req: &mut HttpRequest| {
///         req.set_header("Accept", "application/json")
///     });
/// };
///
/// let mut pipeline = CompliancePipeline::new();
/// pipeline.install(&fix);
/// assert_eq!(pipeline.hook_names(ExtensionPoint::Request), vec!["accept-json"]);
/// ```
pub trait ComplianceFix: Send + Sync {
    /// Registers the fix's hooks on `pipeline`.
    fn install(&self, pipeline: &mut CompliancePipeline);
}

impl<F> ComplianceFix for F
where
    F: Fn(&mut CompliancePipeline) + Send + Sync,
{
    fn install(&self, pipeline: &mut CompliancePipeline) {
        self(pipeline)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode};
    use std::sync::Mutex;
    use url::Url;

    fn request() -> HttpRequest {
        HttpRequest::new(Method::POST, Url::parse("https://ex.test/token").unwrap())
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = CompliancePipeline::new();
        for name in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            pipeline.on_request(name, move |_req: &mut HttpRequest| -> Result<()> {
                seen.lock().unwrap().push(name);
                Ok(())
            });
        }

        pipeline
            .apply_request(ExtensionPoint::Request, &mut request())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_hooks_only_run_at_their_point() {
        let mut pipeline = CompliancePipeline::new();
        pipeline.on_protected_request("tag", |req: &mut HttpRequest| {
            req.set_header("X-Tag", "1")
        });

        let mut req = request();
        pipeline
            .apply_request(ExtensionPoint::Request, &mut req)
            .unwrap();
        assert!(req.headers.get("x-tag").is_none());

        pipeline
            .apply_request(ExtensionPoint::ProtectedRequest, &mut req)
            .unwrap();
        assert_eq!(req.headers["x-tag"], "1");
    }

    #[test]
    fn test_response_hook_rewrites_body() {
        let mut pipeline = CompliancePipeline::new();
        pipeline.on_access_token_response("replace", |resp: &mut HttpResponse| -> Result<()> {
            resp.body = bytes::Bytes::from_static(b"{}");
            Ok(())
        });

        let mut resp = HttpResponse::new(StatusCode::OK, "garbage");
        pipeline
            .apply_response(ExtensionPoint::AccessTokenResponse, &mut resp)
            .unwrap();
        assert_eq!(resp.text(), "{}");

        let mut untouched = HttpResponse::new(StatusCode::OK, "garbage");
        pipeline
            .apply_response(ExtensionPoint::RefreshTokenResponse, &mut untouched)
            .unwrap();
        assert_eq!(untouched.text(), "garbage");
    }

    #[test]
    fn test_hook_error_aborts_pipeline() {
        let mut pipeline = CompliancePipeline::new();
        pipeline.on_request("fail", |_req: &mut HttpRequest| -> Result<()> {
            Err(AuthloomError::Config("nope".to_string()).into())
        });
        pipeline.on_request("never", |req: &mut HttpRequest| {
            req.set_header("X-Never", "1")
        });

        let mut req = request();
        assert!(pipeline
            .apply_request(ExtensionPoint::Request, &mut req)
            .is_err());
        assert!(req.headers.get("x-never").is_none());
    }

    #[test]
    fn test_register_rejects_mismatched_point() {
        let mut pipeline = CompliancePipeline::new();
        let err = pipeline
            .register_request_hook(
                ExtensionPoint::AccessTokenResponse,
                "bad",
                |_req: &mut HttpRequest| -> Result<()> { Ok(()) },
            )
            .err()
            .expect("request hook on response point must fail");
        assert!(err.to_string().contains("access_token_response"), "{err}");

        assert!(pipeline
            .register_response_hook(
                ExtensionPoint::Request,
                "bad",
                |_resp: &mut HttpResponse| -> Result<()> { Ok(()) }
            )
            .is_err());
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_install_fix_adds_all_hooks() {
        let fix = |p: &mut CompliancePipeline| {
            p.on_refresh_token_request("a", |_r: &mut HttpRequest| -> Result<()> { Ok(()) })
                .on_refresh_token_response("b", |_r: &mut HttpResponse| -> Result<()> { Ok(()) });
        };
        let mut pipeline = CompliancePipeline::new();
        pipeline.install(&fix);
        assert_eq!(
            pipeline.hook_names(ExtensionPoint::RefreshTokenRequest),
            vec!["a"]
        );
        assert_eq!(
            pipeline.hook_names(ExtensionPoint::RefreshTokenResponse),
            vec!["b"]
        );
    }

    #[test]
    fn test_debug_lists_hooks() {
        let mut pipeline = CompliancePipeline::new();
        pipeline.on_request("ua", |_r: &mut HttpRequest| -> Result<()> { Ok(()) });
        assert_eq!(format!("{pipeline:?}"), r#"["request:ua"]"#);
    }
}
