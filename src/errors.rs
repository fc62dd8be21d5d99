//! Typed HTTP errors and the exception-filter stack.
//!
//! Every failure that travels through the request pipeline is an [`HttpError`]
//! carrying an [`ErrorKind`] from the framework taxonomy, a sanitized message,
//! and optional structured data. Components raise typed errors with `?`; the
//! filter stack at the edge of the pipeline converts whatever escapes into a
//! small JSON response. Internal detail (sources, paths, stack context) is
//! logged with the request id and never serialized to the client.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::errors::HttpError;
//!
//! fn parse_page(raw: &str) -> Result<u32, HttpError> {
//!     raw.parse()
//!         .map_err(|_| HttpError::bad_request("page must be a number"))
//! }
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use serde_json::{Value, json};

use crate::{body::RushBody, types::Response};

/// Classification of request-path failures.
///
/// Each kind maps to a default HTTP status code; the kind, not the concrete
/// error site, decides what the client sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, parse failure, invalid range header.
    BadRequest,
    /// Missing or invalid credential, surfaced by user middleware.
    Unauthorized,
    /// Origin check failure, dotfile denial.
    Forbidden,
    /// Router miss or static file miss.
    NotFound,
    /// Path matched but the method did not; carries the allowed set.
    MethodNotAllowed,
    /// Server-side timeout cancelled the request.
    RequestTimeout,
    /// A body parser limit was exceeded.
    PayloadTooLarge,
    /// Body parser could not dispatch and the raw fallback is disabled.
    UnsupportedMediaType,
    /// Range header named an unsatisfiable range.
    RangeNotSatisfiable,
    /// Rate limiter rejected the request.
    TooManyRequests,
    /// Unexpected, uncaught failure.
    Internal,
    /// Unknown HTTP method.
    NotImplemented,
}

impl ErrorKind {
    /// Default HTTP status for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// Typed error for the request pipeline.
///
/// The message is the only free text that reaches the client. `code` and
/// `details` surface structured data when a component attaches it. `headers`
/// collects response headers that middleware earlier in the chain wants
/// preserved on the eventual error response (security headers, request ids).
#[derive(Debug)]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    details: Option<Value>,
    allow: Vec<Method>,
    retry_after: Option<u64>,
    headers: HeaderMap,
    request_id: Option<String>,
}

impl HttpError {
    /// Creates an error of the given kind with a client-safe message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
            allow: Vec::new(),
            retry_after: None,
            headers: HeaderMap::new(),
            request_id: None,
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// 403 Forbidden.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// 405 Method Not Allowed with the set of allowed methods.
    pub fn method_not_allowed(allow: Vec<Method>) -> Self {
        let mut err = Self::new(ErrorKind::MethodNotAllowed, "method not allowed");
        err.allow = allow;
        err
    }

    /// 408 Request Timeout.
    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestTimeout, message)
    }

    /// 413 Payload Too Large.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    /// 415 Unsupported Media Type.
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedMediaType, message)
    }

    /// 416 Range Not Satisfiable.
    pub fn range_not_satisfiable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeNotSatisfiable, message)
    }

    /// 429 Too Many Requests, optionally with a Retry-After hint in seconds.
    pub fn too_many_requests(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let mut err = Self::new(ErrorKind::TooManyRequests, message);
        err.retry_after = retry_after;
        err
    }

    /// 500 Internal Server Error with a generic client message.
    ///
    /// The detail belongs in the log line at the raise site, not here.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// 501 Not Implemented.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    /// Attaches a machine-readable error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches structured details serialized into the error body.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Merges headers that must survive onto the error response.
    ///
    /// Used by header-setting middleware (helmet, CORS, request-id) so their
    /// headers remain present when the chain fails downstream of them.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Sets a single header on the eventual error response.
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Tags the error with the request id for filter logging.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Request id attached by the request-id middleware, when any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Client-safe message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Allowed methods, populated for `MethodNotAllowed`.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allow
    }

    /// Renders the error as its JSON response.
    ///
    /// The body is `{"error": message}` plus `code`/`details` when present.
    /// `Allow` and `Retry-After` headers are attached for the kinds that
    /// carry them; merged middleware headers are applied last.
    pub fn into_response(self) -> Response {
        let mut payload = json!({ "error": self.message });
        if let Some(code) = &self.code {
            payload["code"] = json!(code);
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        let body = serde_json::to_string(&payload)
            .unwrap_or_else(|_| r#"{"error":"internal server error"}"#.to_string());

        let mut resp = hyper::Response::builder()
            .status(self.kind.status())
            .header(header::CONTENT_TYPE, "application/json")
            .body(RushBody::from(body))
            .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));

        if !self.allow.is_empty() {
            let allow = self
                .allow
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                resp.headers_mut().insert(header::ALLOW, value);
            }
        }
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        for (name, value) in &self.headers {
            resp.headers_mut().insert(name.clone(), value.clone());
        }
        resp
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.status(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// Request metadata available to filters after the context is gone.
///
/// Captured before the chain runs; the context itself is consumed by the
/// chain, so filters work from this snapshot.
#[derive(Clone, Debug)]
pub struct ErrorScope {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Request id, when the request-id middleware assigned one.
    pub request_id: Option<String>,
}

/// Ordered error-to-response converter.
///
/// Filters are consulted in registration order; the first whose `matches`
/// returns true handles the error. Anything unmatched falls through to the
/// default conversion in [`FilterStack::handle`].
pub trait ExceptionFilter: Send + Sync + 'static {
    /// Whether this filter wants the error.
    fn matches(&self, err: &HttpError) -> bool;

    /// Converts the error into a response.
    fn catch<'a>(&'a self, err: HttpError, scope: &'a ErrorScope) -> BoxFuture<'a, Response>;
}

/// The ordered collection of exception filters for an application.
///
/// Filters are stored behind `Arc`, making the stack cheap to snapshot for
/// a dispatch without holding any lock across its awaits.
#[derive(Clone, Default)]
pub struct FilterStack {
    filters: Vec<Arc<dyn ExceptionFilter>>,
}

impl FilterStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter; earlier filters win.
    pub fn push(&mut self, filter: Arc<dyn ExceptionFilter>) {
        self.filters.push(filter);
    }

    /// Routes the error through the stack, falling back to the default
    /// JSON conversion.
    ///
    /// Internal errors are logged at error level with the request id; every
    /// other kind logs at debug since the condition is client-visible.
    pub async fn handle(&self, err: HttpError, scope: &ErrorScope) -> Response {
        for filter in &self.filters {
            if filter.matches(&err) {
                return filter.catch(err, scope).await;
            }
        }

        let request_id = err
            .request_id()
            .or(scope.request_id.as_deref())
            .unwrap_or("-")
            .to_owned();
        match err.kind() {
            ErrorKind::Internal => tracing::error!(
                method = %scope.method,
                path = %scope.path,
                request_id = %request_id,
                error = %err,
                "unhandled error"
            ),
            _ => tracing::debug!(
                method = %scope.method,
                path = %scope.path,
                request_id = %request_id,
                error = %err,
                "request failed"
            ),
        }
        err.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn scope() -> ErrorScope {
        ErrorScope {
            method: Method::GET,
            path: "/x".into(),
            request_id: None,
        }
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorKind::TooManyRequests.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::NotImplemented.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn error_renders_sanitized_json() {
        let resp = HttpError::bad_request("bad page").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "bad page");
    }

    #[tokio::test]
    async fn method_not_allowed_sets_allow_header() {
        let resp =
            HttpError::method_not_allowed(vec![Method::GET, Method::POST]).into_response();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn retry_after_survives_conversion() {
        let resp = HttpError::too_many_requests("slow down", Some(12)).into_response();
        assert_eq!(resp.headers()[header::RETRY_AFTER], "12");
    }

    #[tokio::test]
    async fn merged_headers_land_on_error_response() {
        let mut carried = HeaderMap::new();
        carried.insert(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        );
        let resp = HttpError::not_found("missing")
            .with_headers(&carried)
            .into_response();
        assert_eq!(resp.headers()["x-frame-options"], "DENY");
    }

    struct TeapotFilter;

    impl ExceptionFilter for TeapotFilter {
        fn matches(&self, err: &HttpError) -> bool {
            err.kind() == ErrorKind::NotFound
        }

        fn catch<'a>(
            &'a self,
            _err: HttpError,
            _scope: &'a ErrorScope,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async {
                hyper::Response::builder()
                    .status(StatusCode::IM_A_TEAPOT)
                    .body(RushBody::empty())
                    .unwrap()
            })
        }
    }

    #[tokio::test]
    async fn first_matching_filter_wins() {
        let mut stack = FilterStack::new();
        stack.push(Arc::new(TeapotFilter));
        let resp = stack.handle(HttpError::not_found("nope"), &scope()).await;
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);

        let resp = stack
            .handle(HttpError::bad_request("still 400"), &scope())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
