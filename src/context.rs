//! Per-request context and context pooling.
//!
//! A [`Context`] is the uniform surface a request travels through the pipeline
//! as: the parsed request line and headers, the lazily-consumed body, route
//! parameters, the derived URL pieces (`query`, `host`, `origin`, …), a typed
//! per-request state map for cross-middleware data, and a staged response seed
//! (status + headers) that handler-side finishers fold into the typed
//! `Response`. A context is owned exclusively by the task handling its request;
//! the chain moves it by value, so no locking is needed for any of its fields.
//!
//! Contexts are recycled: the heap-owning parts (state map, query map) come
//! from a bounded [`ContextPool`] and return to it when the context drops,
//! whichever way the request ends.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::context::Context;
//! use nextrush::types::HttpResult;
//!
//! async fn show_user(ctx: Context) -> HttpResult {
//!     let id = ctx.params.get("id").unwrap_or("unknown").to_owned();
//!     Ok(ctx.json(&serde_json::json!({ "id": id })))
//! }
//! ```

use std::{
    collections::HashMap,
    mem,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use http::{Extensions, HeaderMap, HeaderValue, Method, StatusCode, Uri, header, request::Parts};
use http_body_util::BodyExt;
use hyper::body::Body;
use parking_lot::Mutex;
use serde::Serialize;
use url::form_urlencoded;

use crate::{
    body::RushBody,
    bodyparser::ParsedBody,
    responder::Responder,
    router::Params,
    types::{BoxBody, BoxError, Response},
};

/// Staged response data merged into the typed response by the finishers.
///
/// The seed is the explicit stand-in for a mutable response object: status and
/// headers accumulate here until a finisher constructs the `Response`, at
/// which point the seed is spent. There is no way to stage more headers after
/// that — the monotone equivalent of a headers-sent latch.
#[derive(Debug)]
struct ResponseSeed {
    status: StatusCode,
    status_set: bool,
    headers: HeaderMap,
}

impl ResponseSeed {
    fn new() -> Self {
        Self {
            status: StatusCode::OK,
            status_set: false,
            headers: HeaderMap::new(),
        }
    }
}

/// Per-request carrier of request data, parsed values, and user state.
pub struct Context {
    parts: Parts,
    raw_body: Option<BoxBody>,
    query: HashMap<String, String>,
    search: String,
    /// Route parameters populated by the router on a match.
    pub params: Params,
    /// Parsed request body, set by the body parser or by user code.
    pub body: ParsedBody,
    state: Extensions,
    request_id: Option<String>,
    start: Instant,
    remote_addr: SocketAddr,
    trust_proxy: bool,
    seed: ResponseSeed,
    pool: Option<Arc<ContextPool>>,
}

impl Context {
    /// Request method.
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Full request URI.
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Request path.
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Parsed query map. Duplicate keys resolve last-write-wins.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Single query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Raw query string including the leading `?`, or empty.
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Request headers (case-insensitive, multi-valued).
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// A single header value as a string, when present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Client IP address.
    ///
    /// With `trust_proxy` enabled, the first entry of `X-Forwarded-For` wins;
    /// otherwise the socket peer address is used.
    pub fn ip(&self) -> IpAddr {
        if self.trust_proxy {
            if let Some(forwarded) = self.header("x-forwarded-for") {
                if let Some(first) = forwarded.split(',').next() {
                    if let Ok(ip) = first.trim().parse() {
                        return ip;
                    }
                }
            }
        }
        self.remote_addr.ip()
    }

    /// Peer socket address as accepted by the listener.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether the request arrived over TLS (or a trusted proxy says it did).
    pub fn secure(&self) -> bool {
        self.trust_proxy
            && self
                .header("x-forwarded-proto")
                .map(|p| p.eq_ignore_ascii_case("https"))
                .unwrap_or(false)
    }

    /// Protocol scheme, `"http"` or `"https"`.
    pub fn protocol(&self) -> &'static str {
        if self.secure() { "https" } else { "http" }
    }

    /// `Host` header value, including the port when present.
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Host name without the port.
    pub fn hostname(&self) -> Option<&str> {
        self.host().map(|h| h.split(':').next().unwrap_or(h))
    }

    /// Scheme and authority, e.g. `http://localhost:3000`.
    pub fn origin(&self) -> Option<String> {
        self.host().map(|h| format!("{}://{}", self.protocol(), h))
    }

    /// Full request URL.
    pub fn href(&self) -> String {
        match self.origin() {
            Some(origin) => format!("{}{}{}", origin, self.path(), self.search),
            None => format!("{}{}", self.path(), self.search),
        }
    }

    /// Request id assigned by the request-id middleware, when configured.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Sets the request id.
    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = Some(id.into());
    }

    /// Instant at which this context was acquired.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Stores a typed value in the per-request state map.
    pub fn set<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.state.insert(value);
    }

    /// Reads a typed value from the per-request state map.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.state.get::<T>()
    }

    /// Removes and returns a typed value from the per-request state map.
    pub fn take<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.state.remove::<T>()
    }

    /// Takes the raw body stream, leaving the context body-less.
    ///
    /// The body parser and WebSocket upgrade consume it; a second call
    /// returns `None`.
    pub fn take_raw_body(&mut self) -> Option<BoxBody> {
        self.raw_body.take()
    }

    /// Takes the raw request parts, for connection hijacking (upgrades).
    pub(crate) fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// Stages the response status for the finishers.
    pub fn set_status(&mut self, status: StatusCode) {
        self.seed.status = status;
        self.seed.status_set = true;
    }

    /// Stages a response header for the finishers.
    pub fn set_header(&mut self, name: header::HeaderName, value: HeaderValue) {
        self.seed.headers.insert(name, value);
    }

    /// Builds the response from any responder, folding in the staged seed.
    ///
    /// A staged status overrides the responder's; staged headers are inserted
    /// unless the responder already set them.
    pub fn respond<R: Responder>(self, responder: R) -> Response {
        let mut resp = responder.into_response();
        if self.seed.status_set {
            *resp.status_mut() = self.seed.status;
        }
        for (name, value) in &self.seed.headers {
            if !resp.headers().contains_key(name) {
                resp.headers_mut().insert(name.clone(), value.clone());
            }
        }
        resp
    }

    /// Finishes with a `text/plain` body.
    pub fn text(mut self, body: impl Into<String>) -> Response {
        self.content_type_default("text/plain; charset=utf-8");
        self.respond(body.into())
    }

    /// Finishes with a `text/html` body.
    pub fn html(mut self, body: impl Into<String>) -> Response {
        self.content_type_default("text/html; charset=utf-8");
        self.respond(body.into())
    }

    /// Finishes with a JSON body serialized from `value`.
    pub fn json<T: Serialize>(self, value: &T) -> Response {
        self.respond(crate::responder::Json(value))
    }

    /// Finishes with raw bytes and an explicit content type.
    pub fn send(mut self, body: impl Into<RushBody>, content_type: &'static str) -> Response {
        self.content_type_default(content_type);
        self.respond(body.into())
    }

    /// Finishes with an empty body.
    pub fn empty(self) -> Response {
        self.respond(())
    }

    fn content_type_default(&mut self, value: &'static str) {
        if !self.seed.headers.contains_key(header::CONTENT_TYPE) {
            self.seed
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let state = mem::take(&mut self.state);
            let query = mem::take(&mut self.query);
            pool.release(state, query);
        }
    }
}

/// Reusable heap allocations for a context.
struct Shell {
    state: Extensions,
    query: HashMap<String, String>,
}

/// Bounded pool of context shells.
///
/// `acquire` builds a fresh context around recycled allocations; the shell
/// comes back automatically when the context drops. Overflow shells are
/// simply discarded, so the pool never grows past its bound.
pub struct ContextPool {
    shells: Mutex<Vec<Shell>>,
    max_size: usize,
}

impl ContextPool {
    /// Creates a pool bounded at `max_size` idle shells.
    pub fn new(max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            shells: Mutex::new(Vec::new()),
            max_size,
        })
    }

    /// Builds a context for the request, reusing a pooled shell when one is
    /// available.
    ///
    /// Derived fields (query map, search string) are computed here; `body`,
    /// `params`, and the response seed start in their cleared states.
    pub fn acquire<B>(
        self: &Arc<Self>,
        req: http::Request<B>,
        remote_addr: SocketAddr,
        trust_proxy: bool,
    ) -> Context
    where
        B: Body<Data = bytes::Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let shell = self.shells.lock().pop().unwrap_or_else(|| Shell {
            state: Extensions::new(),
            query: HashMap::new(),
        });

        let (parts, body) = req.into_parts();
        let mut query = shell.query;
        let search = match parts.uri.query() {
            Some(q) if !q.is_empty() => {
                for (k, v) in form_urlencoded::parse(q.as_bytes()) {
                    query.insert(k.into_owned(), v.into_owned());
                }
                format!("?{q}")
            }
            _ => String::new(),
        };

        Context {
            parts,
            raw_body: Some(body.map_err(|e| e.into()).boxed()),
            query,
            search,
            params: Params::detached(),
            body: ParsedBody::Unset,
            state: shell.state,
            request_id: None,
            start: Instant::now(),
            remote_addr,
            trust_proxy,
            seed: ResponseSeed::new(),
            pool: Some(self.clone()),
        }
    }

    /// Returns shell parts to the pool, clearing them first.
    fn release(&self, mut state: Extensions, mut query: HashMap<String, String>) {
        let mut shells = self.shells.lock();
        if shells.len() >= self.max_size {
            return;
        }
        state.clear();
        query.clear();
        shells.push(Shell { state, query });
    }

    /// Drops every idle shell. Used on application shutdown.
    pub fn clear(&self) {
        self.shells.lock().clear();
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.shells.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;
    use std::net::Ipv4Addr;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 41000)
    }

    fn request(uri: &str) -> http::Request<Empty<bytes::Bytes>> {
        http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("host", "example.test:8080")
            .body(Empty::new())
            .unwrap()
    }

    #[test]
    fn query_is_last_write_wins() {
        let pool = ContextPool::new(4);
        let ctx = pool.acquire(request("/search?a=1&b=2&a=3"), addr(), false);
        assert_eq!(ctx.query_param("a"), Some("3"));
        assert_eq!(ctx.query_param("b"), Some("2"));
        assert_eq!(ctx.search(), "?a=1&b=2&a=3");
    }

    #[test]
    fn url_parts_derive_from_host_header() {
        let pool = ContextPool::new(4);
        let ctx = pool.acquire(request("/a/b?x=1"), addr(), false);
        assert_eq!(ctx.host(), Some("example.test:8080"));
        assert_eq!(ctx.hostname(), Some("example.test"));
        assert_eq!(ctx.protocol(), "http");
        assert_eq!(ctx.origin().as_deref(), Some("http://example.test:8080"));
        assert_eq!(ctx.href(), "http://example.test:8080/a/b?x=1");
    }

    #[test]
    fn trust_proxy_reads_forwarded_headers() {
        let pool = ContextPool::new(4);
        let req = http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-forwarded-proto", "https")
            .body(Empty::<bytes::Bytes>::new())
            .unwrap();
        let ctx = pool.acquire(req, addr(), true);
        assert_eq!(ctx.ip().to_string(), "203.0.113.7");
        assert!(ctx.secure());
        assert_eq!(ctx.protocol(), "https");
    }

    #[test]
    fn untrusted_proxy_headers_are_ignored() {
        let pool = ContextPool::new(4);
        let req = http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Empty::<bytes::Bytes>::new())
            .unwrap();
        let ctx = pool.acquire(req, addr(), false);
        assert_eq!(ctx.ip(), addr().ip());
        assert!(!ctx.secure());
    }

    #[test]
    fn shells_recycle_through_the_pool() {
        let pool = ContextPool::new(2);
        {
            let mut ctx = pool.acquire(request("/"), addr(), false);
            ctx.set(41u32);
            assert_eq!(ctx.get::<u32>(), Some(&41));
        }
        assert_eq!(pool.idle(), 1);

        // The recycled shell must come back cleared.
        let ctx = pool.acquire(request("/"), addr(), false);
        assert_eq!(ctx.get::<u32>(), None);
        assert!(ctx.query().is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn pool_bound_discards_overflow() {
        let pool = ContextPool::new(1);
        let a = pool.acquire(request("/"), addr(), false);
        let b = pool.acquire(request("/"), addr(), false);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn seed_folds_into_finished_response() {
        let pool = ContextPool::new(1);
        let mut ctx = pool.acquire(request("/"), addr(), false);
        ctx.set_status(StatusCode::CREATED);
        ctx.set_header(
            header::HeaderName::from_static("x-custom"),
            HeaderValue::from_static("yes"),
        );
        let resp = ctx.text("made");
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["x-custom"], "yes");
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
