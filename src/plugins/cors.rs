//! Cross-Origin Resource Sharing plugin.
//!
//! Computes the allowed origin from the configured policy — any origin, an
//! explicit list, or a predicate — and answers preflight `OPTIONS` requests
//! with 204 plus the `Access-Control-Allow-*` set. Simple requests get
//! `Access-Control-Allow-Origin` (and `Vary: Origin` whenever the value is
//! not `*`) appended to the response. CORS headers survive onto error
//! responses produced downstream of this middleware.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::plugins::cors::CorsBuilder;
//! use http::Method;
//!
//! // Development: allow everything.
//! let permissive = CorsBuilder::new().build();
//!
//! // Production: explicit origins and credentials.
//! let strict = CorsBuilder::new()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods(&[Method::GET, Method::POST])
//!     .allow_credentials(true)
//!     .max_age_secs(86400)
//!     .build();
//! ```

use std::sync::Arc;

use anyhow::Result;
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
        ACCESS_CONTROL_REQUEST_METHOD,
    },
};

use crate::{
    app::App,
    body::RushBody,
    context::Context,
    middleware::Next,
    plugins::Plugin,
    types::HttpResult,
};

/// How request origins are validated.
#[derive(Clone)]
pub enum OriginPolicy {
    /// Accept any origin; renders as `*` unless credentials are enabled.
    Any,
    /// Accept only the listed origins.
    List(Vec<String>),
    /// Accept origins the predicate approves.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginPolicy::Any => write!(f, "Any"),
            OriginPolicy::List(origins) => f.debug_tuple("List").field(origins).finish(),
            OriginPolicy::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// CORS policy configuration.
#[derive(Clone)]
pub struct Config {
    /// Origin validation policy.
    pub origins: OriginPolicy,
    /// Allowed methods advertised on preflight.
    pub methods: Vec<Method>,
    /// Allowed request headers advertised on preflight.
    pub headers: Vec<HeaderName>,
    /// Allow credentialed requests; forces a specific origin echo.
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origins: OriginPolicy::Any,
            methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: Some(3600),
        }
    }
}

/// Builder for the CORS plugin.
pub struct CorsBuilder(Config);

impl Default for CorsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsBuilder {
    /// Starts from the permissive defaults.
    pub fn new() -> Self {
        Self(Config::default())
    }

    /// Adds an allowed origin, switching the policy to an explicit list.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        match &mut self.0.origins {
            OriginPolicy::List(list) => list.push(origin.into()),
            _ => self.0.origins = OriginPolicy::List(vec![origin.into()]),
        }
        self
    }

    /// Validates origins with a predicate.
    pub fn origin_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.0.origins = OriginPolicy::Predicate(Arc::new(f));
        self
    }

    /// Replaces the allowed method list.
    pub fn allow_methods(mut self, methods: &[Method]) -> Self {
        self.0.methods = methods.to_vec();
        self
    }

    /// Replaces the allowed header list.
    pub fn allow_headers(mut self, headers: &[HeaderName]) -> Self {
        self.0.headers = headers.to_vec();
        self
    }

    /// Enables credentialed requests.
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.0.allow_credentials = allow;
        self
    }

    /// Sets the preflight cache lifetime.
    pub fn max_age_secs(mut self, secs: u32) -> Self {
        self.0.max_age_secs = Some(secs);
        self
    }

    /// Builds the plugin.
    pub fn build(self) -> CorsPlugin {
        CorsPlugin { cfg: self.0 }
    }
}

/// CORS plugin.
#[derive(Clone, Default)]
pub struct CorsPlugin {
    cfg: Config,
}

impl CorsPlugin {
    /// Creates the plugin straight from a configuration object.
    pub fn from_config(cfg: Config) -> Self {
        Self { cfg }
    }
}

impl Plugin for CorsPlugin {
    fn name(&self) -> &'static str {
        "CorsPlugin"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let cfg = self.cfg.clone();
        app.use_middleware(move |ctx, next| {
            let cfg = cfg.clone();
            async move { handle_cors(ctx, next, cfg).await }
        });
        Ok(())
    }
}

/// Resolves the `Access-Control-Allow-Origin` value for a request origin.
fn resolve_origin(cfg: &Config, origin: Option<&str>) -> Option<String> {
    match (&cfg.origins, origin) {
        (OriginPolicy::Any, _) if !cfg.allow_credentials => Some("*".to_string()),
        (OriginPolicy::Any, Some(o)) => Some(o.to_string()),
        (OriginPolicy::List(list), Some(o)) if list.iter().any(|p| p == o) => {
            Some(o.to_string())
        }
        (OriginPolicy::Predicate(pred), Some(o)) if pred(o) => Some(o.to_string()),
        _ => None,
    }
}

fn cors_headers(cfg: &Config, allow_origin: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    if cfg.allow_credentials {
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    headers
}

async fn handle_cors(ctx: Context, next: Next, cfg: Config) -> HttpResult {
    let origin = ctx.header("origin").map(str::to_owned);
    let allow_origin = resolve_origin(&cfg, origin.as_deref());

    // Preflight: OPTIONS plus a requested method.
    if ctx.method() == Method::OPTIONS
        && ctx.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    {
        let mut resp = hyper::Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(RushBody::empty())
            .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));

        if let Some(allow_origin) = &allow_origin {
            for (name, value) in cors_headers(&cfg, allow_origin).iter() {
                resp.headers_mut().insert(name.clone(), value.clone());
            }
            if allow_origin != "*" {
                crate::plugins::append_vary(resp.headers_mut(), "Origin");
            }
            if !cfg.methods.is_empty() {
                let methods = cfg
                    .methods
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                if let Ok(value) = HeaderValue::from_str(&methods) {
                    resp.headers_mut().insert(ACCESS_CONTROL_ALLOW_METHODS, value);
                }
            }
            if !cfg.headers.is_empty() {
                let names = cfg
                    .headers
                    .iter()
                    .map(HeaderName::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                if let Ok(value) = HeaderValue::from_str(&names) {
                    resp.headers_mut().insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
                }
            }
            if let Some(secs) = cfg.max_age_secs {
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    resp.headers_mut().insert(ACCESS_CONTROL_MAX_AGE, value);
                }
            }
        }
        return Ok(resp);
    }

    match allow_origin {
        Some(allow_origin) => {
            let headers = cors_headers(&cfg, &allow_origin);
            let specific_origin = allow_origin != "*";
            match next.run(ctx).await {
                Ok(mut resp) => {
                    for (name, value) in headers.iter() {
                        resp.headers_mut().insert(name.clone(), value.clone());
                    }
                    if specific_origin {
                        // Merge, never replace: compression may have put
                        // Accept-Encoding there already.
                        crate::plugins::append_vary(resp.headers_mut(), "Origin");
                    }
                    Ok(resp)
                }
                // Keep CORS headers on error responses built later.
                Err(err) => {
                    let mut headers = headers;
                    if specific_origin {
                        crate::plugins::append_vary(&mut headers, "Origin");
                    }
                    Err(err.with_headers(&headers))
                }
            }
        }
        None => next.run(ctx).await,
    }
}
