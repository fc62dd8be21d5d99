//! Plugin system for extending the application with composable modules.
//!
//! A plugin packages a middleware factory with its configuration: CORS,
//! compression, rate limiting, the body parser, and static mounts all ship
//! as plugins. Registration order matters — each plugin's `setup` appends
//! its middleware to the application's global chain. Plugins are set up
//! exactly once, when the server starts.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::app::App;
//! use nextrush::plugins::{Plugin, cors::CorsBuilder, rate_limiter::RateLimiterBuilder};
//!
//! let mut app = App::new();
//! app.plugin(CorsBuilder::new().allow_origin("https://app.example").build());
//! app.plugin(RateLimiterBuilder::new().max(100).build());
//! ```

use anyhow::Result;
use http::{HeaderMap, HeaderValue, header::VARY};

use crate::app::App;

pub mod compression;
pub mod cors;
pub mod rate_limiter;

/// Trait implemented by application plugins.
pub trait Plugin: Send + Sync + 'static {
    /// Unique name used in logs.
    fn name(&self) -> &'static str;

    /// Configures the plugin against the application, typically by
    /// registering middleware. Called once at server startup.
    fn setup(&self, app: &App) -> Result<()>;
}

/// Appends a member to the `Vary` header, preserving values other
/// middleware already contributed. `Vary` is additive per RFC 9110:
/// replacing it would drop another plugin's cache key dimension.
pub(crate) fn append_vary(headers: &mut HeaderMap, value: &str) {
    let merged = match headers.get(VARY).and_then(|v| v.to_str().ok()) {
        Some(existing) => {
            if existing == "*"
                || existing
                    .split(',')
                    .map(str::trim)
                    .any(|member| member.eq_ignore_ascii_case(value))
            {
                return;
            }
            format!("{existing}, {value}")
        }
        None => value.to_string(),
    };
    if let Ok(merged) = HeaderValue::from_str(&merged) {
        headers.insert(VARY, merged);
    }
}
