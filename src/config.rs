//! Application configuration.
//!
//! [`AppConfig`] is the single options object consumed by the application
//! factory. Every field has a default; deserialization (`serde`) accepts
//! partial documents. Middleware-factory defaults (request id, body parser,
//! helmet, compression) install their plugin automatically when the section
//! is present; CORS and rate limiting carry non-serializable parts
//! (predicates, key functions) and are set programmatically.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::config::AppConfig;
//!
//! let config: AppConfig = serde_json::from_str(
//!     r#"{ "port": 8080, "trust_proxy": true, "route_cache_size": 500 }"#,
//! ).unwrap();
//! assert_eq!(config.port, 8080);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::{
    bodyparser::BodyParserOptions,
    middleware::{helmet::HelmetOptions, request_id::RequestIdOptions},
    plugins::{compression, cors, rate_limiter},
    ws::{OverflowPolicy, WsRuntimeOptions},
};

/// Per-connection timeout settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request deadline in milliseconds; `None` disables it.
    pub request_ms: Option<u64>,
    /// Header read deadline in milliseconds.
    pub headers_ms: u64,
    /// HTTP/1.1 keep-alive.
    pub keep_alive: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: Some(30_000),
            headers_ms: 10_000,
            keep_alive: true,
        }
    }
}

/// WebSocket subsystem options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Maximum reassembled message size in bytes.
    pub max_message_size: usize,
    /// Maximum number of concurrently live rooms.
    pub max_rooms: usize,
    /// Empty-room sweep interval in milliseconds.
    pub cleanup_interval_ms: u64,
    /// Handshake origin allow-list; `None` accepts any origin.
    pub allowed_origins: Option<Vec<String>>,
    /// Supported subprotocols.
    pub subprotocols: Vec<String>,
    /// Bounded write-queue depth per connection.
    pub send_queue: usize,
    /// Behavior when a write queue is saturated.
    pub overflow: OverflowPolicy,
    /// Read idle timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            max_rooms: 1000,
            cleanup_interval_ms: 30_000,
            allowed_origins: None,
            subprotocols: Vec::new(),
            send_queue: 64,
            overflow: OverflowPolicy::Block,
            idle_timeout_ms: 60_000,
        }
    }
}

impl WsConfig {
    /// Renders the per-endpoint runtime options.
    pub(crate) fn runtime(&self) -> WsRuntimeOptions {
        WsRuntimeOptions {
            max_message_size: self.max_message_size,
            allowed_origins: self.allowed_origins.clone(),
            subprotocols: self.subprotocols.clone(),
            send_queue: self.send_queue,
            overflow: self.overflow,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }

    /// Sweep interval as a duration.
    pub(crate) fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Top-level application options.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Honor `X-Forwarded-*` for client IP and protocol.
    pub trust_proxy: bool,
    /// Default request body cap in bytes.
    pub max_body_size: usize,
    /// LRU capacity of the route matcher cache.
    pub route_cache_size: usize,
    /// Bound on idle pooled context shells.
    pub context_pool_size: usize,
    /// Grace period for in-flight requests at shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Connection timeouts.
    pub timeouts: TimeoutConfig,
    /// WebSocket options.
    pub ws: WsConfig,
    /// Install the request-id middleware with these options.
    pub request_id: Option<RequestIdOptions>,
    /// Install the body parser with these options.
    pub body_parser: Option<BodyParserOptions>,
    /// Install helmet with these options.
    pub helmet: Option<HelmetOptions>,
    /// Install response compression with these options.
    pub compression: Option<compression::Config>,
    /// Install CORS with these options. Carries predicates, so it is set
    /// programmatically rather than deserialized.
    #[serde(skip)]
    pub cors: Option<cors::Config>,
    /// Install rate limiting with these options. Carries the key function,
    /// so it is set programmatically rather than deserialized.
    #[serde(skip)]
    pub rate_limit: Option<rate_limiter::Config>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            trust_proxy: false,
            max_body_size: 1024 * 1024,
            route_cache_size: 1000,
            context_pool_size: 256,
            shutdown_grace_ms: 10_000,
            timeouts: TimeoutConfig::default(),
            ws: WsConfig::default(),
            request_id: None,
            body_parser: None,
            helmet: None,
            compression: None,
            cors: None,
            rate_limit: None,
        }
    }
}
