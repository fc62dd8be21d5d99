#![cfg_attr(docsrs, feature(doc_cfg))]

//! A context-first web framework for async applications.
//!
//! NextRush dispatches HTTP/1.1 requests through a user-configurable
//! middleware chain to handlers matched by a radix-tree router, and upgrades
//! WebSocket connections on the same listening socket. Every request travels
//! as a pooled [`context::Context`] carrying the parsed request surface,
//! route parameters, per-request state, and the staged response.
//!
//! # High-level features
//! - Radix-tree routing with `:name` params, `*` wildcards, `(regex)`
//!   segments, and an LRU result cache
//! - Koa-style middleware: `(ctx, next)` with exactly-once continuation
//! - Typed error taxonomy with ordered exception filters
//! - Content-Type-dispatched body parsing (JSON, forms, multipart uploads,
//!   text, raw) with streaming limits
//! - Static file serving: ETags, conditional 304s, byte ranges, LRU memory
//!   cache, gzip/brotli precompression, SPA fallback
//! - RFC 6455 WebSockets with rooms, broadcast/emit fanout, and bounded
//!   per-connection write queues
//! - Built-in middleware plugins: CORS, compression, rate limiting, helmet,
//!   request ids, body limits
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x
//!
//! # Quickstart
//!
//! ```rust,no_run
//! use nextrush::{app::App, serve};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = App::new();
//! app.get("/users/:id", |ctx: nextrush::context::Context| async move {
//!     let id = ctx.params.get("id").unwrap_or("").to_owned();
//!     ctx.json(&serde_json::json!({ "id": id }))
//! });
//!
//! let listener = TcpListener::bind("127.0.0.1:3000").await?;
//! serve(listener, app).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Key concepts
//! - [app::App] wires configuration, routes, middleware, plugins, and
//!   filters together.
//! - [context::Context] is the per-request carrier; handlers consume it and
//!   finish it into a response.
//! - [router::Router] resolves `(method, path)` to handlers in
//!   O(path-length).
//! - [middleware::Next] composes the cooperative middleware chain.
//! - [errors::HttpError] is the typed error surface converted by
//!   [errors::ExceptionFilter]s.
//! - [plugins] hold the cross-cutting middleware factories.

/// Application facade and dispatch pipeline.
pub mod app;

/// HTTP response body wrapper.
pub mod body;

/// Request body intake and Content-Type-dispatched parsing.
pub mod bodyparser;

/// Application configuration.
pub mod config;

/// Application-scoped service container.
pub mod container;

/// Per-request context and pooling.
pub mod context;

/// Typed errors and exception filters.
pub mod errors;

/// Request handler traits and boxing.
mod handler;

/// Middleware chain and built-in middleware.
pub mod middleware;

/// Cross-cutting middleware plugins.
pub mod plugins;

/// Response conversion traits.
pub mod responder;

/// Route definition and per-route middleware.
pub mod route;

/// Radix-tree routing, route cache, parameter pooling.
pub mod router;

/// HTTP server loop and graceful shutdown.
mod server;

/// Static file serving.
pub mod r#static;

/// Tracing subscriber setup.
pub mod tracing;

/// Core type aliases.
pub mod types;

/// WebSocket upgrades, connections, and rooms.
pub mod ws;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use http_body_util::Full;
pub use responder::NOT_FOUND;

/// Starts the HTTP server with the given listener and application.
///
/// This is the main entry point. The function takes ownership of a TCP
/// listener and the application, then serves incoming connections until the
/// process ends.
///
/// # Examples
///
/// ```rust,no_run
/// use nextrush::{serve, app::App};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let app = App::new();
/// serve(listener, app).await;
/// # Ok(())
/// # }
/// ```
pub use server::serve;

/// Starts the HTTP server and drains gracefully when `shutdown` resolves.
pub use server::serve_with_shutdown;

pub use handler::BoxHandler;
