//! Core type definitions and aliases used throughout the NextRush framework.
//!
//! This module provides the fundamental type aliases shared across the framework
//! for requests, responses, errors, and middleware. `Request` carries the raw
//! streaming body from Hyper; `Response` uses the framework's [`RushBody`]. The
//! middleware alias fixes the context-passing signature every middleware in the
//! chain must satisfy.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::types::{HttpResult, BoxMiddleware};
//! use nextrush::context::Context;
//! use nextrush::middleware::Next;
//! use std::sync::Arc;
//!
//! // A middleware that tags every request before passing it on.
//! let tag: BoxMiddleware = Arc::new(|ctx: Context, next: Next| {
//!     Box::pin(async move {
//!         tracing::debug!(path = %ctx.path(), "incoming");
//!         next.run(ctx).await
//!     })
//! });
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::BoxBody as HttpBoxBody;
use hyper::body::Incoming;

use crate::{body::RushBody, context::Context, errors::HttpError, middleware::Next};

/// HTTP request type with streaming body support.
///
/// The body is `hyper::body::Incoming`: it has not been consumed yet and is
/// read on demand by the body parser or by handlers that stream.
pub type Request = hyper::Request<Incoming>;

/// HTTP response type using the framework body wrapper.
pub type Response = hyper::Response<RushBody>;

/// Result type flowing through the middleware chain.
///
/// `Ok` carries a finished response; `Err` carries a typed [`HttpError`] that
/// the exception-filter stack converts into an HTTP response at the edge of
/// the pipeline.
pub type HttpResult = Result<Response, HttpError>;

/// Boxed HTTP body type for internal response handling.
pub(crate) type BoxBody = HttpBoxBody<Bytes, BoxError>;

/// Boxed error type for thread-safe error handling.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed middleware function type for dynamic middleware composition.
///
/// A middleware receives exclusive ownership of the request [`Context`] and a
/// [`Next`] continuation. Running the continuation resumes the rest of the
/// chain; dropping it ends the chain, in which case the middleware must
/// produce the response itself. `Next` is consumed by value, so the chain can
/// only be resumed once per frame.
pub type BoxMiddleware =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, HttpResult> + Send + Sync>;
