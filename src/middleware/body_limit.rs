//! Request body size limiting middleware.
//!
//! Rejects oversized requests early using the Content-Length header when the
//! client declares one, before any body bytes are read. Requests without a
//! declared length are still bounded later by the body parser's streaming
//! limit; this middleware is the cheap first gate. A dynamic limit function
//! can vary the cap per request, e.g. a higher budget for upload paths.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::middleware::body_limit::BodyLimit;
//! use nextrush::middleware::IntoMiddleware;
//!
//! // Static 1 MiB cap.
//! let limit = BodyLimit::new(1024 * 1024);
//! let middleware = limit.into_middleware();
//!
//! // Upload paths get more headroom.
//! let dynamic = BodyLimit::with_dynamic_limit(|ctx| {
//!   if ctx.path().starts_with("/upload") {
//!     50 * 1024 * 1024
//!   } else {
//!     1024 * 1024
//!   }
//! });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::errors::HttpError;
use crate::middleware::{IntoMiddleware, Next};
use crate::types::HttpResult;

/// Body size limiting middleware configuration.
pub struct BodyLimit<F>
where
  F: Fn(&Context) -> usize + Send + Sync + 'static,
{
  /// Static size limit in bytes, if configured.
  limit: Option<usize>,
  /// Dynamic limit function taking precedence over the static one.
  dynamic_limit: Option<F>,
}

impl BodyLimit<fn(&Context) -> usize> {
  /// Creates a body limit with a fixed cap.
  pub fn new(limit: usize) -> Self {
    Self {
      limit: Some(limit),
      dynamic_limit: None,
    }
  }
}

impl<F> BodyLimit<F>
where
  F: Fn(&Context) -> usize + Send + Sync + 'static,
{
  /// Creates a body limit computed per request.
  pub fn with_dynamic_limit(f: F) -> Self {
    Self {
      limit: None,
      dynamic_limit: Some(f),
    }
  }

  /// Creates a body limit with both a static cap and a per-request override.
  pub fn new_with_dynamic(limit: usize, f: F) -> Self {
    Self {
      limit: Some(limit),
      dynamic_limit: Some(f),
    }
  }
}

impl<F> IntoMiddleware for BodyLimit<F>
where
  F: Fn(&Context) -> usize + Send + Sync + 'static,
{
  fn into_middleware(
    self,
  ) -> impl Fn(Context, Next) -> Pin<Box<dyn Future<Output = HttpResult> + Send + 'static>>
  + Clone
  + Send
  + Sync
  + 'static {
    let static_limit = self.limit;
    let dynamic_limit = self.dynamic_limit.map(Arc::new);

    move |ctx: Context, next: Next| {
      let dynamic_limit = dynamic_limit.clone();

      Box::pin(async move {
        // Effective limit: dynamic, then static, then 10 MiB.
        let limit = dynamic_limit
          .as_ref()
          .map(|f| f(&ctx))
          .or(static_limit)
          .unwrap_or(10 * 1024 * 1024);

        if let Some(len) = ctx
          .header("content-length")
          .and_then(|v| v.parse::<usize>().ok())
        {
          if len > limit {
            return Err(HttpError::payload_too_large(format!(
              "declared body of {len} bytes exceeds limit of {limit}"
            )));
          }
        }

        next.run(ctx).await
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::ContextPool;
  use crate::handler::BoxHandler;
  use bytes::Bytes;
  use http::StatusCode;
  use http_body_util::Empty;
  use std::net::{IpAddr, Ipv4Addr, SocketAddr};

  fn ctx(path: &str, content_length: Option<usize>) -> Context {
    let pool = ContextPool::new(1);
    let mut builder = http::Request::builder().method(http::Method::POST).uri(path);
    if let Some(len) = content_length {
      builder = builder.header("content-length", len.to_string());
    }
    let req = builder.body(Empty::<Bytes>::new()).unwrap();
    pool.acquire(
      req,
      SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
      false,
    )
  }

  fn endpoint() -> Next {
    async fn h(_ctx: Context) -> &'static str {
      "ok"
    }
    Next::new(Arc::new(Vec::new()), Arc::new(BoxHandler::new(h)))
  }

  #[tokio::test]
  async fn oversized_declared_bodies_are_rejected() {
    let mw = BodyLimit::new(100).into_middleware();
    let err = mw(ctx("/", Some(500)), endpoint()).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
  }

  #[tokio::test]
  async fn requests_within_the_limit_pass() {
    let mw = BodyLimit::new(100).into_middleware();
    let resp = mw(ctx("/", Some(50)), endpoint()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn dynamic_limit_overrides_static() {
    let mw = BodyLimit::new_with_dynamic(100, |ctx: &Context| {
      if ctx.path().starts_with("/upload") { 1000 } else { 100 }
    })
    .into_middleware();

    let resp = mw(ctx("/upload", Some(500)), endpoint()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let err = mw(ctx("/other", Some(500)), endpoint()).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
  }
}
