//! Request handler traits and implementations.
//!
//! Handlers are asynchronous functions that consume the request [`Context`]
//! and produce a response. Two shapes are accepted through the marker-typed
//! [`Handler`] trait: infallible handlers returning any [`Responder`], and
//! fallible handlers returning `Result<impl Responder, HttpError>` whose
//! errors flow to the exception filters. `BoxHandler` erases the shape for
//! storage in routes.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::context::Context;
//! use nextrush::errors::HttpError;
//! use nextrush::responder::Responder;
//!
//! // Infallible: the return value is converted directly.
//! async fn health(_ctx: Context) -> &'static str {
//!   "OK"
//! }
//!
//! // Fallible: errors are routed to the exception filters.
//! async fn show(ctx: Context) -> Result<String, HttpError> {
//!   let id = ctx
//!     .params
//!     .get("id")
//!     .ok_or_else(|| HttpError::bad_request("missing id"))?
//!     .to_owned();
//!   Ok(format!("user {id}"))
//! }
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
  context::Context,
  errors::HttpError,
  responder::Responder,
  types::HttpResult,
};

/// Trait for asynchronous request handlers.
///
/// The marker parameter `T` disambiguates the accepted return shapes; user
/// code never names it.
pub trait Handler<T>: Send + Sync + 'static {
  /// Future type returned by the handler.
  type Future: Future<Output = HttpResult> + Send + 'static;

  /// Calls the handler with the given context.
  fn call(self, ctx: Context) -> Self::Future;
}

/// Type-erased handler wrapper for dynamic storage and composition.
#[derive(Clone)]
pub struct BoxHandler {
  inner: Arc<dyn Fn(Context) -> BoxFuture<'static, HttpResult> + Send + Sync>,
}

impl BoxHandler {
  /// Creates a new boxed handler from any handler implementation.
  pub(crate) fn new<H, T>(h: H) -> Self
  where
    H: Handler<T> + Clone,
  {
    let inner = Arc::new(move |ctx: Context| {
      let handler = h.clone();
      Box::pin(async move { handler.call(ctx).await }) as BoxFuture<'_, HttpResult>
    });

    Self { inner }
  }

  /// Calls the boxed handler with the provided context.
  pub(crate) fn call(&self, ctx: Context) -> BoxFuture<'static, HttpResult> {
    (self.inner)(ctx)
  }
}

// Infallible handlers: `async fn handler(ctx: Context) -> impl Responder`.
impl<F, Fut, R> Handler<((), R)> for F
where
  F: FnOnce(Context) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = R> + Send + 'static,
  R: Responder,
{
  type Future = Pin<Box<dyn Future<Output = HttpResult> + Send>>;

  fn call(self, ctx: Context) -> Self::Future {
    Box::pin(async move { Ok((self)(ctx).await.into_response()) })
  }
}

// Fallible handlers: `async fn handler(ctx: Context) -> Result<impl Responder, HttpError>`.
impl<F, Fut, R> Handler<(HttpError, R)> for F
where
  F: FnOnce(Context) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = Result<R, HttpError>> + Send + 'static,
  R: Responder,
{
  type Future = Pin<Box<dyn Future<Output = HttpResult> + Send>>;

  fn call(self, ctx: Context) -> Self::Future {
    Box::pin(async move { Ok((self)(ctx).await?.into_response()) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::ContextPool;
  use http::StatusCode;
  use http_body_util::Empty;
  use std::net::{IpAddr, Ipv4Addr, SocketAddr};

  fn ctx() -> Context {
    let pool = ContextPool::new(1);
    let req = http::Request::builder()
      .uri("/")
      .body(Empty::<bytes::Bytes>::new())
      .unwrap();
    pool.acquire(
      req,
      SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
      false,
    )
  }

  #[tokio::test]
  async fn infallible_handler_boxes() {
    async fn h(_ctx: Context) -> &'static str {
      "ok"
    }
    let boxed = BoxHandler::new(h);
    let resp = boxed.call(ctx()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn fallible_handler_propagates_errors() {
    async fn h(_ctx: Context) -> Result<&'static str, HttpError> {
      Err(HttpError::forbidden("no"))
    }
    let boxed = BoxHandler::new(h);
    let err = boxed.call(ctx()).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
  }
}
