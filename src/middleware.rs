//! Middleware system for request processing pipelines.
//!
//! Middleware composes around the route handler as an ordered chain. Each
//! middleware receives the request [`Context`] and a [`Next`] continuation;
//! running the continuation resumes the rest of the chain and returns only
//! after the downstream sub-chain has fully completed, so code after
//! `next.run(ctx).await` sees the finished response. Dispatch is cooperative
//! and strictly sequential within one request.
//!
//! `Next` is consumed by value. Resuming the chain twice from one frame is
//! therefore impossible to express, and a middleware that drops `Next`
//! without running it ends the chain and must produce the response itself.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::middleware::Next;
//! use nextrush::context::Context;
//! use nextrush::types::HttpResult;
//!
//! async fn timing(ctx: Context, next: Next) -> HttpResult {
//!     let start = ctx.start();
//!     let resp = next.run(ctx).await?;
//!     tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "handled");
//!     Ok(resp)
//! }
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    context::Context,
    handler::BoxHandler,
    types::{BoxMiddleware, HttpResult},
};

pub mod body_limit;
pub mod helmet;
pub mod request_id;

/// Trait for converting configured components into middleware functions.
pub trait IntoMiddleware {
    fn into_middleware(
        self,
    ) -> impl Fn(Context, Next) -> Pin<Box<dyn Future<Output = HttpResult> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static;
}

/// Represents the next step in the middleware execution chain.
///
/// `Next` holds the remaining middlewares and the final endpoint. Each call
/// to [`Next::run`] peels one middleware off the front and hands the rest to
/// it, until the endpoint is reached.
pub struct Next {
    /// Remaining middlewares to be executed in the chain.
    pub(crate) middlewares: Arc<Vec<BoxMiddleware>>,
    /// Final endpoint handler to be called after all middlewares.
    pub(crate) endpoint: Arc<BoxHandler>,
}

impl Next {
    /// Builds a chain over the given middlewares ending at `endpoint`.
    pub fn new(middlewares: Arc<Vec<BoxMiddleware>>, endpoint: Arc<BoxHandler>) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    /// Executes the next middleware or the endpoint.
    ///
    /// Returns once the downstream sub-chain has completed, including its
    /// async tails.
    pub async fn run(self, ctx: Context) -> HttpResult {
        if let Some((mw, rest)) = self.middlewares.split_first() {
            let rest = Arc::new(rest.to_vec());
            mw(
                ctx,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint.clone(),
                },
            )
            .await
        } else {
            self.endpoint.call(ctx).await
        }
    }
}
