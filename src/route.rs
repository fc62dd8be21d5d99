//! Route definition and per-route middleware.
//!
//! A [`Route`] pairs a method and path pattern with its handler and an
//! optional route-local middleware chain. Patterns support literal segments,
//! `:name` parameters, a trailing `*` wildcard, and `(regex)` segments; the
//! radix tree in [`crate::router`] owns matching. Route-level middleware runs
//! after the application's global chain, in registration order.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::app::App;
//! use nextrush::context::Context;
//!
//! let mut app = App::new();
//! let route = app.get("/users/:id", |ctx: Context| async move {
//!     let id = ctx.params.get("id").unwrap_or("").to_owned();
//!     ctx.text(format!("user {id}"))
//! });
//! route.middleware(|ctx, next| async move {
//!     tracing::debug!("route-scoped middleware");
//!     next.run(ctx).await
//! });
//! ```

use std::{collections::VecDeque, future::Future, sync::Arc};

use http::Method;
use parking_lot::RwLock;

use crate::{
    context::Context,
    errors::HttpError,
    handler::BoxHandler,
    middleware::Next,
    responder::Responder,
    types::BoxMiddleware,
};

/// A registered route: pattern, method, handler, and route-local middleware.
pub struct Route {
    /// Original path pattern used to create this route.
    pub pattern: String,
    /// HTTP method this route responds to.
    pub method: Method,
    /// Handler to execute when the route is matched.
    pub(crate) handler: BoxHandler,
    /// Route-specific middleware chain.
    pub(crate) middlewares: RwLock<VecDeque<BoxMiddleware>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Creates a new route with the specified pattern, method, and handler.
    pub(crate) fn new(pattern: String, method: Method, handler: BoxHandler) -> Self {
        Self {
            pattern,
            method,
            handler,
            middlewares: RwLock::new(VecDeque::new()),
        }
    }

    /// Clones this route under a different pattern.
    ///
    /// Used when mounting sub-routers: the handler is shared, the middleware
    /// chain is copied so the mounted copy can be extended independently.
    pub(crate) fn with_pattern(&self, pattern: String) -> Self {
        Self {
            pattern,
            method: self.method.clone(),
            handler: self.handler.clone(),
            middlewares: RwLock::new(self.middlewares.read().clone()),
        }
    }

    /// Adds middleware to this route's execution chain.
    pub fn middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Context, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HttpError>> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |ctx, next| {
            let fut = f(ctx, next);
            Box::pin(async move { fut.await.map(Responder::into_response) })
        });

        self.middlewares.write().push_back(mw);
        self
    }

    /// Prepends middleware, used when a mounting router contributes its own
    /// chain ahead of the route's.
    pub(crate) fn push_front_middleware(&self, mw: BoxMiddleware) {
        self.middlewares.write().push_front(mw);
    }

    /// Snapshot of the route middleware chain, in execution order.
    pub(crate) fn middleware_chain(&self) -> Vec<BoxMiddleware> {
        self.middlewares.read().iter().cloned().collect()
    }

    /// The route's boxed handler.
    pub(crate) fn handler(&self) -> BoxHandler {
        self.handler.clone()
    }
}
