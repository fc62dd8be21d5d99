//! Application facade: routes, middleware, plugins, filters, dispatch.
//!
//! [`App`] ties the pieces together. A request flows: context acquired from
//! the pool → global middleware chain → routing endpoint (router lookup
//! populates `ctx.params`, then route middleware and the handler run) →
//! response. Errors anywhere in the chain surface as typed [`HttpError`]s
//! and are converted by the exception-filter stack at the edge; the context
//! shell and parameter map return to their pools on every path, including
//! panics.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::app::App;
//! use nextrush::context::Context;
//! use nextrush::plugins::cors::CorsBuilder;
//!
//! let mut app = App::new();
//! app.plugin(CorsBuilder::new().build());
//! app.get("/users/:id", |ctx: Context| async move {
//!     let id = ctx.params.get("id").unwrap_or("").to_owned();
//!     ctx.json(&serde_json::json!({ "id": id }))
//! });
//! ```

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use futures_util::FutureExt;
use http::Method;
use hyper::body::Body;
use parking_lot::{Mutex, RwLock};

use crate::{
    config::AppConfig,
    container::ServiceContainer,
    context::{Context, ContextPool},
    errors::{ErrorScope, ExceptionFilter, FilterStack, HttpError},
    handler::{BoxHandler, Handler},
    middleware::Next,
    plugins::Plugin,
    responder::Responder,
    route::Route,
    router::{RouteLookup, Router},
    types::{BoxError, BoxMiddleware, Response},
    ws::{RoomManager, WsConnection, WsReceiver, WsUpgrade},
};

/// The application: configuration, router, middleware, plugins, filters,
/// and the shared runtime resources (context pool, room registry, service
/// container).
pub struct App {
    config: AppConfig,
    router: Router,
    middlewares: RwLock<Vec<BoxMiddleware>>,
    plugins: Mutex<Vec<Box<dyn Plugin>>>,
    plugins_initialized: AtomicBool,
    filters: RwLock<FilterStack>,
    container: ServiceContainer,
    ctx_pool: Arc<ContextPool>,
    rooms: Arc<RoomManager>,
    shutdown_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Creates an application with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Creates an application from a configuration object.
    ///
    /// Middleware sections present in the configuration (request id, helmet,
    /// CORS, compression, rate limit, body parser) install their plugin
    /// automatically, in that order.
    pub fn with_config(config: AppConfig) -> Self {
        let app = Self {
            router: Router::with_cache_capacity(config.route_cache_size),
            ctx_pool: ContextPool::new(config.context_pool_size),
            rooms: RoomManager::new(config.ws.max_rooms),
            middlewares: RwLock::new(Vec::new()),
            plugins: Mutex::new(Vec::new()),
            plugins_initialized: AtomicBool::new(false),
            filters: RwLock::new(FilterStack::new()),
            container: ServiceContainer::new(),
            shutdown_hooks: Mutex::new(Vec::new()),
            config,
        };
        app.install_configured_plugins();
        app
    }

    fn install_configured_plugins(&self) {
        use crate::bodyparser::BodyParser;
        use crate::middleware::helmet::Helmet;
        use crate::middleware::request_id::RequestId;
        use crate::plugins::{
            compression::CompressionPlugin, cors::CorsPlugin, rate_limiter::RateLimiterBuilder,
        };

        if let Some(opts) = self.config.request_id.clone() {
            self.plugin(RequestId::new(opts));
        }
        if let Some(opts) = self.config.helmet.clone() {
            self.plugin(Helmet::new(opts));
        }
        if let Some(cfg) = self.config.cors.clone() {
            self.plugin(CorsPlugin::from_config(cfg));
        }
        if let Some(cfg) = self.config.compression.clone() {
            self.plugin(CompressionPlugin::from_config(cfg));
        }
        if let Some(cfg) = self.config.rate_limit.clone() {
            self.plugin(RateLimiterBuilder::from_config(cfg).build());
        }
        if let Some(opts) = self.config.body_parser.clone() {
            self.plugin(BodyParser::new(opts));
        }
    }

    /// The application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The service container.
    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// The WebSocket room registry.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// The router, for direct registration or inspection.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Registers a route for any method.
    pub fn route<H, T>(&self, method: Method, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.router.route(method, pattern, handler)
    }

    /// Registers a GET route.
    pub fn get<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::GET, pattern, handler)
    }

    /// Registers a POST route.
    pub fn post<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::POST, pattern, handler)
    }

    /// Registers a PUT route.
    pub fn put<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::PUT, pattern, handler)
    }

    /// Registers a PATCH route.
    pub fn patch<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::PATCH, pattern, handler)
    }

    /// Registers a DELETE route.
    pub fn delete<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Registers an OPTIONS route.
    pub fn options<H, T>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        self.route(Method::OPTIONS, pattern, handler)
    }

    /// Registers a WebSocket endpoint.
    ///
    /// The handler receives the connection handle and the inbound message
    /// channel once the upgrade completes.
    pub fn ws<H, Fut>(&self, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Fn(WsConnection, WsReceiver) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rooms = self.rooms.clone();
        let opts = self.config.ws.runtime();
        self.route(Method::GET, pattern, move |ctx: Context| {
            let rooms = rooms.clone();
            let opts = opts.clone();
            let handler = handler.clone();
            async move { WsUpgrade::new(ctx, handler, rooms, opts) }
        })
    }

    /// Appends global middleware, run for every request in registration
    /// order, before routing.
    pub fn use_middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Context, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HttpError>> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |ctx, next| {
            let fut = f(ctx, next);
            Box::pin(async move { fut.await.map(Responder::into_response) })
        });
        self.middlewares.write().push(mw);
        self
    }

    /// Registers a plugin; its middleware is installed when the server
    /// starts (or on first dispatch).
    pub fn plugin<P: Plugin>(&self, plugin: P) -> &Self {
        self.plugins.lock().push(Box::new(plugin));
        self
    }

    /// Appends an exception filter; earlier filters win.
    pub fn filter<F: ExceptionFilter>(&self, filter: F) -> &Self {
        self.filters.write().push(Arc::new(filter));
        self
    }

    /// Mounts a sub-router under a prefix.
    pub fn mount(&self, prefix: &str, router: Router) {
        self.router.mount(prefix, router);
    }

    /// Registers a hook run during shutdown.
    pub fn on_shutdown<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.shutdown_hooks.lock().push(Box::new(hook));
    }

    /// Runs each registered plugin's setup exactly once.
    pub fn setup_plugins_once(&self) {
        if self.plugins_initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let plugins = self.plugins.lock();
        for plugin in plugins.iter() {
            if let Err(err) = plugin.setup(self) {
                tracing::error!(plugin = plugin.name(), error = %err, "plugin setup failed");
            }
        }
    }

    /// Dispatches one request through the pipeline and returns the
    /// response.
    ///
    /// Errors escaping the chain go through the filter stack; a panic in
    /// the chain is caught, logged, and converted to a 500 so the
    /// connection (and server) survive.
    pub async fn dispatch<B>(self: &Arc<Self>, req: http::Request<B>, addr: SocketAddr) -> Response
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        self.setup_plugins_once();

        let scope = ErrorScope {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            request_id: None,
        };

        let ctx = self
            .ctx_pool
            .acquire(req, addr, self.config.trust_proxy);

        let app = self.clone();
        let routing = move |mut ctx: Context| {
            let app = app.clone();
            async move {
                if !known_method(ctx.method()) {
                    return Err(HttpError::not_implemented("unsupported HTTP method"));
                }
                match app.router.find(ctx.method(), ctx.path()) {
                    RouteLookup::Found(matched) => {
                        ctx.params = matched.params;
                        let chain = matched.route.middleware_chain();
                        Next::new(Arc::new(chain), Arc::new(matched.route.handler()))
                            .run(ctx)
                            .await
                    }
                    RouteLookup::MethodNotAllowed(allow) => {
                        Err(HttpError::method_not_allowed(allow))
                    }
                    RouteLookup::NotFound => Err(HttpError::not_found("not found")),
                }
            }
        };

        let global = Arc::new(self.middlewares.read().clone());
        let chain = Next::new(global, Arc::new(BoxHandler::new(routing)));

        let result = std::panic::AssertUnwindSafe(chain.run(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(
                    method = %scope.method,
                    path = %scope.path,
                    "handler panicked"
                );
                Err(HttpError::internal("internal server error"))
            });

        match result {
            Ok(resp) => resp,
            Err(err) => {
                // Snapshot the stack so no lock guard lives across the await.
                let filters = self.filters.read().clone();
                filters.handle(err, &scope).await
            }
        }
    }

    /// Tears down application-scoped state: runs shutdown hooks, clears the
    /// context pool, the route cache, the room registry, and the container.
    pub fn shutdown(&self) {
        let hooks: Vec<Box<dyn FnOnce() + Send>> =
            std::mem::take(&mut *self.shutdown_hooks.lock());
        for hook in hooks {
            hook();
        }
        self.ctx_pool.clear();
        self.router.clear_cache();
        self.rooms.clear();
        self.container.clear();
    }
}

/// Whether the framework handles this HTTP method at all.
///
/// Anything outside the standard set answers 501 before routing runs;
/// 404/405 are reserved for paths and methods the application could have
/// registered.
fn known_method(method: &Method) -> bool {
    *method == Method::GET
        || *method == Method::HEAD
        || *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
        || *method == Method::OPTIONS
        || *method == Method::TRACE
        || *method == Method::CONNECT
}
