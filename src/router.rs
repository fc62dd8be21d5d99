//! Request routing: radix-tree matching, route cache, and parameter pooling.
//!
//! The router resolves `(method, path)` to a handler and its parameter
//! bindings in time proportional to the number of path segments, independent
//! of how many routes are registered. Patterns are inserted into a radix tree
//! over path segments; lookups walk the tree one segment at a time with a
//! fixed precedence at every node: exact static child, then a matching regex
//! child, then the parameter child, then the wildcard child (which consumes
//! the remaining path).
//!
//! Recent lookups — hits, method mismatches, and misses alike — are kept in
//! an LRU cache keyed `METHOD:path`. Any registration invalidates the cache.
//! Parameter maps are pooled and handed out as drop guards, so a released map
//! can never be observed by a later request.
//!
//! # Examples
//!
//! ```rust
//! use http::Method;
//! use nextrush::router::{Router, RouteLookup};
//! use nextrush::context::Context;
//!
//! let router = Router::new();
//! router.route(Method::GET, "/users/:id", |ctx: Context| async move {
//!     let id = ctx.params.get("id").unwrap_or("").to_owned();
//!     ctx.text(id)
//! });
//!
//! match router.find(&Method::GET, "/users/42") {
//!     RouteLookup::Found(m) => assert_eq!(m.params.get("id"), Some("42")),
//!     _ => unreachable!(),
//! }
//! ```

use std::{collections::HashMap, future::Future, num::NonZeroUsize, sync::Arc};

use http::Method;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::{
    context::Context,
    errors::HttpError,
    handler::{BoxHandler, Handler},
    middleware::Next,
    responder::Responder,
    route::Route,
    types::BoxMiddleware,
};

/// Default LRU capacity for the route-result cache.
pub const DEFAULT_ROUTE_CACHE_SIZE: usize = 1000;

/// Default bound on idle pooled parameter maps.
const DEFAULT_PARAM_POOL_SIZE: usize = 128;

/// Errors surfaced at route registration time.
#[derive(Debug)]
pub enum RouterError {
    /// Two patterns disagree on the parameter name at a shared position.
    ParamConflict {
        pattern: String,
        existing: String,
        conflicting: String,
    },
    /// A `*` wildcard appeared before the final segment.
    WildcardNotLast { pattern: String },
    /// A `(regex)` segment failed to compile.
    InvalidRegex { pattern: String, error: String },
    /// A `:` parameter segment with no name.
    EmptyParamName { pattern: String },
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::ParamConflict {
                pattern,
                existing,
                conflicting,
            } => write!(
                f,
                "conflicting parameter names in '{pattern}': ':{conflicting}' collides with ':{existing}' registered at the same position"
            ),
            RouterError::WildcardNotLast { pattern } => {
                write!(f, "wildcard '*' must be the final segment in '{pattern}'")
            }
            RouterError::InvalidRegex { pattern, error } => {
                write!(f, "invalid regex segment in '{pattern}': {error}")
            }
            RouterError::EmptyParamName { pattern } => {
                write!(f, "parameter segment with empty name in '{pattern}'")
            }
        }
    }
}

impl std::error::Error for RouterError {}

/// Pooled parameter map handed to a matched request.
///
/// The map returns to its pool when the guard drops, whichever way the
/// request ends. A detached guard (no match yet) reads as empty.
pub struct Params {
    map: Option<HashMap<String, String>>,
    pool: Option<Arc<ParamPool>>,
}

impl Params {
    /// An empty guard not connected to any pool.
    pub(crate) fn detached() -> Self {
        Self {
            map: None,
            pool: None,
        }
    }

    /// Parameter value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.as_ref()?.get(name).map(String::as_str)
    }

    /// Number of captured parameters.
    pub fn len(&self) -> usize {
        self.map.as_ref().map(HashMap::len).unwrap_or(0)
    }

    /// Whether any parameters were captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates captured `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn insert(&mut self, name: String, value: String) {
        if let Some(map) = self.map.as_mut() {
            map.insert(name, value);
        }
    }

    fn clear(&mut self) {
        if let Some(map) = self.map.as_mut() {
            map.clear();
        }
    }
}

impl Drop for Params {
    fn drop(&mut self) {
        if let (Some(map), Some(pool)) = (self.map.take(), self.pool.take()) {
            pool.release(map);
        }
    }
}

/// Bounded pool of parameter maps.
///
/// Acquire clears the recycled map by deleting keys rather than reallocating,
/// so capacity carries over between requests.
pub(crate) struct ParamPool {
    maps: Mutex<Vec<HashMap<String, String>>>,
    max_size: usize,
}

impl ParamPool {
    fn new(max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            maps: Mutex::new(Vec::new()),
            max_size,
        })
    }

    fn acquire(self: &Arc<Self>) -> Params {
        let mut map = self.maps.lock().pop().unwrap_or_default();
        map.clear();
        Params {
            map: Some(map),
            pool: Some(self.clone()),
        }
    }

    fn release(&self, map: HashMap<String, String>) {
        let mut maps = self.maps.lock();
        if maps.len() < self.max_size {
            maps.push(map);
        }
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.maps.lock().len()
    }
}

/// One segment of a parsed path pattern.
enum SegmentKind {
    Literal(String),
    Param(String),
    Wildcard,
    Regex(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<SegmentKind>, RouterError> {
    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        if *seg == "*" {
            if i + 1 != raw.len() {
                return Err(RouterError::WildcardNotLast {
                    pattern: pattern.to_string(),
                });
            }
            segments.push(SegmentKind::Wildcard);
        } else if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(RouterError::EmptyParamName {
                    pattern: pattern.to_string(),
                });
            }
            segments.push(SegmentKind::Param(name.to_string()));
        } else if seg.len() >= 2 && seg.starts_with('(') && seg.ends_with(')') {
            segments.push(SegmentKind::Regex(seg[1..seg.len() - 1].to_string()));
        } else {
            segments.push(SegmentKind::Literal((*seg).to_string()));
        }
    }
    Ok(segments)
}

struct ParamChild {
    name: String,
    node: RadixNode,
}

struct RegexChild {
    source: String,
    pattern: Regex,
    node: RadixNode,
}

/// One node of the routing tree. Built at registration, never mutated by
/// dispatch.
#[derive(Default)]
struct RadixNode {
    children: HashMap<String, RadixNode>,
    param: Option<Box<ParamChild>>,
    wildcard: Option<Box<RadixNode>>,
    regexes: Vec<RegexChild>,
    handlers: HashMap<Method, Arc<Route>>,
}

impl RadixNode {
    fn insert(
        &mut self,
        pattern: &str,
        segments: &[SegmentKind],
        method: Method,
        route: Arc<Route>,
    ) -> Result<bool, RouterError> {
        let mut node = self;
        for segment in segments {
            node = match segment {
                SegmentKind::Literal(s) => node.children.entry(s.clone()).or_default(),
                SegmentKind::Param(name) => {
                    if let Some(existing) = &node.param {
                        if existing.name != *name {
                            return Err(RouterError::ParamConflict {
                                pattern: pattern.to_string(),
                                existing: existing.name.clone(),
                                conflicting: name.clone(),
                            });
                        }
                    } else {
                        node.param = Some(Box::new(ParamChild {
                            name: name.clone(),
                            node: RadixNode::default(),
                        }));
                    }
                    &mut node.param.as_mut().unwrap().node
                }
                SegmentKind::Wildcard => {
                    if node.wildcard.is_none() {
                        node.wildcard = Some(Box::new(RadixNode::default()));
                    }
                    node.wildcard.as_mut().unwrap()
                }
                SegmentKind::Regex(source) => {
                    let position = node.regexes.iter().position(|rc| rc.source == *source);
                    let index = match position {
                        Some(i) => i,
                        None => {
                            let compiled = Regex::new(&format!("^(?:{source})$")).map_err(
                                |err| RouterError::InvalidRegex {
                                    pattern: pattern.to_string(),
                                    error: err.to_string(),
                                },
                            )?;
                            node.regexes.push(RegexChild {
                                source: source.clone(),
                                pattern: compiled,
                                node: RadixNode::default(),
                            });
                            node.regexes.len() - 1
                        }
                    };
                    &mut node.regexes[index].node
                }
            };
        }
        Ok(node.handlers.insert(method, route).is_some())
    }

    /// Walks the tree for `path`, capturing parameters into `params`.
    ///
    /// Precedence at each node: exact child, regex child, param child.
    /// Wildcards are the safety net: the deepest wildcard seen on the way
    /// down catches a dead end and consumes the remaining path. That keeps
    /// the walk linear in the segment count — one fallback, never general
    /// backtracking.
    fn match_path<'a>(&'a self, path: &str, params: &mut Params) -> Option<&'a RadixNode> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut node = self;
        let mut i = 0;
        let mut fallback: Option<(&'a RadixNode, usize)> = None;
        while i < segments.len() {
            if node.wildcard.is_some() {
                fallback = Some((node, i));
            }
            let segment = segments[i];
            if let Some(child) = node.children.get(segment) {
                node = child;
                i += 1;
                continue;
            }
            if let Some(rc) = node.regexes.iter().find(|rc| rc.pattern.is_match(segment)) {
                node = &rc.node;
                i += 1;
                continue;
            }
            if let Some(pc) = &node.param {
                params.insert(pc.name.clone(), decode_segment(segment));
                node = &pc.node;
                i += 1;
                continue;
            }
            return resolve_wildcard(fallback, &segments, params);
        }
        if !node.handlers.is_empty() {
            return Some(node);
        }
        // A trailing wildcard matches the empty tail.
        if node.wildcard.is_some() {
            fallback = Some((node, i));
        }
        resolve_wildcard(fallback, &segments, params)
    }
}

fn resolve_wildcard<'a>(
    fallback: Option<(&'a RadixNode, usize)>,
    segments: &[&str],
    params: &mut Params,
) -> Option<&'a RadixNode> {
    let (node, index) = fallback?;
    // Bindings captured on the abandoned branch do not belong to the
    // wildcard route.
    params.clear();
    params.insert("*".to_string(), segments[index..].join("/"));
    node.wildcard.as_deref()
}

fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// A successful lookup: the route and its captured parameters.
pub struct RouteMatch {
    /// Matched route.
    pub route: Arc<Route>,
    /// Captured parameter bindings, pooled.
    pub params: Params,
}

/// Outcome of a router lookup.
pub enum RouteLookup {
    /// A handler matched.
    Found(RouteMatch),
    /// The path exists but not under this method; carries the allowed set.
    MethodNotAllowed(Vec<Method>),
    /// Nothing matched.
    NotFound,
}

/// Cached lookup outcome. Parameter bindings are stored as owned pairs and
/// copied into a pooled map on every hit, so cache entries never alias
/// pooled maps.
#[derive(Clone)]
enum CachedLookup {
    Found {
        route: Arc<Route>,
        params: Arc<Vec<(String, String)>>,
    },
    MethodNotAllowed(Arc<Vec<Method>>),
    Miss,
}

/// Radix-tree router with an LRU result cache and pooled parameter maps.
pub struct Router {
    root: RwLock<RadixNode>,
    routes: RwLock<Vec<Arc<Route>>>,
    middlewares: RwLock<Vec<BoxMiddleware>>,
    cache: Mutex<LruCache<String, CachedLookup>>,
    params: Arc<ParamPool>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router with the default cache capacity.
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_ROUTE_CACHE_SIZE)
    }

    /// Creates an empty router with an explicit route-cache capacity.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            root: RwLock::new(RadixNode::default()),
            routes: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            params: ParamPool::new(DEFAULT_PARAM_POOL_SIZE),
        }
    }

    /// Registers a route, panicking on a malformed pattern.
    ///
    /// Pattern syntax: literal segments, `:name` parameters, a trailing `*`
    /// wildcard, and `(regex)` segments. Registering the same method and
    /// exact pattern twice overwrites the previous handler with a warning.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message when the pattern is invalid or its
    /// parameter names conflict with an already-registered pattern. Route
    /// tables are built at startup; a bad pattern is a programming error.
    pub fn route<H, T>(&self, method: Method, pattern: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone,
    {
        match self.try_route(method, pattern, handler) {
            Ok(route) => route,
            Err(err) => panic!("route registration failed: {err}"),
        }
    }

    /// Registers a route, returning registration errors instead of panicking.
    pub fn try_route<H, T>(
        &self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<Arc<Route>, RouterError>
    where
        H: Handler<T> + Clone,
    {
        let route = Arc::new(Route::new(
            pattern.to_string(),
            method.clone(),
            BoxHandler::new(handler),
        ));
        self.insert(route.clone())?;
        Ok(route)
    }

    fn insert(&self, route: Arc<Route>) -> Result<(), RouterError> {
        let segments = parse_pattern(&route.pattern)?;
        let mut root = self.root.write();
        let replaced =
            root.insert(&route.pattern, &segments, route.method.clone(), route.clone())?;
        if replaced {
            tracing::warn!(
                method = %route.method,
                pattern = %route.pattern,
                "route registered twice, previous handler replaced"
            );
            let mut routes = self.routes.write();
            routes.retain(|r| !(r.method == route.method && r.pattern == route.pattern));
            routes.push(route);
        } else {
            self.routes.write().push(route);
        }
        // Registration invalidates cached lookups while the tree lock is held.
        self.cache.lock().clear();
        Ok(())
    }

    /// Adds router-scoped middleware.
    ///
    /// On a standalone router this chain is prepended to every route when the
    /// router is mounted into a parent.
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
        self.middlewares.write().push(mw);
        self
    }

    /// Mounts another router's routes under a prefix.
    ///
    /// Routes are copied with the prefix prepended; the child router's
    /// middleware chain is prepended to each copied route so it still runs
    /// ahead of the route's own middleware.
    ///
    /// # Panics
    ///
    /// Panics if a copied pattern conflicts with an existing registration.
    pub fn mount(&self, prefix: &str, other: Router) {
        let child_mws: Vec<BoxMiddleware> = other.middlewares.read().clone();
        let routes: Vec<Arc<Route>> = other.routes.read().clone();
        for route in routes {
            let pattern = join_pattern(prefix, &route.pattern);
            let copied = Arc::new(route.with_pattern(pattern));
            for mw in child_mws.iter().rev() {
                copied.push_front_middleware(mw.clone());
            }
            if let Err(err) = self.insert(copied) {
                panic!("mount of '{prefix}' failed: {err}");
            }
        }
    }

    /// Resolves a method and path to a route.
    ///
    /// Checks the cache first (positive, negative, and method-mismatch
    /// entries all count); on a miss walks the tree, retrying once with the
    /// trailing slash toggled, and caches the outcome under the requested
    /// key.
    pub fn find(&self, method: &Method, path: &str) -> RouteLookup {
        let key = format!("{}:{}", method.as_str(), path);

        let cached = self.cache.lock().get(&key).cloned();
        if let Some(hit) = cached {
            return self.materialize(hit);
        }

        let outcome = {
            let root = self.root.read();
            let mut params = self.params.acquire();
            // Splitting on '/' and dropping empty segments makes `/a/b` and
            // `/a/b/` the same path, so trailing-slash normalization needs no
            // second walk.
            let node = root.match_path(path, &mut params);

            match node {
                Some(node) => match node.handlers.get(method) {
                    Some(route) => {
                        let pairs: Vec<(String, String)> = params
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect();
                        CachedLookup::Found {
                            route: route.clone(),
                            params: Arc::new(pairs),
                        }
                    }
                    None => {
                        let mut allowed: Vec<Method> = node.handlers.keys().cloned().collect();
                        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                        CachedLookup::MethodNotAllowed(Arc::new(allowed))
                    }
                },
                None => CachedLookup::Miss,
            }
        };

        self.cache.lock().put(key, outcome.clone());
        self.materialize(outcome)
    }

    fn materialize(&self, cached: CachedLookup) -> RouteLookup {
        match cached {
            CachedLookup::Found { route, params } => {
                let mut guard = self.params.acquire();
                for (name, value) in params.iter() {
                    guard.insert(name.clone(), value.clone());
                }
                RouteLookup::Found(RouteMatch {
                    route,
                    params: guard,
                })
            }
            CachedLookup::MethodNotAllowed(allowed) => {
                RouteLookup::MethodNotAllowed(allowed.as_ref().clone())
            }
            CachedLookup::Miss => RouteLookup::NotFound,
        }
    }

    /// Drops every cached lookup result.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// All registered routes in registration order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.read().clone()
    }
}

fn join_pattern(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let rest = pattern.trim_start_matches('/');
    if rest.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    async fn named(_ctx: Context) -> &'static str {
        "handler"
    }

    fn lookup_params(router: &Router, method: Method, path: &str) -> Option<Vec<(String, String)>> {
        match router.find(&method, path) {
            RouteLookup::Found(m) => Some(
                m.params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }

    #[test]
    fn static_route_matches_exactly() {
        let router = Router::new();
        router.route(Method::GET, "/health", named);
        assert!(matches!(
            router.find(&Method::GET, "/health"),
            RouteLookup::Found(_)
        ));
        assert!(matches!(
            router.find(&Method::GET, "/healthz"),
            RouteLookup::NotFound
        ));
    }

    #[test]
    fn params_bind_by_name() {
        let router = Router::new();
        router.route(Method::GET, "/users/:id/posts/:post", named);
        let params = lookup_params(&router, Method::GET, "/users/42/posts/7").unwrap();
        let map: HashMap<_, _> = params.into_iter().collect();
        assert_eq!(map["id"], "42");
        assert_eq!(map["post"], "7");
    }

    #[test]
    fn param_values_are_percent_decoded() {
        let router = Router::new();
        router.route(Method::GET, "/files/:name", named);
        let params = lookup_params(&router, Method::GET, "/files/a%20b").unwrap();
        assert_eq!(params[0].1, "a b");
    }

    #[test]
    fn precedence_static_over_regex_over_param_over_wildcard() {
        let router = Router::new();
        router.route(Method::GET, "/v/static", |_ctx: Context| async { "s" });
        router.route(Method::GET, "/v/([0-9]+)", |_ctx: Context| async { "r" });
        router.route(Method::GET, "/v/:name", |_ctx: Context| async { "p" });
        router.route(Method::GET, "/v/*", |_ctx: Context| async { "w" });

        let find = |path: &str| match router.find(&Method::GET, path) {
            RouteLookup::Found(m) => m.route.pattern.clone(),
            _ => panic!("expected a match for {path}"),
        };

        assert_eq!(find("/v/static"), "/v/static");
        assert_eq!(find("/v/123"), "/v/([0-9]+)");
        assert_eq!(find("/v/other"), "/v/:name");
        assert_eq!(find("/v/a/b"), "/v/*");
    }

    #[test]
    fn wildcard_captures_rest_and_empty_tail() {
        let router = Router::new();
        router.route(Method::GET, "/files/*", named);

        let params = lookup_params(&router, Method::GET, "/files/a/b/c").unwrap();
        assert_eq!(params, vec![("*".to_string(), "a/b/c".to_string())]);

        let params = lookup_params(&router, Method::GET, "/files/").unwrap();
        assert_eq!(params, vec![("*".to_string(), String::new())]);

        let params = lookup_params(&router, Method::GET, "/files").unwrap();
        assert_eq!(params, vec![("*".to_string(), String::new())]);
    }

    #[test]
    fn trailing_slash_is_normalized_once() {
        let router = Router::new();
        router.route(Method::GET, "/a/b", named);
        assert!(matches!(
            router.find(&Method::GET, "/a/b/"),
            RouteLookup::Found(_)
        ));

        router.route(Method::GET, "/c/d/", named);
        assert!(matches!(
            router.find(&Method::GET, "/c/d"),
            RouteLookup::Found(_)
        ));
    }

    #[test]
    fn method_mismatch_reports_allowed_set() {
        let router = Router::new();
        router.route(Method::GET, "/thing", named);
        router.route(Method::POST, "/thing", named);
        match router.find(&Method::DELETE, "/thing") {
            RouteLookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::GET, Method::POST]);
            }
            _ => panic!("expected method mismatch"),
        }
    }

    #[test]
    fn registration_invalidates_cache() {
        let router = Router::new();
        // Prime a negative cache entry.
        assert!(matches!(
            router.find(&Method::GET, "/late"),
            RouteLookup::NotFound
        ));
        router.route(Method::GET, "/late", named);
        assert!(matches!(
            router.find(&Method::GET, "/late"),
            RouteLookup::Found(_)
        ));
    }

    #[test]
    fn cache_hits_agree_with_fresh_lookups() {
        let router = Router::new();
        router.route(Method::GET, "/users/:id", named);
        let first = lookup_params(&router, Method::GET, "/users/9").unwrap();
        let second = lookup_params(&router, Method::GET, "/users/9").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cache_eviction_falls_back_to_the_tree() {
        let router = Router::with_cache_capacity(2);
        router.route(Method::GET, "/a", named);
        router.route(Method::GET, "/b", named);
        router.route(Method::GET, "/c", named);
        for path in ["/a", "/b", "/c", "/a", "/c", "/b"] {
            assert!(matches!(
                router.find(&Method::GET, path),
                RouteLookup::Found(_)
            ));
        }
    }

    #[test]
    fn params_do_not_leak_across_lookups() {
        let router = Router::new();
        router.route(Method::GET, "/users/:id", named);
        router.route(Method::GET, "/plain", named);

        {
            let params = lookup_params(&router, Method::GET, "/users/55").unwrap();
            assert_eq!(params.len(), 1);
        }
        // The pooled map from the previous lookup must come back empty.
        match router.find(&Method::GET, "/plain") {
            RouteLookup::Found(m) => assert!(m.params.is_empty()),
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn param_maps_return_to_the_pool() {
        let router = Router::new();
        router.route(Method::GET, "/users/:id", named);
        {
            let _m = match router.find(&Method::GET, "/users/1") {
                RouteLookup::Found(m) => m,
                _ => panic!(),
            };
            // Guard alive, map checked out.
        }
        assert!(router.params.idle() >= 1);
    }

    #[test]
    fn conflicting_param_names_are_rejected() {
        let router = Router::new();
        router.route(Method::GET, "/users/:id", named);
        let err = router
            .try_route(Method::POST, "/users/:uid", named)
            .unwrap_err();
        match err {
            RouterError::ParamConflict {
                existing,
                conflicting,
                ..
            } => {
                assert_eq!(existing, "id");
                assert_eq!(conflicting, "uid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wildcard_must_be_last() {
        let router = Router::new();
        let err = router.try_route(Method::GET, "/a/*/b", named).unwrap_err();
        assert!(matches!(err, RouterError::WildcardNotLast { .. }));
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let router = Router::new();
        router.route(Method::GET, "/dup", |_ctx: Context| async { "one" });
        router.route(Method::GET, "/dup", |_ctx: Context| async { "two" });
        assert_eq!(router.routes().len(), 1);
        assert!(matches!(
            router.find(&Method::GET, "/dup"),
            RouteLookup::Found(_)
        ));
    }

    #[test]
    fn mounted_routes_gain_the_prefix() {
        let child = Router::new();
        child.route(Method::GET, "/users", named);
        child.route(Method::GET, "/", named);

        let parent = Router::new();
        parent.mount("/api", child);

        assert!(matches!(
            parent.find(&Method::GET, "/api/users"),
            RouteLookup::Found(_)
        ));
        assert!(matches!(
            parent.find(&Method::GET, "/api"),
            RouteLookup::Found(_)
        ));
    }

    #[test]
    fn root_route_matches_root_path() {
        let router = Router::new();
        router.route(Method::GET, "/", named);
        assert!(matches!(
            router.find(&Method::GET, "/"),
            RouteLookup::Found(_)
        ));
    }
}
