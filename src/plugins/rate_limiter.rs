//! Windowed rate limiting with a pluggable keyed store.
//!
//! Each request derives a key (client IP by default), atomically
//! increments that key's counter in the store, and is rejected with 429 once
//! the window's budget is spent. Responses carry `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining`, and `X-RateLimit-Reset`; rejections add
//! `Retry-After`. With `skip_successful_requests`, a response at or below
//! 399 decrements the counter — it never resets the bucket. Expired entries
//! are removed by a background sweeper.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::plugins::rate_limiter::RateLimiterBuilder;
//! use std::time::Duration;
//!
//! let limiter = RateLimiterBuilder::new()
//!     .max(100)
//!     .window(Duration::from_secs(60))
//!     .key_fn(|ctx| ctx.ip().to_string())
//!     .build();
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use http::{HeaderName, HeaderValue};

use crate::{
    app::App,
    context::Context,
    errors::HttpError,
    middleware::Next,
    plugins::Plugin,
    types::HttpResult,
};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// One bucket: admitted count and when the window resets.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitEntry {
    /// Requests admitted in the current window.
    pub count: u64,
    /// Instant at which the window resets.
    pub reset_at: Instant,
}

/// Keyed counter store. Increment-or-create must be atomic per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Current entry for a key, when one exists.
    async fn get(&self, key: &str) -> Option<RateLimitEntry>;

    /// Atomically increments the key's counter, starting a fresh window
    /// when none is active, and returns the updated entry.
    async fn increment(&self, key: &str, window: Duration) -> RateLimitEntry;

    /// Takes one admission back, saturating at zero.
    async fn decrement(&self, key: &str);

    /// Clears a single key.
    async fn reset(&self, key: &str);

    /// Clears every key.
    async fn clear(&self);

    /// Removes entries whose window has passed.
    async fn sweep(&self);
}

/// In-memory store on a concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| *e)
    }

    async fn increment(&self, key: &str, window: Duration) -> RateLimitEntry {
        let now = Instant::now();
        // The entry API holds the shard lock, making read-modify-write
        // atomic per key.
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert(RateLimitEntry {
                count: 0,
                reset_at: now + window,
            });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count += 1;
        *entry
    }

    async fn decrement(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    async fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    async fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.reset_at > now);
    }
}

type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// Rate limiter configuration.
#[derive(Clone)]
pub struct Config {
    /// Admissions per key per window.
    pub max: u64,
    /// Window length.
    pub window: Duration,
    /// Key derivation, defaulting to the client IP.
    pub key_fn: KeyFn,
    /// Give an admission back after a ≤399 response.
    pub skip_successful_requests: bool,
    /// Emit `X-RateLimit-*` headers.
    pub headers: bool,
    /// Message on the 429 body.
    pub message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max: 60,
            window: Duration::from_secs(60),
            key_fn: Arc::new(|ctx| ctx.ip().to_string()),
            skip_successful_requests: false,
            headers: true,
            message: "too many requests".to_string(),
        }
    }
}

/// Builder for the rate limiter plugin.
pub struct RateLimiterBuilder {
    cfg: Config,
    store: Option<Arc<dyn RateLimitStore>>,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterBuilder {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self {
            cfg: Config::default(),
            store: None,
        }
    }

    /// Starts from an existing configuration object.
    pub fn from_config(cfg: Config) -> Self {
        Self { cfg, store: None }
    }

    /// Sets the per-window admission budget.
    pub fn max(mut self, max: u64) -> Self {
        self.cfg.max = max;
        self
    }

    /// Sets the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.cfg.window = window;
        self
    }

    /// Sets the key derivation function.
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.cfg.key_fn = Arc::new(f);
        self
    }

    /// Gives admissions back after successful responses.
    pub fn skip_successful_requests(mut self, yes: bool) -> Self {
        self.cfg.skip_successful_requests = yes;
        self
    }

    /// Enables or disables the `X-RateLimit-*` headers.
    pub fn headers(mut self, yes: bool) -> Self {
        self.cfg.headers = yes;
        self
    }

    /// Replaces the backing store.
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the plugin.
    pub fn build(self) -> RateLimiterPlugin {
        RateLimiterPlugin {
            cfg: self.cfg,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
        }
    }
}

/// Rate limiter plugin.
#[derive(Clone)]
pub struct RateLimiterPlugin {
    cfg: Config,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiterPlugin {
    /// The backing store, for tests and administrative resets.
    pub fn store(&self) -> Arc<dyn RateLimitStore> {
        self.store.clone()
    }
}

impl Plugin for RateLimiterPlugin {
    fn name(&self) -> &'static str {
        "RateLimiterPlugin"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let cfg = self.cfg.clone();
        let store = self.store.clone();
        app.use_middleware(move |ctx, next| {
            let cfg = cfg.clone();
            let store = store.clone();
            async move { enforce(ctx, next, cfg, store).await }
        });

        // Background sweep of expired buckets.
        let store = self.store.clone();
        let interval = self.cfg.window;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                store.sweep().await;
            }
        });

        Ok(())
    }
}

/// Middleware body: admit or reject one request against the store.
pub(crate) async fn enforce(
    ctx: Context,
    next: Next,
    cfg: Config,
    store: Arc<dyn RateLimitStore>,
) -> HttpResult {
    let key = (cfg.key_fn)(&ctx);
    let entry = store.increment(&key, cfg.window).await;
    let reset_secs = entry
        .reset_at
        .saturating_duration_since(Instant::now())
        .as_secs();

    if entry.count > cfg.max {
        let mut err =
            HttpError::too_many_requests(cfg.message.clone(), Some(reset_secs.max(1)));
        if cfg.headers {
            err = err
                .with_header(LIMIT_HEADER, header_value(cfg.max))
                .with_header(REMAINING_HEADER, HeaderValue::from_static("0"))
                .with_header(RESET_HEADER, header_value(reset_secs));
        }
        return Err(err);
    }

    let remaining = cfg.max - entry.count;
    let result = next.run(ctx).await;
    match result {
        Ok(mut resp) => {
            if cfg.headers {
                resp.headers_mut().insert(LIMIT_HEADER, header_value(cfg.max));
                resp.headers_mut()
                    .insert(REMAINING_HEADER, header_value(remaining));
                resp.headers_mut()
                    .insert(RESET_HEADER, header_value(reset_secs));
            }
            if cfg.skip_successful_requests && resp.status().as_u16() <= 399 {
                store.decrement(&key).await;
            }
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

fn header_value(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
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

    fn ctx(ip: [u8; 4]) -> Context {
        let pool = ContextPool::new(1);
        let req = http::Request::builder()
            .uri("/")
            .body(Empty::<Bytes>::new())
            .unwrap();
        pool.acquire(
            req,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 1),
            false,
        )
    }

    fn endpoint() -> Next {
        async fn h(_ctx: Context) -> &'static str {
            "ok"
        }
        Next::new(Arc::new(Vec::new()), Arc::new(BoxHandler::new(h)))
    }

    fn config(max: u64, window_ms: u64) -> Config {
        Config {
            max,
            window: Duration::from_millis(window_ms),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn admissions_stay_within_the_budget() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = config(3, 60_000);

        for _ in 0..3 {
            let resp = enforce(ctx([1, 1, 1, 1]), endpoint(), cfg.clone(), store.clone())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        for _ in 0..2 {
            let err = enforce(ctx([1, 1, 1, 1]), endpoint(), cfg.clone(), store.clone())
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }

    #[tokio::test]
    async fn budget_resets_after_the_window() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = config(1, 40);

        enforce(ctx([2, 2, 2, 2]), endpoint(), cfg.clone(), store.clone())
            .await
            .unwrap();
        enforce(ctx([2, 2, 2, 2]), endpoint(), cfg.clone(), store.clone())
            .await
            .unwrap_err();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let resp = enforce(ctx([2, 2, 2, 2]), endpoint(), cfg, store)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = config(1, 60_000);

        enforce(ctx([3, 3, 3, 3]), endpoint(), cfg.clone(), store.clone())
            .await
            .unwrap();
        // A different client still has budget.
        let resp = enforce(ctx([4, 4, 4, 4]), endpoint(), cfg, store)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn headers_report_the_window() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = config(5, 60_000);
        let resp = enforce(ctx([5, 5, 5, 5]), endpoint(), cfg, store)
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-ratelimit-limit"], "5");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "4");
        assert!(resp.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn rejections_carry_retry_after() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = config(0, 60_000);
        let err = enforce(ctx([6, 6, 6, 6]), endpoint(), cfg, store)
            .await
            .unwrap_err();
        let resp = err.into_response();
        assert!(resp.headers().contains_key(http::header::RETRY_AFTER));
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "0");
    }

    #[tokio::test]
    async fn skip_successful_decrements_not_resets() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
        let cfg = Config {
            skip_successful_requests: true,
            ..config(2, 60_000)
        };

        // Two successful requests, each returning its admission.
        for _ in 0..2 {
            enforce(ctx([7, 7, 7, 7]), endpoint(), cfg.clone(), store.clone())
                .await
                .unwrap();
        }
        let entry = store.get("7.7.7.7").await.unwrap();
        assert_eq!(entry.count, 0);

        // The bucket itself survives: the window was not reset.
        let entry = store.increment("7.7.7.7", cfg.window).await;
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let store = MemoryStore::new();
        store.increment("gone", Duration::from_millis(10)).await;
        store.increment("kept", Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep().await;
        assert!(store.get("gone").await.is_none());
        assert!(store.get("kept").await.is_some());
    }

    #[tokio::test]
    async fn reset_and_clear_drop_buckets() {
        let store = MemoryStore::new();
        store.increment("a", Duration::from_secs(60)).await;
        store.increment("b", Duration::from_secs(60)).await;
        store.reset("a").await;
        assert!(store.get("a").await.is_none());
        store.clear().await;
        assert!(store.get("b").await.is_none());
    }
}
