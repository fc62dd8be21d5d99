//! Static file serving with cache validators, ranges, and precompression.
//!
//! [`StaticFiles`] mounts a directory under a URL prefix. Resolution strips
//! the mount prefix, percent-decodes the remainder, and rejects anything that
//! escapes the canonicalized root with a 404 — never a 403, so directory
//! layout is not leaked. Directories fall back to the configured index files,
//! then to the SPA file when enabled. Dotfiles follow the configured policy
//! (`allow`, `deny` = 403, `ignore` = 404, the default).
//!
//! Files up to `max_file_size` are cached in a byte-bounded LRU keyed by
//! `path:mtime:size`, optionally with precompressed gzip/brotli variants;
//! larger files stream straight from disk. Conditional requests are answered
//! with 304 on an exact `If-None-Match` ETag match or an `If-Modified-Since`
//! date at or past the file's mtime. Single byte ranges are honored with 206
//! and `Content-Range`; unsatisfiable ranges get 416.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::r#static::{StaticFiles, StaticOptions};
//! use nextrush::app::App;
//!
//! let mut app = App::new();
//! app.plugin(
//!     StaticFiles::builder("/assets", "./public")
//!         .max_age(3600)
//!         .precompress(true)
//!         .build(),
//! );
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderValue, Method, StatusCode, header};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{fs, io::AsyncReadExt, io::AsyncSeekExt};

use crate::{
    app::App,
    body::RushBody,
    context::Context,
    errors::HttpError,
    plugins::Plugin,
    types::Response,
};

/// Policy for paths containing dotfile components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotfilePolicy {
    /// Serve dotfiles like any other file.
    Allow,
    /// Respond 403.
    Deny,
    /// Respond 404.
    #[default]
    Ignore,
}

/// Per-mount configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StaticOptions {
    /// `Cache-Control: public, max-age=N` when greater than zero.
    pub max_age: u64,
    /// Append `immutable` to Cache-Control.
    pub immutable: bool,
    /// Emit and honor ETags.
    pub etag: bool,
    /// Index file names tried for directory requests, in order.
    pub index: Vec<String>,
    /// Serve the first index file from the root for unresolved paths.
    pub spa: bool,
    /// Dotfile handling.
    pub dotfiles: DotfilePolicy,
    /// Precompute gzip and brotli variants for compressible cached files.
    pub precompress: bool,
    /// Keep small files in the in-memory LRU cache.
    pub memory_cache: bool,
    /// Total byte budget for the memory cache.
    pub max_cache_size: u64,
    /// Files larger than this bypass the cache and stream from disk.
    pub max_file_size: u64,
    /// Honor `Range` requests.
    pub accept_ranges: bool,
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self {
            max_age: 0,
            immutable: false,
            etag: true,
            index: vec!["index.html".to_string()],
            spa: false,
            dotfiles: DotfilePolicy::Ignore,
            precompress: false,
            memory_cache: true,
            max_cache_size: 64 * 1024 * 1024,
            max_file_size: 1024 * 1024,
            accept_ranges: true,
        }
    }
}

/// A cached file: original bytes, validators, and optional precompressed
/// variants.
struct CacheEntry {
    content: Bytes,
    mime: String,
    etag: String,
    modified: SystemTime,
    gzip: Option<Bytes>,
    brotli: Option<Bytes>,
}

impl CacheEntry {
    fn weight(&self) -> u64 {
        (self.content.len()
            + self.gzip.as_ref().map(Bytes::len).unwrap_or(0)
            + self.brotli.as_ref().map(Bytes::len).unwrap_or(0)) as u64
    }
}

struct CacheState {
    lru: LruCache<String, Arc<CacheEntry>>,
    bytes: u64,
}

struct StaticInner {
    mount: String,
    root: PathBuf,
    opts: StaticOptions,
    cache: Mutex<CacheState>,
}

/// Directory mount serving static files as middleware.
///
/// Requests under the mount prefix are answered directly; misses fall through
/// to the rest of the chain so routes can coexist under the same prefix.
#[derive(Clone)]
pub struct StaticFiles {
    inner: Arc<StaticInner>,
}

/// Builder for a [`StaticFiles`] mount.
pub struct StaticFilesBuilder {
    mount: String,
    root: PathBuf,
    opts: StaticOptions,
}

impl StaticFilesBuilder {
    /// Creates a builder for `mount` serving from `root`.
    pub fn new<P: Into<PathBuf>>(mount: &str, root: P) -> Self {
        Self {
            mount: normalize_mount(mount),
            root: root.into(),
            opts: StaticOptions::default(),
        }
    }

    /// Replaces the whole option set.
    pub fn options(mut self, opts: StaticOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Sets the Cache-Control max-age in seconds.
    pub fn max_age(mut self, secs: u64) -> Self {
        self.opts.max_age = secs;
        self
    }

    /// Marks responses immutable in Cache-Control.
    pub fn immutable(mut self, yes: bool) -> Self {
        self.opts.immutable = yes;
        self
    }

    /// Enables SPA fallback to the first index file.
    pub fn spa(mut self, yes: bool) -> Self {
        self.opts.spa = yes;
        self
    }

    /// Sets the dotfile policy.
    pub fn dotfiles(mut self, policy: DotfilePolicy) -> Self {
        self.opts.dotfiles = policy;
        self
    }

    /// Enables gzip/brotli precompression for cached files.
    pub fn precompress(mut self, yes: bool) -> Self {
        self.opts.precompress = yes;
        self
    }

    /// Builds the mount.
    pub fn build(self) -> StaticFiles {
        let capacity = std::num::NonZeroUsize::new(4096).unwrap();
        StaticFiles {
            inner: Arc::new(StaticInner {
                mount: self.mount,
                root: self.root,
                opts: self.opts,
                cache: Mutex::new(CacheState {
                    lru: LruCache::new(capacity),
                    bytes: 0,
                }),
            }),
        }
    }
}

fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl StaticFiles {
    /// Creates a builder for `mount` serving from `root`.
    pub fn builder<P: Into<PathBuf>>(mount: &str, root: P) -> StaticFilesBuilder {
        StaticFilesBuilder::new(mount, root)
    }

    /// Attempts to serve the request.
    ///
    /// Returns `Ok(None)` when the request is not for this mount or the file
    /// simply does not exist (and SPA is off), letting the chain continue.
    /// Policy violations (traversal, dotfiles) surface typed errors.
    pub async fn try_serve(&self, ctx: &Context) -> Result<Option<Response>, HttpError> {
        let inner = &self.inner;
        if ctx.method() != Method::GET && ctx.method() != Method::HEAD {
            return Ok(None);
        }

        let Some(rest) = strip_mount(&inner.mount, ctx.path()) else {
            return Ok(None);
        };
        let rest = match urlencoding::decode(rest) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => return Err(HttpError::bad_request("malformed percent-encoding in path")),
        };

        match inner.opts.dotfiles {
            DotfilePolicy::Allow => {}
            policy => {
                if rest
                    .split('/')
                    .any(|c| c.starts_with('.') && c != "." && c != "..")
                {
                    return match policy {
                        DotfilePolicy::Deny => Err(HttpError::forbidden("forbidden")),
                        _ => Err(HttpError::not_found("not found")),
                    };
                }
            }
        }

        let Ok(root) = fs::canonicalize(&inner.root).await else {
            return Ok(None);
        };
        let joined = root.join(rest.trim_start_matches('/'));

        let resolved = match fs::canonicalize(&joined).await {
            Ok(path) => {
                if !path.starts_with(&root) {
                    // Escapes the root: report a plain miss, never a 403.
                    return Err(HttpError::not_found("not found"));
                }
                let meta = fs::metadata(&path)
                    .await
                    .map_err(|_| HttpError::not_found("not found"))?;
                if meta.is_dir() {
                    self.find_index(&path).await
                } else {
                    Some(path)
                }
            }
            Err(_) => None,
        };

        let path = match resolved {
            Some(path) => path,
            None => {
                if inner.opts.spa {
                    let fallback = inner
                        .opts
                        .index
                        .first()
                        .map(|name| root.join(name))
                        .filter(|p| p.is_file());
                    match fallback {
                        Some(p) => p,
                        None => return Ok(None),
                    }
                } else {
                    return Ok(None);
                }
            }
        };

        self.serve_file(ctx, &path).await.map(Some)
    }

    async fn find_index(&self, dir: &Path) -> Option<PathBuf> {
        for name in &self.inner.opts.index {
            let candidate = dir.join(name);
            if fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        None
    }

    async fn serve_file(&self, ctx: &Context, path: &Path) -> Result<Response, HttpError> {
        let opts = &self.inner.opts;
        let meta = fs::metadata(path)
            .await
            .map_err(|_| HttpError::not_found("not found"))?;
        let size = meta.len();
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let etag = make_etag(modified, size);
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        // Conditional GET: either validator suffices for a 304.
        if self.not_modified(ctx, &etag, modified) {
            let mut resp = hyper::Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(RushBody::empty())
                .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));
            self.validator_headers(&mut resp, &etag, modified);
            return Ok(resp);
        }

        // Single-range requests bypass cache compression entirely.
        if opts.accept_ranges {
            if let Some(raw) = ctx.header("range") {
                return self.serve_range(ctx, path, raw, size, &etag, modified, &mime).await;
            }
        }

        let head = ctx.method() == Method::HEAD;
        if opts.memory_cache && size <= opts.max_file_size {
            let entry = self.load_cached(path, modified, size, &mime).await?;
            let (body, encoding) = self.negotiate(ctx, &entry);
            let mut resp = hyper::Response::builder()
                .status(StatusCode::OK)
                .body(if head {
                    RushBody::empty()
                } else {
                    RushBody::from(body.clone())
                })
                .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));
            self.standard_headers(&mut resp, &entry.mime, &entry.etag, entry.modified);
            set_header(&mut resp, header::CONTENT_LENGTH, &body.len().to_string());
            if let Some(enc) = encoding {
                set_header(&mut resp, header::CONTENT_ENCODING, enc);
                set_header(&mut resp, header::VARY, "Accept-Encoding");
            }
            return Ok(resp);
        }

        // Large file: stream from disk without caching.
        let file = fs::File::open(path)
            .await
            .map_err(|_| HttpError::not_found("not found"))?;
        let body = if head {
            RushBody::empty()
        } else {
            stream_file(file, size)
        };
        let mut resp = hyper::Response::builder()
            .status(StatusCode::OK)
            .body(body)
            .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));
        self.standard_headers(&mut resp, mime.as_ref(), &etag, modified);
        set_header(&mut resp, header::CONTENT_LENGTH, &size.to_string());
        Ok(resp)
    }

    #[allow(clippy::too_many_arguments)]
    async fn serve_range(
        &self,
        ctx: &Context,
        path: &Path,
        raw: &str,
        size: u64,
        etag: &str,
        modified: SystemTime,
        mime: &mime::Mime,
    ) -> Result<Response, HttpError> {
        let (start, end) = match parse_range(raw, size) {
            RangeOutcome::Satisfiable(start, end) => (start, end),
            RangeOutcome::Unsatisfiable => {
                return Err(HttpError::range_not_satisfiable("range not satisfiable")
                    .with_header(
                        header::CONTENT_RANGE,
                        HeaderValue::from_str(&format!("bytes */{size}"))
                            .unwrap_or(HeaderValue::from_static("bytes */0")),
                    ));
            }
            RangeOutcome::Malformed => {
                return Err(HttpError::bad_request("invalid range header"));
            }
        };

        let length = end - start + 1;
        let body = if ctx.method() == Method::HEAD {
            RushBody::empty()
        } else {
            let mut file = fs::File::open(path)
                .await
                .map_err(|_| HttpError::not_found("not found"))?;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| HttpError::internal(format!("seek failed: {err}")))?;
            stream_file(file, length)
        };

        let mut resp = hyper::Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .body(body)
            .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));
        self.standard_headers(&mut resp, mime.as_ref(), etag, modified);
        set_header(
            &mut resp,
            header::CONTENT_RANGE,
            &format!("bytes {start}-{end}/{size}"),
        );
        set_header(&mut resp, header::CONTENT_LENGTH, &length.to_string());
        Ok(resp)
    }

    fn not_modified(&self, ctx: &Context, etag: &str, modified: SystemTime) -> bool {
        if self.inner.opts.etag {
            if let Some(raw) = ctx.header("if-none-match") {
                return raw
                    .split(',')
                    .map(str::trim)
                    .any(|candidate| candidate == etag || candidate == "*");
            }
        }
        if let Some(raw) = ctx.header("if-modified-since") {
            if let Some(since) = parse_http_date(raw) {
                let file_secs = modified
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_secs();
                let client_secs = since
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_secs();
                return client_secs >= file_secs;
            }
        }
        false
    }

    async fn load_cached(
        &self,
        path: &Path,
        modified: SystemTime,
        size: u64,
        mime: &mime::Mime,
    ) -> Result<Arc<CacheEntry>, HttpError> {
        let mtime_epoch = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let key = format!("{}:{}:{}", path.display(), mtime_epoch, size);

        if let Some(entry) = self.inner.cache.lock().lru.get(&key) {
            return Ok(entry.clone());
        }

        let content = Bytes::from(
            fs::read(path)
                .await
                .map_err(|_| HttpError::not_found("not found"))?,
        );
        let (gzip, brotli) = if self.inner.opts.precompress && is_compressible(mime) {
            (
                compress_gzip(&content).ok().map(Bytes::from),
                compress_brotli(&content).ok().map(Bytes::from),
            )
        } else {
            (None, None)
        };

        let entry = Arc::new(CacheEntry {
            content,
            mime: mime.to_string(),
            etag: make_etag(modified, size),
            modified,
            gzip,
            brotli,
        });

        let weight = entry.weight();
        let mut cache = self.inner.cache.lock();
        if weight <= self.inner.opts.max_cache_size {
            while cache.bytes + weight > self.inner.opts.max_cache_size {
                match cache.lru.pop_lru() {
                    Some((_, evicted)) => cache.bytes -= evicted.weight(),
                    None => break,
                }
            }
            if let Some(old) = cache.lru.put(key, entry.clone()) {
                cache.bytes -= old.weight();
            }
            cache.bytes += weight;
        }
        Ok(entry)
    }

    /// Picks a precompressed variant matching Accept-Encoding; brotli wins
    /// over gzip when both are acceptable.
    fn negotiate(&self, ctx: &Context, entry: &CacheEntry) -> (Bytes, Option<&'static str>) {
        let accepted = ctx
            .header("accept-encoding")
            .unwrap_or("")
            .to_ascii_lowercase();
        if accepted.contains("br") {
            if let Some(br) = &entry.brotli {
                return (br.clone(), Some("br"));
            }
        }
        if accepted.contains("gzip") {
            if let Some(gz) = &entry.gzip {
                return (gz.clone(), Some("gzip"));
            }
        }
        (entry.content.clone(), None)
    }

    fn standard_headers(
        &self,
        resp: &mut Response,
        mime: &str,
        etag: &str,
        modified: SystemTime,
    ) {
        set_header(resp, header::CONTENT_TYPE, mime);
        self.validator_headers(resp, etag, modified);
        if self.inner.opts.accept_ranges {
            set_header(resp, header::ACCEPT_RANGES, "bytes");
        }
        set_header(resp, header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    }

    fn validator_headers(&self, resp: &mut Response, etag: &str, modified: SystemTime) {
        if self.inner.opts.etag {
            set_header(resp, header::ETAG, etag);
        }
        set_header(resp, header::LAST_MODIFIED, &http_date(modified));
        let opts = &self.inner.opts;
        if opts.max_age > 0 {
            let value = if opts.immutable {
                format!("public, max-age={}, immutable", opts.max_age)
            } else {
                format!("public, max-age={}", opts.max_age)
            };
            set_header(resp, header::CACHE_CONTROL, &value);
        }
    }

    #[cfg(test)]
    fn cached_bytes(&self) -> u64 {
        self.inner.cache.lock().bytes
    }
}

impl Plugin for StaticFiles {
    fn name(&self) -> &'static str {
        "StaticFiles"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let mount = self.clone();
        app.use_middleware(move |ctx, next| {
            let mount = mount.clone();
            async move {
                match mount.try_serve(&ctx).await? {
                    Some(resp) => Ok(resp),
                    None => next.run(ctx).await,
                }
            }
        });
        Ok(())
    }
}

fn strip_mount<'a>(mount: &str, path: &'a str) -> Option<&'a str> {
    if mount == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(mount)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn set_header(resp: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        resp.headers_mut().insert(name, value);
    }
}

/// Weak-stable validator from mtime and size, `"mtimeMillis-size"` in hex.
fn make_etag(modified: SystemTime, size: u64) -> String {
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    format!("\"{millis:x}-{size:x}\"")
}

fn http_date(t: SystemTime) -> String {
    DateTime::<Utc>::from(t)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn parse_http_date(raw: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(raw).ok().map(Into::into)
}

fn is_compressible(mime: &mime::Mime) -> bool {
    mime.type_() == mime::TEXT
        || mime.subtype() == mime::JSON
        || mime.subtype() == mime::JAVASCRIPT
        || mime.subtype() == mime::XML
        || mime.suffix().map(|s| s == mime::XML || s == mime::JSON).unwrap_or(false)
        || mime.subtype() == mime::SVG
}

fn compress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(6));
    enc.write_all(data)?;
    enc.finish()
}

fn compress_brotli(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    brotli::CompressorReader::new(data, 4096, 5, 22).read_to_end(&mut out)?;
    Ok(out)
}

/// Streams `length` bytes from an open file as a response body.
fn stream_file(file: fs::File, length: u64) -> RushBody {
    let stream = futures_util::stream::try_unfold(
        (file, length),
        |(mut file, remaining)| async move {
            if remaining == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            let chunk = remaining.min(64 * 1024) as usize;
            let mut buf = vec![0u8; chunk];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), (file, remaining - n as u64))))
        },
    );
    RushBody::from_stream(stream)
}

enum RangeOutcome {
    Satisfiable(u64, u64),
    Unsatisfiable,
    Malformed,
}

/// Parses a single `bytes=` range. `bytes=M-N`, `bytes=M-`, and `bytes=-N`
/// are accepted; multi-range requests collapse to their first range.
fn parse_range(raw: &str, total: u64) -> RangeOutcome {
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return RangeOutcome::Malformed;
    };
    let first = spec.split(',').next().unwrap_or("").trim();
    let Some((start_raw, end_raw)) = first.split_once('-') else {
        return RangeOutcome::Malformed;
    };

    match (start_raw.is_empty(), end_raw.is_empty()) {
        // bytes=-N : final N bytes.
        (true, false) => {
            let Ok(suffix) = end_raw.parse::<u64>() else {
                return RangeOutcome::Malformed;
            };
            if suffix == 0 || total == 0 {
                return RangeOutcome::Unsatisfiable;
            }
            let start = total.saturating_sub(suffix);
            RangeOutcome::Satisfiable(start, total - 1)
        }
        // bytes=M- : from M to the end.
        (false, true) => {
            let Ok(start) = start_raw.parse::<u64>() else {
                return RangeOutcome::Malformed;
            };
            if start >= total {
                return RangeOutcome::Unsatisfiable;
            }
            RangeOutcome::Satisfiable(start, total - 1)
        }
        (false, false) => {
            let (Ok(start), Ok(end)) = (start_raw.parse::<u64>(), end_raw.parse::<u64>()) else {
                return RangeOutcome::Malformed;
            };
            if start > end {
                return RangeOutcome::Malformed;
            }
            if start >= total {
                return RangeOutcome::Unsatisfiable;
            }
            RangeOutcome::Satisfiable(start, end.min(total - 1))
        }
        (true, true) => RangeOutcome::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPool;
    use http_body_util::{BodyExt, Empty};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn ctx_get(path: &str, headers: &[(&str, &str)]) -> Context {
        let pool = ContextPool::new(1);
        let mut builder = http::Request::builder().method(Method::GET).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder.body(Empty::<Bytes>::new()).unwrap();
        pool.acquire(
            req,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
            false,
        )
    }

    fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.css"), "body { color: red; }").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
        std::fs::write(dir.path().join(".secret"), "hidden").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "<html>docs</html>").unwrap();
        let mount = StaticFiles::builder("/assets", dir.path()).build();
        (dir, mount)
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn serves_files_with_standard_headers() {
        let (_dir, mount) = fixture();
        let ctx = ctx_get("/assets/app.css", &[]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
        assert_eq!(resp.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(resp.headers().contains_key(header::ETAG));
        assert!(resp.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_bytes(resp).await.as_ref(), b"body { color: red; }");
    }

    #[tokio::test]
    async fn requests_outside_the_mount_pass_through() {
        let (_dir, mount) = fixture();
        let ctx = ctx_get("/api/users", &[]);
        assert!(mount.try_serve(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_gets_are_idempotent() {
        let (_dir, mount) = fixture();
        let first = mount
            .try_serve(&ctx_get("/assets/app.css", &[]))
            .await
            .unwrap()
            .unwrap();
        let etag1 = first.headers()[header::ETAG].clone();
        let bytes1 = body_bytes(first).await;

        let second = mount
            .try_serve(&ctx_get("/assets/app.css", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.headers()[header::ETAG], etag1);
        assert_eq!(body_bytes(second).await, bytes1);
    }

    #[tokio::test]
    async fn if_none_match_returns_304_without_body() {
        let (_dir, mount) = fixture();
        let first = mount
            .try_serve(&ctx_get("/assets/app.css", &[]))
            .await
            .unwrap()
            .unwrap();
        let etag = first.headers()[header::ETAG].to_str().unwrap().to_owned();

        let ctx = ctx_get("/assets/app.css", &[("if-none-match", &etag)]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert!(resp.headers().contains_key(header::ETAG));
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn if_modified_since_returns_304() {
        let (_dir, mount) = fixture();
        let first = mount
            .try_serve(&ctx_get("/assets/app.css", &[]))
            .await
            .unwrap()
            .unwrap();
        let date = first.headers()[header::LAST_MODIFIED]
            .to_str()
            .unwrap()
            .to_owned();

        let ctx = ctx_get("/assets/app.css", &[("if-modified-since", &date)]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn range_request_returns_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(dir.path().join("blob.bin"), &data).unwrap();
        let mount = StaticFiles::builder("/f", dir.path()).build();

        let ctx = ctx_get("/f/blob.bin", &[("range", "bytes=0-999")]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 0-999/10000");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "1000");
        let body = body_bytes(resp).await;
        assert_eq!(body.len(), 1000);
        assert_eq!(body.as_ref(), &data[0..1000]);
    }

    #[tokio::test]
    async fn suffix_and_open_ranges_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        std::fs::write(dir.path().join("blob.bin"), &data).unwrap();
        let mount = StaticFiles::builder("/f", dir.path()).build();

        let resp = mount
            .try_serve(&ctx_get("/f/blob.bin", &[("range", "bytes=-10")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 90-99/100");
        assert_eq!(body_bytes(resp).await.as_ref(), &data[90..]);

        let resp = mount
            .try_serve(&ctx_get("/f/blob.bin", &[("range", "bytes=95-")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 95-99/100");
        assert_eq!(body_bytes(resp).await.as_ref(), &data[95..]);
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416_with_total() {
        let (_dir, mount) = fixture();
        let ctx = ctx_get("/assets/app.css", &[("range", "bytes=5000-6000")]);
        let err = mount.try_serve(&ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        let resp = err.into_response();
        let range = resp.headers()[header::CONTENT_RANGE].to_str().unwrap();
        assert!(range.starts_with("bytes */"));
    }

    #[tokio::test]
    async fn malformed_range_is_400() {
        let (_dir, mount) = fixture();
        let ctx = ctx_get("/assets/app.css", &[("range", "bytes=abc")]);
        let err = mount.try_serve(&ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn traversal_is_rejected_as_not_found() {
        let (_dir, mount) = fixture();
        let ctx = ctx_get("/assets/../../../etc/passwd", &[]);
        let result = mount.try_serve(&ctx).await;
        match result {
            Err(err) => assert_eq!(err.status(), StatusCode::NOT_FOUND),
            Ok(None) => {}
            Ok(Some(_)) => panic!("traversal must not serve"),
        }
    }

    #[tokio::test]
    async fn dotfiles_default_to_ignore() {
        let (_dir, mount) = fixture();
        let err = mount
            .try_serve(&ctx_get("/assets/.secret", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dotfiles_deny_is_403() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "x").unwrap();
        let mount = StaticFiles::builder("/s", dir.path())
            .dotfiles(DotfilePolicy::Deny)
            .build();
        let err = mount.try_serve(&ctx_get("/s/.env", &[])).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn dotfiles_allow_serves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".well-known"), "ok").unwrap();
        let mount = StaticFiles::builder("/s", dir.path())
            .dotfiles(DotfilePolicy::Allow)
            .build();
        let resp = mount
            .try_serve(&ctx_get("/s/.well-known", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn directories_fall_back_to_index_files() {
        let (_dir, mount) = fixture();
        let resp = mount
            .try_serve(&ctx_get("/assets/docs", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body_bytes(resp).await.as_ref(), b"<html>docs</html>");
    }

    #[tokio::test]
    async fn spa_fallback_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>spa</html>").unwrap();
        let mount = StaticFiles::builder("/", dir.path()).spa(true).build();
        let resp = mount
            .try_serve(&ctx_get("/deep/client/route", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body_bytes(resp).await.as_ref(), b"<html>spa</html>");
    }

    #[tokio::test]
    async fn precompressed_brotli_wins_over_gzip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.css"), "x".repeat(4096)).unwrap();
        let mount = StaticFiles::builder("/s", dir.path())
            .precompress(true)
            .build();
        let ctx = ctx_get("/s/big.css", &[("accept-encoding", "gzip, br")]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.headers()[header::CONTENT_ENCODING], "br");
        assert_eq!(resp.headers()[header::VARY], "Accept-Encoding");
    }

    #[tokio::test]
    async fn gzip_served_when_brotli_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.css"), "y".repeat(4096)).unwrap();
        let mount = StaticFiles::builder("/s", dir.path())
            .precompress(true)
            .build();
        let ctx = ctx_get("/s/big.css", &[("accept-encoding", "gzip")]);
        let resp = mount.try_serve(&ctx).await.unwrap().unwrap();
        assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");

        // Round-trip the gzip variant back to the original bytes.
        use std::io::Read;
        let body = body_bytes(resp).await;
        let mut decoder = flate2::read::GzDecoder::new(&body[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "y".repeat(4096));
    }

    #[tokio::test]
    async fn cache_accounts_bytes() {
        let (_dir, mount) = fixture();
        assert_eq!(mount.cached_bytes(), 0);
        mount
            .try_serve(&ctx_get("/assets/app.css", &[]))
            .await
            .unwrap()
            .unwrap();
        assert!(mount.cached_bytes() > 0);
    }

    #[tokio::test]
    async fn large_files_stream_past_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![3u8; 8192];
        std::fs::write(dir.path().join("big.bin"), &data).unwrap();
        let mut opts = StaticOptions::default();
        opts.max_file_size = 1024;
        let mount = StaticFiles::builder("/s", dir.path()).options(opts).build();

        let resp = mount
            .try_serve(&ctx_get("/s/big.bin", &[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await.len(), 8192);
        assert_eq!(mount.cached_bytes(), 0);
    }

    #[test]
    fn etag_is_stable_for_same_inputs() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(make_etag(t, 1234), make_etag(t, 1234));
        assert_ne!(make_etag(t, 1234), make_etag(t, 1235));
    }

    #[test]
    fn http_date_round_trips() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = http_date(t);
        let parsed = parse_http_date(&formatted).unwrap();
        assert_eq!(
            parsed.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            1_700_000_000
        );
    }
}
