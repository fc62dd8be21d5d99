//! Request body intake and Content-Type-dispatched parsing.
//!
//! The body parser consumes the raw request stream on demand and assigns the
//! decoded value to `ctx.body`. The parser is chosen by Content-Type prefix:
//!
//! | Content-Type | Result |
//! |---|---|
//! | `application/json` | JSON value, `null` for an empty body |
//! | `application/x-www-form-urlencoded` | map of string → string or string list |
//! | `multipart/form-data` | fields map plus uploaded files |
//! | `text/*` | string in the declared charset (default UTF-8) |
//! | anything else or missing | raw bytes |
//!
//! Intake is streaming and bounded: accumulation stops with a 413 as soon as
//! the configured limit is crossed, before the remaining bytes are read.
//! Malformed payloads surface 400; an unknown content type is only an error
//! when the raw fallback is disabled.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::bodyparser::{BodyParser, BodyParserOptions, ParsedBody};
//! use nextrush::app::App;
//!
//! let mut app = App::new();
//! app.plugin(BodyParser::new(BodyParserOptions::default()));
//!
//! app.post("/echo", |ctx: nextrush::context::Context| async move {
//!     match &ctx.body {
//!         ParsedBody::Json(value) => ctx.json(value),
//!         _ => ctx.text("expected JSON"),
//!     }
//! });
//! ```

use std::collections::HashMap;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use http::Method;
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::{
    app::App,
    context::Context,
    errors::HttpError,
    plugins::Plugin,
    types::BoxBody,
};

pub mod multipart;

pub use multipart::{FileStorage, MultipartBody, UploadedFile};

/// A URL-encoded form value: single or repeated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormValue {
    /// The key appeared once.
    Single(String),
    /// The key appeared multiple times, in order.
    Many(Vec<String>),
}

impl FormValue {
    /// First (or only) value.
    pub fn first(&self) -> &str {
        match self {
            FormValue::Single(v) => v,
            FormValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            FormValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = FormValue::Many(vec![first, value]);
            }
            FormValue::Many(vs) => vs.push(value),
        }
    }
}

/// The decoded request body.
#[derive(Debug, Default)]
pub enum ParsedBody {
    /// Nothing parsed yet.
    #[default]
    Unset,
    /// `application/json`.
    Json(Value),
    /// `application/x-www-form-urlencoded`.
    Form(HashMap<String, FormValue>),
    /// `text/*`.
    Text(String),
    /// Raw bytes for everything else.
    Raw(Bytes),
    /// `multipart/form-data`.
    Multipart(MultipartBody),
}

impl ParsedBody {
    /// The JSON value, when the body parsed as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedBody::Json(v) => Some(v),
            _ => None,
        }
    }

    /// The multipart result, when the body parsed as multipart.
    pub fn as_multipart(&self) -> Option<&MultipartBody> {
        match self {
            ParsedBody::Multipart(m) => Some(m),
            _ => None,
        }
    }
}

/// Body parser configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BodyParserOptions {
    /// Total request body cap in bytes.
    pub max_size: usize,
    /// Per-file cap for multipart uploads.
    pub max_file_size: usize,
    /// Maximum number of files in one multipart request.
    pub max_files: usize,
    /// Directory for spilled uploads; uploads stay in memory when unset.
    pub temp_dir: Option<std::path::PathBuf>,
    /// In-memory threshold above which uploads spill to `temp_dir`.
    pub temp_threshold: usize,
    /// Normalize text bodies: CRLF to LF plus trim.
    pub normalize_text: bool,
    /// Parse unknown content types as raw bytes instead of rejecting with 415.
    pub raw_fallback: bool,
}

impl Default for BodyParserOptions {
    fn default() -> Self {
        Self {
            max_size: 1024 * 1024,
            max_file_size: 10 * 1024 * 1024,
            max_files: 16,
            temp_dir: None,
            temp_threshold: 256 * 1024,
            normalize_text: false,
            raw_fallback: true,
        }
    }
}

/// Reads the body stream into a buffer, failing fast past `limit`.
pub(crate) async fn read_limited(mut body: BoxBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|err| HttpError::bad_request(format!("body read failed: {err}")))?;
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                return Err(HttpError::payload_too_large(format!(
                    "request body exceeds limit of {limit} bytes"
                )));
            }
            buf.extend_from_slice(&data);
        }
    }
    Ok(buf.freeze())
}

/// Parses the request body according to its Content-Type and stores the
/// result on the context.
///
/// A second call is a no-op: the raw stream has already been consumed.
pub async fn parse(ctx: &mut Context, opts: &BodyParserOptions) -> Result<(), HttpError> {
    let Some(body) = ctx.take_raw_body() else {
        return Ok(());
    };

    let content_type = ctx.header("content-type").unwrap_or("").to_owned();
    let mime: Option<mime::Mime> = content_type.parse().ok();

    let parsed = match &mime {
        Some(m) if m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA => {
            let boundary = multer::parse_boundary(&content_type)
                .map_err(|err| HttpError::bad_request(format!("invalid multipart boundary: {err}")))?;
            let multipart = multipart::parse(body, boundary, opts).await?;
            ParsedBody::Multipart(multipart)
        }
        _ => {
            let bytes = read_limited(body, opts.max_size).await?;
            dispatch_buffered(bytes, mime.as_ref(), opts)?
        }
    };

    ctx.body = parsed;
    Ok(())
}

fn dispatch_buffered(
    bytes: Bytes,
    mime: Option<&mime::Mime>,
    opts: &BodyParserOptions,
) -> Result<ParsedBody, HttpError> {
    match mime {
        Some(m) if m.type_() == mime::APPLICATION && m.subtype() == mime::JSON => {
            if bytes.is_empty() {
                return Ok(ParsedBody::Json(Value::Null));
            }
            let value = serde_json::from_slice(&bytes)
                .map_err(|err| HttpError::bad_request(format!("malformed JSON body: {err}")))?;
            Ok(ParsedBody::Json(value))
        }
        Some(m)
            if m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED =>
        {
            if std::str::from_utf8(&bytes).is_err() {
                return Err(HttpError::bad_request("form body is not valid UTF-8"));
            }
            let mut map: HashMap<String, FormValue> = HashMap::new();
            for (key, value) in form_urlencoded::parse(&bytes) {
                match map.entry(key.into_owned()) {
                    std::collections::hash_map::Entry::Occupied(mut occupied) => {
                        occupied.get_mut().push(value.into_owned());
                    }
                    std::collections::hash_map::Entry::Vacant(vacant) => {
                        vacant.insert(FormValue::Single(value.into_owned()));
                    }
                }
            }
            Ok(ParsedBody::Form(map))
        }
        Some(m) if m.type_() == mime::TEXT => {
            let charset = m
                .get_param(mime::CHARSET)
                .map(|c| c.as_str().to_ascii_lowercase());
            let mut text = match charset.as_deref() {
                None | Some("utf-8") | Some("utf8") => String::from_utf8(bytes.to_vec())
                    .map_err(|_| HttpError::bad_request("text body is not valid UTF-8"))?,
                // Unknown charsets decode lossily rather than failing.
                _ => String::from_utf8_lossy(&bytes).into_owned(),
            };
            if opts.normalize_text {
                text = text.replace("\r\n", "\n").trim().to_string();
            }
            Ok(ParsedBody::Text(text))
        }
        _ if opts.raw_fallback => Ok(ParsedBody::Raw(bytes)),
        Some(m) => Err(HttpError::unsupported_media_type(format!(
            "unsupported content type: {m}"
        ))),
        None => Err(HttpError::unsupported_media_type(
            "missing content type and raw parsing is disabled",
        )),
    }
}

/// Body parser plugin: registers global middleware that decodes bodies for
/// methods that carry them.
#[derive(Clone, Default)]
pub struct BodyParser {
    opts: BodyParserOptions,
}

impl BodyParser {
    /// Creates the plugin with the given options.
    pub fn new(opts: BodyParserOptions) -> Self {
        Self { opts }
    }
}

impl Plugin for BodyParser {
    fn name(&self) -> &'static str {
        "BodyParser"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let opts = self.opts.clone();
        app.use_middleware(move |mut ctx, next| {
            let opts = opts.clone();
            async move {
                if has_request_body(&ctx) {
                    parse(&mut ctx, &opts).await?;
                }
                next.run(ctx).await
            }
        });
        Ok(())
    }
}

fn has_request_body(ctx: &Context) -> bool {
    let method = ctx.method();
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPool;
    use bytes::Bytes;
    use http_body_util::Full;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn ctx_with(content_type: Option<&str>, body: &[u8]) -> Context {
        let pool = ContextPool::new(1);
        let mut builder = http::Request::builder().method(Method::POST).uri("/");
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let req = builder.body(Full::new(Bytes::copy_from_slice(body))).unwrap();
        pool.acquire(
            req,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
            false,
        )
    }

    #[tokio::test]
    async fn json_bodies_parse() {
        let mut ctx = ctx_with(Some("application/json"), br#"{"name":"nyx","age":3}"#);
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        let value = ctx.body.as_json().unwrap();
        assert_eq!(value["name"], "nyx");
        assert_eq!(value["age"], 3);
    }

    #[tokio::test]
    async fn empty_json_body_is_null() {
        let mut ctx = ctx_with(Some("application/json"), b"");
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        assert_eq!(ctx.body.as_json(), Some(&Value::Null));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let mut ctx = ctx_with(Some("application/json"), b"{nope");
        let err = parse(&mut ctx, &BodyParserOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn form_duplicate_keys_accumulate() {
        let mut ctx = ctx_with(
            Some("application/x-www-form-urlencoded"),
            b"tag=a&name=x&tag=b",
        );
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        let ParsedBody::Form(map) = &ctx.body else {
            panic!("expected form body");
        };
        assert_eq!(map["name"], FormValue::Single("x".into()));
        assert_eq!(
            map["tag"],
            FormValue::Many(vec!["a".into(), "b".into()])
        );
    }

    #[tokio::test]
    async fn form_round_trips_serialization() {
        let encoded: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("a", "1")
            .append_pair("b", "two words")
            .finish();
        let mut ctx = ctx_with(
            Some("application/x-www-form-urlencoded"),
            encoded.as_bytes(),
        );
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        let ParsedBody::Form(map) = &ctx.body else {
            panic!("expected form body");
        };
        assert_eq!(map["a"].first(), "1");
        assert_eq!(map["b"].first(), "two words");
    }

    #[tokio::test]
    async fn text_bodies_decode_with_default_charset() {
        let mut ctx = ctx_with(Some("text/plain"), "héllo".as_bytes());
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        assert!(matches!(&ctx.body, ParsedBody::Text(t) if t == "héllo"));
    }

    #[tokio::test]
    async fn text_normalization_applies_when_enabled() {
        let opts = BodyParserOptions {
            normalize_text: true,
            ..Default::default()
        };
        let mut ctx = ctx_with(Some("text/plain"), b"  line1\r\nline2  ");
        parse(&mut ctx, &opts).await.unwrap();
        assert!(matches!(&ctx.body, ParsedBody::Text(t) if t == "line1\nline2"));
    }

    #[tokio::test]
    async fn unknown_type_falls_back_to_raw() {
        let mut ctx = ctx_with(Some("application/octet-stream"), &[1, 2, 3]);
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        assert!(matches!(&ctx.body, ParsedBody::Raw(b) if b.as_ref() == [1, 2, 3]));
    }

    #[tokio::test]
    async fn missing_type_is_raw_when_fallback_enabled() {
        let mut ctx = ctx_with(None, b"bytes");
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        assert!(matches!(&ctx.body, ParsedBody::Raw(_)));
    }

    #[tokio::test]
    async fn unsupported_type_without_fallback_is_415() {
        let opts = BodyParserOptions {
            raw_fallback: false,
            ..Default::default()
        };
        let mut ctx = ctx_with(Some("application/octet-stream"), b"x");
        let err = parse(&mut ctx, &opts).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn oversized_body_fails_before_buffering() {
        let opts = BodyParserOptions {
            max_size: 8,
            ..Default::default()
        };
        let mut ctx = ctx_with(Some("application/json"), &[b'a'; 64]);
        let err = parse(&mut ctx, &opts).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn limit_applies_across_streamed_chunks() {
        use futures_util::stream;
        use http_body_util::{BodyExt, StreamBody};
        use hyper::body::Frame;

        let chunks = stream::iter((0..10).map(|_| {
            Ok::<_, std::io::Error>(Frame::data(Bytes::from(vec![b'x'; 10])))
        }));
        let body = StreamBody::new(chunks)
            .map_err(|e| Box::new(e) as _)
            .boxed();
        let err = read_limited(body, 25).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn second_parse_is_a_noop() {
        let mut ctx = ctx_with(Some("application/json"), br#"{"k":1}"#);
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        parse(&mut ctx, &BodyParserOptions::default()).await.unwrap();
        assert!(ctx.body.as_json().is_some());
    }
}
