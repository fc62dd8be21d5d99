//! Response compression plugin.
//!
//! Negotiates an encoding from the client's `Accept-Encoding` — brotli is
//! preferred over gzip when both are acceptable — and swaps the response body
//! for its compressed form, setting `Content-Encoding` and
//! `Vary: Accept-Encoding`. Responses below the size threshold, with
//! non-compressible MIME types, with an existing `Content-Encoding`, or with
//! non-success statuses are left untouched.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::plugins::compression::CompressionBuilder;
//!
//! let compression = CompressionBuilder::new()
//!     .enable_gzip(true)
//!     .enable_brotli(true)
//!     .min_size(1024)
//!     .build();
//! ```

use std::io::{Read, Write};

use anyhow::Result;
use bytes::Bytes;
use flate2::{Compression as GzLevel, write::GzEncoder};
use http::{
    HeaderValue, StatusCode,
    header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE},
};
use http_body_util::BodyExt;
use serde::Deserialize;

use crate::{
    app::App,
    body::RushBody,
    context::Context,
    middleware::Next,
    plugins::Plugin,
    types::HttpResult,
};

/// Supported response encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Gzip (RFC 1952).
    Gzip,
    /// Brotli (RFC 7932).
    Brotli,
}

impl Encoding {
    fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Brotli => "br",
        }
    }
}

/// Compression configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enabled encodings.
    pub enabled: Vec<Encoding>,
    /// Minimum body size in bytes before compression applies.
    pub min_size: usize,
    /// Gzip level (1-9).
    pub gzip_level: u32,
    /// Brotli level (1-11).
    pub brotli_level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: vec![Encoding::Gzip, Encoding::Brotli],
            min_size: 1024,
            gzip_level: 5,
            brotli_level: 5,
        }
    }
}

/// Builder for the compression plugin.
pub struct CompressionBuilder(Config);

impl Default for CompressionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionBuilder {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self(Config::default())
    }

    /// Enables or disables gzip.
    pub fn enable_gzip(mut self, yes: bool) -> Self {
        if yes && !self.0.enabled.contains(&Encoding::Gzip) {
            self.0.enabled.push(Encoding::Gzip)
        }
        if !yes {
            self.0.enabled.retain(|e| *e != Encoding::Gzip)
        }
        self
    }

    /// Enables or disables brotli.
    pub fn enable_brotli(mut self, yes: bool) -> Self {
        if yes && !self.0.enabled.contains(&Encoding::Brotli) {
            self.0.enabled.push(Encoding::Brotli)
        }
        if !yes {
            self.0.enabled.retain(|e| *e != Encoding::Brotli)
        }
        self
    }

    /// Sets the minimum body size threshold.
    pub fn min_size(mut self, bytes: usize) -> Self {
        self.0.min_size = bytes;
        self
    }

    /// Sets the gzip level (1-9).
    pub fn gzip_level(mut self, lvl: u32) -> Self {
        self.0.gzip_level = lvl.min(9);
        self
    }

    /// Sets the brotli level (1-11).
    pub fn brotli_level(mut self, lvl: u32) -> Self {
        self.0.brotli_level = lvl.min(11);
        self
    }

    /// Builds the plugin.
    pub fn build(self) -> CompressionPlugin {
        CompressionPlugin { cfg: self.0 }
    }
}

/// Response compression plugin.
#[derive(Clone, Default)]
pub struct CompressionPlugin {
    cfg: Config,
}

impl CompressionPlugin {
    /// Creates the plugin straight from a configuration object.
    pub fn from_config(cfg: Config) -> Self {
        Self { cfg }
    }
}

impl Plugin for CompressionPlugin {
    fn name(&self) -> &'static str {
        "CompressionPlugin"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let cfg = self.cfg.clone();
        app.use_middleware(move |ctx, next| {
            let cfg = cfg.clone();
            async move { compress_middleware(ctx, next, cfg).await }
        });
        Ok(())
    }
}

async fn compress_middleware(ctx: Context, next: Next, cfg: Config) -> HttpResult {
    let accepted = ctx
        .header(ACCEPT_ENCODING.as_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut resp = next.run(ctx).await?;
    let Some(encoding) = choose_encoding(&accepted, &cfg.enabled) else {
        return Ok(resp);
    };

    let status = resp.status();
    if !status.is_success() || status == StatusCode::NO_CONTENT {
        return Ok(resp);
    }
    if resp.headers().contains_key(CONTENT_ENCODING) {
        return Ok(resp);
    }
    if let Some(ct) = resp.headers().get(CONTENT_TYPE) {
        let ct = ct.to_str().unwrap_or("");
        if !(ct.starts_with("text/")
            || ct.contains("json")
            || ct.contains("javascript")
            || ct.contains("xml")
            || ct.contains("svg"))
        {
            return Ok(resp);
        }
    }

    let body_bytes = match std::mem::replace(resp.body_mut(), RushBody::empty())
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(error = %err, "body collection failed, response dropped");
            return Ok(resp);
        }
    };
    if body_bytes.len() < cfg.min_size {
        *resp.body_mut() = RushBody::from(body_bytes);
        return Ok(resp);
    }

    let compressed = match encoding {
        Encoding::Gzip => compress_gzip(&body_bytes, cfg.gzip_level),
        Encoding::Brotli => compress_brotli(&body_bytes, cfg.brotli_level),
    };
    match compressed {
        Ok(compressed) => {
            *resp.body_mut() = RushBody::from(Bytes::from(compressed));
            resp.headers_mut()
                .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
            resp.headers_mut().remove(CONTENT_LENGTH);
            // Merge, never replace: CORS may vary on Origin for the same
            // response.
            crate::plugins::append_vary(resp.headers_mut(), "Accept-Encoding");
        }
        Err(err) => {
            tracing::warn!(error = %err, "compression failed, sending identity");
            *resp.body_mut() = RushBody::from(body_bytes);
        }
    }
    Ok(resp)
}

/// Picks the preferred encoding both sides support; brotli wins over gzip.
fn choose_encoding(header: &str, enabled: &[Encoding]) -> Option<Encoding> {
    let test = |e: Encoding| header.contains(e.as_str()) && enabled.contains(&e);
    if test(Encoding::Brotli) {
        Some(Encoding::Brotli)
    } else if test(Encoding::Gzip) {
        Some(Encoding::Gzip)
    } else {
        None
    }
}

fn compress_gzip(data: &[u8], lvl: u32) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), GzLevel::new(lvl));
    enc.write_all(data)?;
    enc.finish()
}

fn compress_brotli(data: &[u8], lvl: u32) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::CompressorReader::new(data, 4096, lvl, 22).read_to_end(&mut out)?;
    Ok(out)
}
