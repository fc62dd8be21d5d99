//! Request-id middleware.
//!
//! Reads the configured header (default `X-Request-ID`) and, when absent,
//! generates an id — UUID v4, timestamp-random, or random hex bytes per
//! configuration. The id lands on the context for the logger and other
//! middleware, and is echoed on the response header unless disabled. In
//! echo-only mode requests without the header simply go untagged.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::middleware::request_id::{RequestId, RequestIdOptions};
//! use nextrush::app::App;
//!
//! let mut app = App::new();
//! app.plugin(RequestId::new(RequestIdOptions::default()));
//! ```

use anyhow::Result;
use http::{HeaderName, HeaderValue};
use serde::Deserialize;

use crate::{app::App, plugins::Plugin};

/// Id generation strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdGenerator {
    /// UUID v4.
    #[default]
    Uuid,
    /// Millisecond timestamp plus a random suffix.
    TimestampRandom,
    /// 16 random bytes, hex encoded.
    RandomBytes,
}

/// Request-id configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RequestIdOptions {
    /// Header to read and write.
    pub header: String,
    /// Only propagate ids supplied by the client; never generate.
    pub echo_only: bool,
    /// Mirror the id on the response header.
    pub set_response_header: bool,
    /// Generation strategy for missing ids.
    pub generator: IdGenerator,
}

impl Default for RequestIdOptions {
    fn default() -> Self {
        Self {
            header: "X-Request-ID".to_string(),
            echo_only: false,
            set_response_header: true,
            generator: IdGenerator::Uuid,
        }
    }
}

fn generate(generator: IdGenerator) -> String {
    match generator {
        IdGenerator::Uuid => uuid::Uuid::new_v4().to_string(),
        IdGenerator::TimestampRandom => {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", millis, &suffix[..8])
        }
        IdGenerator::RandomBytes => {
            let id = uuid::Uuid::new_v4();
            let mut out = String::with_capacity(32);
            for byte in id.as_bytes() {
                out.push_str(&format!("{byte:02x}"));
            }
            out
        }
    }
}

/// Request-id plugin.
#[derive(Clone, Default)]
pub struct RequestId {
    opts: RequestIdOptions,
}

impl RequestId {
    /// Creates the plugin with the given options.
    pub fn new(opts: RequestIdOptions) -> Self {
        Self { opts }
    }
}

impl Plugin for RequestId {
    fn name(&self) -> &'static str {
        "RequestId"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let opts = self.opts.clone();
        let header = HeaderName::from_bytes(opts.header.to_ascii_lowercase().as_bytes())
            .unwrap_or(HeaderName::from_static("x-request-id"));

        app.use_middleware(move |mut ctx, next| {
            let opts = opts.clone();
            let header = header.clone();
            async move {
                let id = match ctx.header(header.as_str()) {
                    Some(existing) => Some(existing.to_owned()),
                    None if opts.echo_only => None,
                    None => Some(generate(opts.generator)),
                };

                let Some(id) = id else {
                    return next.run(ctx).await;
                };
                ctx.set_request_id(id.clone());

                let value = HeaderValue::from_str(&id).ok();
                match next.run(ctx).await {
                    Ok(mut resp) => {
                        if opts.set_response_header {
                            if let Some(value) = value {
                                resp.headers_mut().insert(header, value);
                            }
                        }
                        Ok(resp)
                    }
                    Err(err) => {
                        let err = err.with_request_id(id);
                        match (opts.set_response_header, value) {
                            (true, Some(value)) => Err(err.with_header(header, value)),
                            _ => Err(err),
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let a = generate(IdGenerator::Uuid);
        let b = generate(IdGenerator::Uuid);
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn timestamp_ids_embed_the_clock() {
        let id = generate(IdGenerator::TimestampRandom);
        let (stamp, _suffix) = id.split_once('-').unwrap();
        assert!(stamp.parse::<u128>().unwrap() > 1_600_000_000_000);
    }

    #[test]
    fn random_bytes_are_hex() {
        let id = generate(IdGenerator::RandomBytes);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
