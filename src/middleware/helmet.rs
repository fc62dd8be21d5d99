//! Security header middleware.
//!
//! Applies a fixed set of security headers to every response per the
//! configuration flags, removes `X-Powered-By`, and renders
//! `Content-Security-Policy` from a directives map. The headers survive onto
//! error responses raised downstream of this middleware.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::middleware::helmet::{Helmet, HelmetOptions};
//! use nextrush::app::App;
//!
//! let mut app = App::new();
//! let mut opts = HelmetOptions::default();
//! opts.csp_directives = vec![
//!     ("default-src".to_string(), "'self'".to_string()),
//!     ("img-src".to_string(), "*".to_string()),
//! ];
//! app.plugin(Helmet::new(opts));
//! ```

use anyhow::Result;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use serde::Deserialize;

use crate::{app::App, plugins::Plugin};

/// Helmet configuration flags.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HelmetOptions {
    /// `X-Content-Type-Options: nosniff`.
    pub content_type_options: bool,
    /// `X-Frame-Options` value; `None` omits the header.
    pub frame_options: Option<String>,
    /// `X-XSS-Protection: 0` (the modern, non-filtering value).
    pub xss_protection: bool,
    /// `Strict-Transport-Security` max-age in seconds; `None` omits.
    pub hsts_max_age: Option<u64>,
    /// Add `includeSubDomains` to HSTS.
    pub hsts_include_subdomains: bool,
    /// `Referrer-Policy` value; `None` omits.
    pub referrer_policy: Option<String>,
    /// `X-DNS-Prefetch-Control: off`.
    pub dns_prefetch_control: bool,
    /// `X-Download-Options: noopen`.
    pub download_options: bool,
    /// `X-Permitted-Cross-Domain-Policies: none`.
    pub permitted_cross_domain_policies: bool,
    /// `Content-Security-Policy` directives, rendered `name value; …`.
    pub csp_directives: Vec<(String, String)>,
}

impl Default for HelmetOptions {
    fn default() -> Self {
        Self {
            content_type_options: true,
            frame_options: Some("SAMEORIGIN".to_string()),
            xss_protection: true,
            hsts_max_age: Some(15_552_000),
            hsts_include_subdomains: true,
            referrer_policy: Some("no-referrer".to_string()),
            dns_prefetch_control: true,
            download_options: true,
            permitted_cross_domain_policies: true,
            csp_directives: Vec::new(),
        }
    }
}

impl HelmetOptions {
    /// Renders the configured flags into the header set applied to
    /// responses.
    pub fn header_set(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.content_type_options {
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
        }
        if let Some(frame) = &self.frame_options {
            if let Ok(value) = HeaderValue::from_str(frame) {
                headers.insert(header::X_FRAME_OPTIONS, value);
            }
        }
        if self.xss_protection {
            headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
        }
        if let Some(max_age) = self.hsts_max_age {
            let value = if self.hsts_include_subdomains {
                format!("max-age={max_age}; includeSubDomains")
            } else {
                format!("max-age={max_age}")
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
            }
        }
        if let Some(policy) = &self.referrer_policy {
            if let Ok(value) = HeaderValue::from_str(policy) {
                headers.insert(header::REFERRER_POLICY, value);
            }
        }
        if self.dns_prefetch_control {
            headers.insert(
                HeaderName::from_static("x-dns-prefetch-control"),
                HeaderValue::from_static("off"),
            );
        }
        if self.download_options {
            headers.insert(
                HeaderName::from_static("x-download-options"),
                HeaderValue::from_static("noopen"),
            );
        }
        if self.permitted_cross_domain_policies {
            headers.insert(
                HeaderName::from_static("x-permitted-cross-domain-policies"),
                HeaderValue::from_static("none"),
            );
        }
        if !self.csp_directives.is_empty() {
            let csp = self
                .csp_directives
                .iter()
                .map(|(name, value)| format!("{name} {value}"))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(value) = HeaderValue::from_str(&csp) {
                headers.insert(header::CONTENT_SECURITY_POLICY, value);
            }
        }
        headers
    }
}

/// Helmet plugin.
#[derive(Clone, Default)]
pub struct Helmet {
    opts: HelmetOptions,
}

impl Helmet {
    /// Creates the plugin with the given options.
    pub fn new(opts: HelmetOptions) -> Self {
        Self { opts }
    }
}

impl Plugin for Helmet {
    fn name(&self) -> &'static str {
        "Helmet"
    }

    fn setup(&self, app: &App) -> Result<()> {
        let headers = self.opts.header_set();
        app.use_middleware(move |ctx, next| {
            let headers = headers.clone();
            async move {
                match next.run(ctx).await {
                    Ok(mut resp) => {
                        resp.headers_mut().remove("x-powered-by");
                        for (name, value) in headers.iter() {
                            resp.headers_mut().insert(name.clone(), value.clone());
                        }
                        Ok(resp)
                    }
                    // Security headers must survive onto error responses.
                    Err(err) => Err(err.with_headers(&headers)),
                }
            }
        });
        Ok(())
    }
}
