//! Response generation utilities and trait implementations.
//!
//! The [`Responder`] trait lets handlers return plain values — strings, status
//! tuples, JSON wrappers, finished responses — that the framework converts into
//! `Response` objects. Error types that surface directly to clients also
//! implement it.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::responder::{Responder, Json};
//! use http::StatusCode;
//!
//! let text = "Hello, World!".into_response();
//! let created = (StatusCode::CREATED, "made it").into_response();
//! let payload = Json(serde_json::json!({ "ok": true })).into_response();
//! ```

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode, header};
use http_body_util::Full;
use serde::Serialize;

use crate::body::RushBody;

/// Canonical 404 body used when nothing more specific applies.
pub const NOT_FOUND: &str = "Not Found";

/// Trait for converting types into HTTP responses.
pub trait Responder {
    /// Converts the implementing type into an HTTP response.
    fn into_response(self) -> Response<RushBody>;
}

impl Responder for Response<RushBody> {
    fn into_response(self) -> Response<RushBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<RushBody> {
        Response::new(RushBody::new(Full::from(Bytes::from_static(
            self.as_bytes(),
        ))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<RushBody> {
        Response::new(RushBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<RushBody> {
        Response::new(RushBody::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response<RushBody> {
        match self {}
    }
}

impl Responder for StatusCode {
    fn into_response(self) -> Response<RushBody> {
        let mut res = Response::new(RushBody::empty());
        *res.status_mut() = self;
        res
    }
}

impl Responder for RushBody {
    fn into_response(self) -> Response<RushBody> {
        Response::new(self)
    }
}

/// Wrapper for static header name-value pairs attached to an empty response.
pub struct StaticHeaders<const N: usize>(pub [(HeaderName, &'static str); N]);

impl<const N: usize> Responder for (StatusCode, StaticHeaders<N>) {
    fn into_response(self) -> Response<RushBody> {
        let (status, StaticHeaders(headers)) = self;
        let mut res = Response::new(RushBody::empty());
        *res.status_mut() = status;

        for (name, value) in headers {
            res.headers_mut()
                .append(name, HeaderValue::from_static(value));
        }
        res
    }
}

impl<R> Responder for (StatusCode, R)
where
    R: Display,
{
    fn into_response(self) -> Response<RushBody> {
        let (status, body) = self;
        let mut res = Response::new(RushBody::new(Full::from(Bytes::from(body.to_string()))));
        *res.status_mut() = status;
        res
    }
}

/// JSON response wrapper.
///
/// Serializes the inner value and sets `Content-Type: application/json`.
/// Serialization failure degrades to a 500 with a generic body; the detail is
/// logged, never sent.
pub struct Json<T>(pub T);

impl<T> Responder for Json<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response<RushBody> {
        match serde_json::to_vec(&self.0) {
            Ok(buf) => {
                let mut res = Response::new(RushBody::from(buf));
                res.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                res
            }
            Err(err) => {
                tracing::error!(error = %err, "response serialization failed");
                let mut res =
                    Response::new(RushBody::from(r#"{"error":"internal server error"}"#));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                res
            }
        }
    }
}

impl<T> Responder for (StatusCode, Json<T>)
where
    T: Serialize,
{
    fn into_response(self) -> Response<RushBody> {
        let (status, json) = self;
        let mut res = json.into_response();
        if res.status() != StatusCode::INTERNAL_SERVER_ERROR {
            *res.status_mut() = status;
        }
        res
    }
}

impl Responder for anyhow::Error {
    fn into_response(self) -> Response<RushBody> {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn str_responds_ok() {
        let resp = "hi".into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hi");
    }

    #[test]
    fn status_tuple_sets_status() {
        let resp = (StatusCode::CREATED, "done").into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn json_sets_content_type() {
        let resp = Json(serde_json::json!({ "n": 3 })).into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["n"], 3);
    }
}
