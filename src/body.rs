//! HTTP response body handling utilities.
//!
//! This module provides `RushBody`, a wrapper around HTTP body implementations
//! that supports buffered content, streams, and empty bodies behind a single
//! type. It integrates with Hyper's body system while keeping conversions from
//! common types (`&str`, `String`, `Vec<u8>`, `Bytes`) cheap.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::body::RushBody;
//! use bytes::Bytes;
//! use futures_util::stream;
//!
//! let empty = RushBody::empty();
//! let text = RushBody::from("Hello, World!");
//! let bytes = RushBody::from(Bytes::from("binary data"));
//!
//! let chunks = stream::iter(vec![
//!     Ok::<_, std::io::Error>(Bytes::from("chunk1")),
//!     Ok(Bytes::from("chunk2")),
//! ]);
//! let streaming = RushBody::from_stream(chunks);
//! ```

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// HTTP body wrapper with streaming and conversion support.
///
/// `RushBody` unifies the body types a response can carry: fully buffered
/// bytes, an async stream of chunks, or nothing at all. All constructors box
/// the underlying body so responses compose regardless of their source.
pub struct RushBody(BoxBody);

impl Debug for RushBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RushBody").finish_non_exhaustive()
    }
}

impl RushBody {
    /// Creates a new body from any type implementing the `Body` trait.
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed())
    }

    /// Creates a body from a stream of byte results.
    ///
    /// Useful for data sources that may fail mid-stream, such as file reads;
    /// errors are surfaced through the body's error channel.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
        E: Into<BoxError> + Debug + 'static,
    {
        let stream = stream.map_err(Into::into).map_ok(Frame::data);
        Self(StreamBody::new(stream).boxed())
    }

    /// Creates an empty body with no content.
    ///
    /// Used for responses that only carry status and headers, such as
    /// 204 No Content or 304 Not Modified.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl Default for RushBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for RushBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<&str> for RushBody {
    fn from(buf: &str) -> Self {
        let owned = buf.to_owned();
        Self::new(http_body_util::Full::from(owned))
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for RushBody {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for RushBody {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
