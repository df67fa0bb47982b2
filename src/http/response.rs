//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use ringcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    trailers: Option<Headers>,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            trailers: None,
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Attaches trailer fields. A response with trailers is serialized with
    /// `Transfer-Encoding: chunked` instead of `Content-Length`.
    #[must_use]
    pub fn with_trailers(mut self, trailers: Headers) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body bytes.
    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Returns the trailer fields, if any were attached.
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>`, or `Transfer-Encoding: chunked` followed by the
    ///   trailer section when trailers are attached.
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        match self.trailers {
            None => {
                // Content-Length is always the last header before the blank line
                buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
                buf.put(&b"\r\n"[..]);
                if !self.body.is_empty() {
                    buf.put(self.body.as_ref());
                }
            }
            Some(trailers) => {
                buf.put(&b"Transfer-Encoding: chunked\r\n\r\n"[..]);
                if !self.body.is_empty() {
                    buf.put(format!("{content_length:x}\r\n").as_bytes());
                    buf.put(self.body.as_ref());
                    buf.put(&b"\r\n"[..]);
                }
                buf.put(&b"0\r\n"[..]);
                buf.put(trailers.to_string().as_bytes());
                buf.put(&b"\r\n"[..]);
            }
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
