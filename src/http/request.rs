//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. The body is stored
/// as a [`Bytes`] buffer.
///
/// # Examples
///
/// ```
/// use ringcache::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.host(), "localhost");
/// assert!(request.is_header_only());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// The body is taken from `buf[offset..offset + Content-Length]`, clamped to
    /// what is available; callers that need the full body must wait until
    /// `buf` holds `offset + content_length()` bytes before parsing.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.find('?') {
            Some(pos) => (
                raw_path[..pos].to_owned(),
                Some(raw_path[pos + 1..].to_owned()),
            ),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let declared = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body_end = buf.len().min(body_offset + declared);
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the `Host` header value, or an empty string when absent.
    pub fn host(&self) -> &str {
        self.headers.get("host").unwrap_or("")
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the request carries no body at all: no body bytes,
    /// no positive `Content-Length` and no `Transfer-Encoding`.
    pub fn is_header_only(&self) -> bool {
        self.body.is_empty()
            && !self.headers.contains("transfer-encoding")
            && self.content_length().unwrap_or(0) == 0
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1, // HTTP/1.1 default: keep-alive
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert!(req.is_keep_alive());
        assert_eq!(req.host(), "localhost");
        assert_eq!(offset, raw.len()); // no body
        assert!(req.is_header_only());
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn keep_alive_http11_default() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");
        assert_eq!(req.body().as_ref(), b"hello");
        assert!(!req.is_header_only());
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"ok");
    }

    #[test]
    fn chunked_request_is_not_header_only() {
        let raw = b"GET /api/x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_header_only());
    }

    #[test]
    fn missing_host_is_empty() {
        let raw = b"GET /x HTTP/1.0\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.host(), "");
        assert!(!req.is_keep_alive());
    }
}
