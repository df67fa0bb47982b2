//! Cache keys and stored responses.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::http::{Headers, Request, Response, StatusCode};

/// Response header carrying the cache outcome of a request.
pub const CACHE_STATUS_HEADER: &str = "cache-hit-status";

/// The cache outcome attached to every response produced by a cached pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served straight from the ring buffer.
    Hit,
    /// Fetched from upstream by this request.
    Miss,
    /// Parked behind a leader and served its result.
    CoalescedHit,
}

impl CacheStatus {
    /// Returns the header value for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache_hit",
            Self::Miss => "cache_miss",
            Self::CoalescedHit => "coalesced_hit",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a cacheable response by `(host, path)`.
///
/// The query string and all other headers are deliberately left out, so
/// `/items?page=1` and `/items?page=2` share a key. Ordering is lexicographic
/// on host first, then path.
///
/// ```
/// use ringcache::cache::CacheKey;
///
/// let a = CacheKey::new("a.example", "/z");
/// let b = CacheKey::new("b.example", "/a");
/// assert!(a < b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    host: String,
    path: String,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Builds the key for `request` from its `Host` header and query-less path.
    pub fn from_request(request: &Request) -> Self {
        Self::new(request.host(), request.path())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

/// An upstream response captured for replay. Never mutated once stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Headers,
    trailers: Option<Headers>,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(
        status: StatusCode,
        headers: Headers,
        body: impl Into<Bytes>,
        trailers: Option<Headers>,
    ) -> Self {
        Self {
            status,
            headers,
            trailers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The full upstream header set, as received.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Synthesizes a local reply from the stored status and body, tagged
    /// with `status`.
    pub fn to_reply(&self, status: CacheStatus) -> Response {
        Response::new(self.status)
            .header(CACHE_STATUS_HEADER, status.as_str())
            .body_bytes(self.body.clone())
    }
}

/// One occupied ring slot.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: CacheKey,
    pub value: Rc<CachedResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn key_ignores_query_string() {
        let a = CacheKey::from_request(&request(
            "GET /items?page=1 HTTP/1.1\r\nHost: shop\r\n\r\n",
        ));
        let b = CacheKey::from_request(&request(
            "GET /items?page=2 HTTP/1.1\r\nHost: shop\r\n\r\n",
        ));
        assert_eq!(a, b);
        assert_eq!(a.path(), "/items");
    }

    #[test]
    fn key_ignores_other_headers() {
        let a = CacheKey::from_request(&request(
            "GET /x HTTP/1.1\r\nHost: shop\r\nAccept: text/html\r\n\r\n",
        ));
        let b = CacheKey::from_request(&request(
            "GET /x HTTP/1.1\r\nHost: shop\r\nAccept: application/json\r\n\r\n",
        ));
        assert_eq!(a, b);
    }

    #[test]
    fn key_distinguishes_hosts() {
        assert_ne!(CacheKey::new("a", "/x"), CacheKey::new("b", "/x"));
    }

    #[test]
    fn key_orders_by_host_then_path() {
        let mut keys = vec![
            CacheKey::new("b", "/a"),
            CacheKey::new("a", "/z"),
            CacheKey::new("a", "/b"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                CacheKey::new("a", "/b"),
                CacheKey::new("a", "/z"),
                CacheKey::new("b", "/a"),
            ]
        );
    }

    #[test]
    fn reply_carries_status_body_and_marker() {
        let mut headers = Headers::new();
        headers.insert("X-Upstream", "1");
        let cached = CachedResponse::new(StatusCode::NotFound, headers, "gone", None);

        let reply = cached.to_reply(CacheStatus::Hit);
        assert_eq!(reply.status(), StatusCode::NotFound);
        assert_eq!(reply.content().as_ref(), b"gone");
        assert_eq!(reply.headers().get(CACHE_STATUS_HEADER), Some("cache_hit"));
        assert!(!reply.headers().contains("x-upstream"));
    }
}
