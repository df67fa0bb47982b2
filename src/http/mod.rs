//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the core HTTP primitives:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], and [`Response`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

macro_rules! status_codes {
    ($( $name:ident = $code:literal, $reason:literal; )+) => {
        /// An HTTP response status code.
        ///
        /// Common codes have named variants; every other three-digit code is
        /// carried as [`StatusCode::Other`] so upstream statuses survive a
        /// round trip through the cache unchanged.
        ///
        /// # Examples
        ///
        /// ```
        /// use ringcache::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert_eq!(StatusCode::from_u16(418).map(StatusCode::as_u16), Some(418));
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $( $name, )+
            /// A code without a named variant. Build it through
            /// [`StatusCode::from_u16`] so named codes stay canonical.
            Other(u16),
        }

        impl StatusCode {
            /// Returns the numeric status code as a `u16`.
            pub fn as_u16(self) -> u16 {
                match self {
                    $( Self::$name => $code, )+
                    Self::Other(code) => code,
                }
            }

            /// Maps a numeric code to its variant. Returns `None` outside
            /// `100..=999`.
            ///
            /// ```
            /// use ringcache::http::StatusCode;
            ///
            /// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
            /// assert_eq!(StatusCode::from_u16(299), Some(StatusCode::Other(299)));
            /// assert_eq!(StatusCode::from_u16(42), None);
            /// ```
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$name), )+
                    100..=999 => Some(Self::Other(code)),
                    _ => None,
                }
            }

            /// Returns the reason phrase written on the status line.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$name => $reason, )+
                    Self::Other(_) => "Unknown",
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";
    SwitchingProtocols = 101, "Switching Protocols";

    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NoContent = 204, "No Content";
    PartialContent = 206, "Partial Content";

    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    SeeOther = 303, "See Other";
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";

    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    Conflict = 409, "Conflict";
    Gone = 410, "Gone";
    LengthRequired = 411, "Length Required";
    PayloadTooLarge = 413, "Payload Too Large";
    UriTooLong = 414, "URI Too Long";
    UnsupportedMediaType = 415, "Unsupported Media Type";
    UnprocessableEntity = 422, "Unprocessable Entity";
    TooManyRequests = 429, "Too Many Requests";

    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
    HttpVersionNotSupported = 505, "HTTP Version Not Supported";
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// An HTTP request method.
///
/// Only `GET` is ever cached; the rest are kept so request lines parse and
/// log faithfully. Extension methods land in `Custom`.
///
/// # Examples
///
/// ```
/// use ringcache::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}
