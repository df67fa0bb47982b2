//! HTTP header map with case-insensitive name lookup.
//!
//! HTTP headers are order-preserving and case-insensitive per [RFC 9110 §5].

use std::fmt;

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name,
/// matching the semantics of HTTP/1.1 header fields (RFC 9110 §5.3).
///
/// # Examples
///
/// ```
/// use ringcache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html; charset=utf-8");
/// headers.set("Cache-Hit-Status", "cache_miss");
///
/// assert_eq!(headers.get("content-type"), Some("text/html; charset=utf-8"));
/// assert_eq!(headers.get("cache-hit-status"), Some("cache_miss"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Replaces every entry for `name` with a single `(name, value)` pair.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
