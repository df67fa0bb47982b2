//! Pool descriptors and their lenient decoding.
//!
//! Configuration arrives as loosely structured JSON:
//!
//! ```json
//! {
//!   "follower_timeout_ms": 30000,
//!   "pools": [
//!     { "name": "api_queries", "slots": 512, "match": { "path_prefixes": ["/api/"] } }
//!   ]
//! }
//! ```
//!
//! Decoding never rejects a document. A missing or malformed `pools` list
//! yields zero pools, malformed fields fall back to their defaults, and list
//! elements that are not objects are skipped. What comes out is a fully
//! validated [`CacheConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_POOL_NAME: &str = "unnamed";
pub const DEFAULT_SLOTS: usize = 256;
pub const DEFAULT_FOLLOWER_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors loading configuration text. Content problems never error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One validated pool descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    /// Ring buffer capacity; always positive. Slots are allocated as entries
    /// arrive, so this is an upper bound rather than an up-front cost.
    pub slots: usize,
    pub path_prefixes: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_POOL_NAME.to_string(),
            slots: DEFAULT_SLOTS,
            path_prefixes: Vec::new(),
        }
    }
}

/// The validated cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub pools: Vec<PoolConfig>,
    /// How long a follower stays parked before fetching on its own.
    /// `None` waits for the leader indefinitely.
    pub follower_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            follower_timeout: Some(DEFAULT_FOLLOWER_TIMEOUT),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    pools: Value,
    #[serde(default)]
    follower_timeout_ms: Value,
}

#[derive(Debug, Deserialize)]
struct RawPool {
    #[serde(default)]
    name: Value,
    #[serde(default)]
    slots: Value,
    #[serde(default, rename = "match")]
    matcher: Value,
}

impl CacheConfig {
    /// Decodes an already-parsed document.
    ///
    /// ```
    /// use ringcache::cache::CacheConfig;
    /// use serde_json::json;
    ///
    /// let config = CacheConfig::from_value(&json!({
    ///     "pools": [
    ///         { "name": "api", "slots": "lots", "match": { "path_prefixes": ["/api/", 7] } },
    ///         "not a pool"
    ///     ]
    /// }));
    /// assert_eq!(config.pools.len(), 1);
    /// assert_eq!(config.pools[0].slots, 256);
    /// assert_eq!(config.pools[0].path_prefixes, vec!["/api/"]);
    /// ```
    pub fn from_value(value: &Value) -> Self {
        let raw = match value {
            Value::Object(_) => RawConfig::deserialize(value).unwrap_or_default(),
            Value::Null => RawConfig::default(),
            other => {
                warn!(config = %other, "cache config is not an object; caching disabled");
                RawConfig::default()
            }
        };

        let pools = match &raw.pools {
            Value::Array(items) => items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| RawPool::deserialize(item).ok())
                .map(PoolConfig::from_raw)
                .collect(),
            Value::Null => Vec::new(),
            other => {
                warn!(pools = %other, "`pools` is not a list; caching disabled");
                Vec::new()
            }
        };

        Self {
            pools,
            follower_timeout: follower_timeout(&raw.follower_timeout_ms),
        }
    }

    /// Parses JSON text, then decodes it leniently.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] only when `text` is not JSON at all.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&value))
    }

    /// Reads and decodes a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if it is not JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

impl PoolConfig {
    fn from_raw(raw: RawPool) -> Self {
        let name = match raw.name {
            Value::String(name) => name,
            Value::Null => DEFAULT_POOL_NAME.to_string(),
            other => {
                warn!(name = %other, "pool name is not a string; using default");
                DEFAULT_POOL_NAME.to_string()
            }
        };

        let slots = match raw.slots.as_u64().and_then(|n| usize::try_from(n).ok()) {
            Some(n) if n > 0 => n,
            _ => {
                if !raw.slots.is_null() {
                    warn!(pool = %name, slots = %raw.slots, "invalid slot count; using default");
                }
                DEFAULT_SLOTS
            }
        };

        let path_prefixes = match raw.matcher.get("path_prefixes") {
            Some(Value::Array(prefixes)) => prefixes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            name,
            slots,
            path_prefixes,
        }
    }
}

fn follower_timeout(raw: &Value) -> Option<Duration> {
    match raw {
        Value::Null => Some(DEFAULT_FOLLOWER_TIMEOUT),
        Value::Number(n) => match n.as_u64() {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => {
                warn!(follower_timeout_ms = %n, "invalid follower timeout; using default");
                Some(DEFAULT_FOLLOWER_TIMEOUT)
            }
        },
        other => {
            warn!(follower_timeout_ms = %other, "invalid follower timeout; using default");
            Some(DEFAULT_FOLLOWER_TIMEOUT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;
    use serde_json::json;

    #[test]
    fn full_descriptor() {
        let config = CacheConfig::from_value(&json!({
            "pools": [{
                "name": "api_queries",
                "slots": 512,
                "match": { "path_prefixes": ["/api/", "/v2/"] }
            }]
        }));
        assert_eq!(
            config.pools,
            vec![PoolConfig {
                name: "api_queries".into(),
                slots: 512,
                path_prefixes: vec!["/api/".into(), "/v2/".into()],
            }]
        );
        assert_eq!(config.follower_timeout, Some(DEFAULT_FOLLOWER_TIMEOUT));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = CacheConfig::from_value(&json!({ "pools": [{}] }));
        assert_eq!(config.pools, vec![PoolConfig::default()]);
    }

    #[test]
    fn malformed_fields_fall_back_individually() {
        let config = CacheConfig::from_value(&json!({
            "pools": [{
                "name": 42,
                "slots": -3,
                "match": { "path_prefixes": ["/keep/", null, 9, "/also/"] }
            }]
        }));
        let pool = &config.pools[0];
        assert_eq!(pool.name, DEFAULT_POOL_NAME);
        assert_eq!(pool.slots, DEFAULT_SLOTS);
        assert_eq!(pool.path_prefixes, vec!["/keep/", "/also/"]);
    }

    #[test]
    fn zero_and_fractional_slots_use_default() {
        let config = CacheConfig::from_value(&json!({
            "pools": [{ "slots": 0 }, { "slots": 1.5 }]
        }));
        assert!(config.pools.iter().all(|p| p.slots == DEFAULT_SLOTS));
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let config = CacheConfig::from_value(&json!({
            "pools": ["api", 3, ["/x/"], null, { "name": "real" }]
        }));
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].name, "real");
    }

    #[test]
    fn absent_or_malformed_pool_list_disables_caching() {
        assert!(CacheConfig::from_value(&json!({})).pools.is_empty());
        assert!(CacheConfig::from_value(&json!({ "pools": "nope" })).pools.is_empty());
        assert!(CacheConfig::from_value(&json!([1, 2])).pools.is_empty());
        assert!(CacheConfig::from_value(&Value::Null).pools.is_empty());
    }

    #[test]
    fn match_block_without_prefixes_matches_nothing() {
        let config = CacheConfig::from_value(&json!({
            "pools": [{ "match": "everything" }, { "match": { "path_prefixes": "/a/" } }]
        }));
        assert!(config.pools.iter().all(|p| p.path_prefixes.is_empty()));
    }

    #[test]
    fn huge_slot_count_builds_without_allocating() {
        let config = CacheConfig::from_json_str(
            r#"{ "pools": [{ "slots": 10000000000000000, "match": { "path_prefixes": ["/"] } }] }"#,
        )
        .unwrap();
        let pools = crate::cache::PoolSet::from_config(&config);
        let pool = pools.get(0).unwrap();
        assert_eq!(pool.capacity() as u64, 10_000_000_000_000_000);
        assert_eq!(pool.cached_len(), 0);

        let key = crate::cache::CacheKey::new("h", "/x");
        pool.store(
            key.clone(),
            crate::cache::CachedResponse::new(StatusCode::Ok, Default::default(), "x", None),
        );
        assert!(pool.lookup(&key).is_some());
    }

    #[test]
    fn follower_timeout_values() {
        let zero = CacheConfig::from_value(&json!({ "follower_timeout_ms": 0 }));
        assert_eq!(zero.follower_timeout, None);

        let set = CacheConfig::from_value(&json!({ "follower_timeout_ms": 250 }));
        assert_eq!(set.follower_timeout, Some(Duration::from_millis(250)));

        let bad = CacheConfig::from_value(&json!({ "follower_timeout_ms": "soon" }));
        assert_eq!(bad.follower_timeout, Some(DEFAULT_FOLLOWER_TIMEOUT));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            CacheConfig::from_json_str("{ pools: "),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CacheConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
