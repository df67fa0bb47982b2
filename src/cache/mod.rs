//! Pool-partitioned response cache with in-flight request coalescing.
//!
//! Requests are routed to a named [`Pool`] by path prefix. Each pool keeps a
//! fixed-size [`RingBuffer`] of complete responses plus a table of fetches
//! currently in flight. The first miss for a key becomes the *leader* and goes
//! upstream; concurrent misses for the same key become *followers* and are
//! answered from the leader's response once it completes.
//!
//! - [`RingCacheFilter`] is the per-request state machine.
//! - [`CacheLayer`] drives a filter around an async upstream call.
//! - [`CacheConfig`] decodes pool descriptors from JSON.
//!
//! ```
//! use ringcache::cache::{CacheKey, CachedResponse, Pool};
//! use ringcache::http::{Headers, StatusCode};
//!
//! let pool = Pool::new("api", vec!["/api/".into()], 2);
//! let key = CacheKey::new("example.com", "/api/users");
//! pool.store(key.clone(), CachedResponse::new(StatusCode::Ok, Headers::new(), "[]", None));
//! assert_eq!(pool.lookup(&key).unwrap().body().as_ref(), b"[]");
//! ```

pub mod config;
pub mod entry;
pub mod filter;
pub mod layer;
pub mod pool;
pub mod ring;
pub mod router;

pub use config::{CacheConfig, ConfigError, PoolConfig};
pub use entry::{CACHE_STATUS_HEADER, CacheKey, CacheStatus, CachedResponse, Entry};
pub use filter::{
    EncodeVerdict, FilterState, RequestVerdict, RingCacheFilter, Wakeup, parse_status,
};
pub use layer::CacheLayer;
pub use pool::{Claim, InFlight, Pool, Resolution, WaiterId};
pub use ring::RingBuffer;
pub use router::PoolSet;
