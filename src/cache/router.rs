//! Prefix-based pool selection.
//!
//! A [`PoolSet`] is built once from configuration and shared by every request
//! on a worker. Its shape never changes during traffic; only the ring buffers
//! and in-flight tables inside each [`Pool`] do.
//!
//! Routing returns the first pool, in configuration order, with a prefix
//! matching the request path. Overlapping prefixes therefore always resolve
//! to the earlier pool.

use tracing::info;

use super::config::CacheConfig;
use super::pool::Pool;

/// The ordered, fixed collection of pools.
///
/// ```
/// use ringcache::cache::{Pool, PoolSet};
///
/// let pools = PoolSet::new(vec![
///     Pool::new("api", vec!["/api/".into()], 128),
///     Pool::new("catch-all", vec!["/".into()], 16),
/// ]);
/// assert_eq!(pools.pick_pool("/api/users").map(|p| p.name()), Some("api"));
/// assert_eq!(pools.pick_pool("/index.html").map(|p| p.name()), Some("catch-all"));
/// ```
#[derive(Debug, Default)]
pub struct PoolSet {
    pools: Vec<Pool>,
}

impl PoolSet {
    pub fn new(pools: Vec<Pool>) -> Self {
        Self { pools }
    }

    /// Builds one pool per configured descriptor, preserving order.
    pub fn from_config(config: &CacheConfig) -> Self {
        let pools: Vec<Pool> = config.pools.iter().map(Pool::from_config).collect();
        info!(
            pools = pools.len(),
            names = ?pools.iter().map(Pool::name).collect::<Vec<_>>(),
            "cache pool set built"
        );
        Self::new(pools)
    }

    /// Returns the first pool whose prefixes match `path`.
    pub fn pick_pool(&self, path: &str) -> Option<&Pool> {
        self.pools.iter().find(|pool| pool.matches(path))
    }

    pub(crate) fn pick_index(&self, path: &str) -> Option<usize> {
        self.pools.iter().position(|pool| pool.matches(path))
    }

    pub fn get(&self, index: usize) -> Option<&Pool> {
        self.pools.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
