//! Async driver that runs one request through a [`RingCacheFilter`].
//!
//! [`CacheLayer::handle`] sits between the server and an upstream call. It
//! replays cached responses, parks followers (bounded by the configured
//! timeout), and feeds the leader's upstream response through the filter so
//! it is stored and fanned out.
//!
//! The layer holds an `Rc` and its futures are not `Send`; run it on a
//! single-threaded runtime or inside a [`tokio::task::LocalSet`].

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tracing::warn;

use super::config::{CacheConfig, DEFAULT_FOLLOWER_TIMEOUT};
use super::filter::{RequestVerdict, RingCacheFilter, Wakeup};
use super::router::PoolSet;
use crate::http::{Request, Response};

/// Per-worker entry point to the cache.
///
/// # Examples
///
/// ```rust,no_run
/// use std::rc::Rc;
/// use ringcache::cache::{CacheLayer, Pool, PoolSet};
/// use ringcache::http::{Request, Response, StatusCode};
///
/// # async fn example(request: Request) {
/// let layer = CacheLayer::new(Rc::new(PoolSet::new(vec![
///     Pool::new("api", vec!["/api/".into()], 256),
/// ])));
///
/// let response = layer
///     .handle(request, |_req| async { Response::new(StatusCode::Ok).body("fresh") })
///     .await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CacheLayer {
    pools: Rc<PoolSet>,
    follower_timeout: Option<Duration>,
}

impl CacheLayer {
    pub fn new(pools: Rc<PoolSet>) -> Self {
        Self {
            pools,
            follower_timeout: Some(DEFAULT_FOLLOWER_TIMEOUT),
        }
    }

    /// Builds the pool set and timeout from a validated configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            pools: Rc::new(PoolSet::from_config(config)),
            follower_timeout: config.follower_timeout,
        }
    }

    /// Bounds how long followers wait for their leader. `None` waits forever.
    #[must_use]
    pub fn with_follower_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.follower_timeout = timeout;
        self
    }

    pub fn pools(&self) -> &Rc<PoolSet> {
        &self.pools
    }

    /// Serves `request` from cache, from a coalesced fetch, or by calling
    /// `upstream`.
    ///
    /// Dropping the returned future mid-flight behaves like a client
    /// disconnect: a parked follower leaves its waiter list and an
    /// unfinished leader hands the fetch to the next follower.
    pub async fn handle<U, Fut>(&self, request: Request, upstream: U) -> Response
    where
        U: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let mut filter = RingCacheFilter::new(Rc::clone(&self.pools));

        match filter.decode_headers(&request, request.is_header_only()) {
            RequestVerdict::Respond(reply) => return reply,
            RequestVerdict::Continue => {}
            RequestVerdict::Park => {
                let wakeup = match self.follower_timeout {
                    Some(limit) => match tokio::time::timeout(limit, filter.wait()).await {
                        Ok(wakeup) => wakeup,
                        Err(_) => {
                            warn!(
                                path = %request.path(),
                                timeout = ?limit,
                                "follower timed out waiting for leader"
                            );
                            filter.detach()
                        }
                    },
                    None => filter.wait().await,
                };
                if let Wakeup::Reply(reply) = wakeup {
                    return reply;
                }
            }
        }

        if !request.body().is_empty() {
            filter.decode_data(request.body(), true);
        }

        let response = upstream(request).await;
        encode(&mut filter, response)
    }
}

// Feeds a complete upstream response through the filter's encoder callbacks.
fn encode(filter: &mut RingCacheFilter, mut response: Response) -> Response {
    let status = response.status().as_u16().to_string();
    let has_trailers = response.trailers().is_some();
    let header_only = response.content().is_empty() && !has_trailers;

    filter.encode_headers(&status, response.headers_mut(), header_only);
    if !header_only {
        let body = response.content().clone();
        filter.encode_data(&body, !has_trailers);
    }
    if let Some(trailers) = response.trailers() {
        filter.encode_trailers(trailers);
    }

    response
}
