//! Per-request coalescing filter.
//!
//! [`RingCacheFilter`] is driven by the host pipeline through a fixed
//! sequence of callbacks: request headers, optional request body and
//! trailers, then response headers, body chunks and optional trailers. It
//! decides before anything is forwarded whether the request is served from a
//! pool, parked behind an in-flight fetch, or sent upstream, and it captures
//! the leader's upstream response for storage and fan-out.
//!
//! ```text
//! Init ─┬─ NoPool                      (not GET, has a body, or no pool)
//!       ├─ Hit                         (served from the ring buffer)
//!       ├─ Leader ──┬─ Committed       (stored and fanned out)
//!       │           └─ Abandoned       (dropped early; oldest follower promoted)
//!       └─ Follower ┬─ FannedOut       (received the leader's reply)
//!                   ├─ Leader          (promoted)
//!                   ├─ Detached        (wait timed out; fetches uncached)
//!                   └─ Aborted         (dropped while parked)
//! ```
//!
//! Dropping the filter runs [`RingCacheFilter::on_destroy`], so a follower
//! that goes away is always removed from its pool's waiter list.

use std::rc::Rc;

use bytes::BytesMut;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::entry::{CACHE_STATUS_HEADER, CacheKey, CacheStatus, CachedResponse};
use super::pool::{Claim, Pool, Resolution, WaiterId};
use super::router::PoolSet;
use crate::http::{Headers, Method, Request, Response, StatusCode};

/// Observable position of a filter in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Init,
    NoPool,
    Hit,
    Leader,
    Follower,
    Committed,
    FannedOut,
    Detached,
    Aborted,
    Abandoned,
}

/// Outcome of [`RingCacheFilter::decode_headers`].
#[derive(Debug)]
pub enum RequestVerdict {
    /// Forward the request upstream.
    Continue,
    /// Short-circuit with this reply; never forward.
    Respond(Response),
    /// Do not forward; await [`RingCacheFilter::wait`].
    Park,
}

/// Outcome of each response fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeVerdict {
    /// Pass the fragment on.
    Forward,
    /// Pass the fragment on; it completed an entry that is now stored.
    Stored,
}

/// How a parked follower resumes.
#[derive(Debug)]
pub enum Wakeup {
    /// Send this reply; the request is done.
    Reply(Response),
    /// This request now leads the fetch and must be forwarded upstream.
    Promoted,
    /// No reply will come; forward upstream without caching.
    Detached,
}

#[derive(Debug)]
struct Capture {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
}

#[derive(Debug)]
enum Stage {
    Init,
    NoPool,
    Hit,
    Leader { capture: Option<Capture> },
    Follower {
        waiter: WaiterId,
        reply: oneshot::Receiver<Resolution>,
    },
    Committed,
    FannedOut,
    Detached,
    Aborted,
    Abandoned,
}

/// The cache and coalescing logic for one request.
#[derive(Debug)]
pub struct RingCacheFilter {
    pools: Rc<PoolSet>,
    pool: Option<usize>,
    key: Option<CacheKey>,
    stage: Stage,
}

impl RingCacheFilter {
    pub fn new(pools: Rc<PoolSet>) -> Self {
        Self {
            pools,
            pool: None,
            key: None,
            stage: Stage::Init,
        }
    }

    pub fn state(&self) -> FilterState {
        match self.stage {
            Stage::Init => FilterState::Init,
            Stage::NoPool => FilterState::NoPool,
            Stage::Hit => FilterState::Hit,
            Stage::Leader { .. } => FilterState::Leader,
            Stage::Follower { .. } => FilterState::Follower,
            Stage::Committed => FilterState::Committed,
            Stage::FannedOut => FilterState::FannedOut,
            Stage::Detached => FilterState::Detached,
            Stage::Aborted => FilterState::Aborted,
            Stage::Abandoned => FilterState::Abandoned,
        }
    }

    /// The key this request was mapped to, once a pool was selected.
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// The pool this request was routed to.
    pub fn pool(&self) -> Option<&Pool> {
        self.pool.and_then(|index| self.pools.get(index))
    }

    /// Request headers arrived. `end_stream` is `true` when the request has
    /// no body at all.
    pub fn decode_headers(&mut self, request: &Request, end_stream: bool) -> RequestVerdict {
        debug!(
            method = %request.method(),
            path = %request.path(),
            query = request.query_string().unwrap_or_default(),
            end_stream,
            "decode headers"
        );

        if !matches!(self.stage, Stage::Init) {
            return RequestVerdict::Continue;
        }

        // streamed bodies and non-GET requests are never cached
        if !end_stream || *request.method() != Method::Get {
            self.stage = Stage::NoPool;
            return RequestVerdict::Continue;
        }

        let Some(index) = self.pools.pick_index(request.path()) else {
            self.stage = Stage::NoPool;
            return RequestVerdict::Continue;
        };
        let Some(pool) = self.pools.get(index) else {
            self.stage = Stage::NoPool;
            return RequestVerdict::Continue;
        };

        let key = CacheKey::from_request(request);
        self.pool = Some(index);

        if let Some(cached) = pool.lookup(&key) {
            debug!(pool = pool.name(), key = %key, "cache hit");
            self.key = Some(key);
            self.stage = Stage::Hit;
            return RequestVerdict::Respond(cached.to_reply(CacheStatus::Hit));
        }

        let verdict = match pool.claim(&key) {
            Claim::Leader => {
                debug!(pool = pool.name(), key = %key, "cache miss; leading fetch");
                self.stage = Stage::Leader { capture: None };
                RequestVerdict::Continue
            }
            Claim::Follower { waiter, reply } => {
                debug!(pool = pool.name(), key = %key, waiter, "cache miss; parked behind leader");
                self.stage = Stage::Follower { waiter, reply };
                RequestVerdict::Park
            }
        };
        self.key = Some(key);
        verdict
    }

    /// Request body chunks never affect caching; eligible requests have none.
    pub fn decode_data(&mut self, _chunk: &[u8], _end_stream: bool) -> RequestVerdict {
        RequestVerdict::Continue
    }

    pub fn decode_trailers(&mut self, _trailers: &Headers) -> RequestVerdict {
        RequestVerdict::Continue
    }

    /// Suspends a parked follower until its leader resolves.
    ///
    /// Cancel-safe: dropping the returned future leaves the follower parked,
    /// and [`detach`](Self::detach) or dropping the filter cleans up.
    pub async fn wait(&mut self) -> Wakeup {
        let Stage::Follower { reply, .. } = &mut self.stage else {
            return Wakeup::Detached;
        };

        match reply.await {
            Ok(resolution) => self.resume(resolution),
            Err(_) => {
                // the sender vanished without resolving
                self.detach_waiter();
                Wakeup::Detached
            }
        }
    }

    /// Gives up waiting. A resolution that already arrived is still honored.
    pub fn detach(&mut self) -> Wakeup {
        let Stage::Follower { reply, .. } = &mut self.stage else {
            return Wakeup::Detached;
        };

        match reply.try_recv() {
            Ok(resolution) => self.resume(resolution),
            Err(_) => {
                self.detach_waiter();
                Wakeup::Detached
            }
        }
    }

    fn resume(&mut self, resolution: Resolution) -> Wakeup {
        match resolution {
            Resolution::Completed(reply) => {
                self.stage = Stage::FannedOut;
                Wakeup::Reply(reply)
            }
            Resolution::Promoted => {
                debug!(key = ?self.key, "follower promoted to leader");
                self.stage = Stage::Leader { capture: None };
                Wakeup::Promoted
            }
        }
    }

    fn detach_waiter(&mut self) {
        if let (Stage::Follower { waiter, .. }, Some(pool), Some(key)) =
            (&self.stage, self.pool.and_then(|i| self.pools.get(i)), &self.key)
        {
            pool.cancel_waiter(key, *waiter);
            warn!(pool = pool.name(), key = %key, waiter, "follower detached from leader");
        }
        self.stage = Stage::Detached;
    }

    /// Upstream response headers arrived. `status` is the raw status code
    /// text; anything unparsable is treated as 200.
    pub fn encode_headers(
        &mut self,
        status: &str,
        headers: &mut Headers,
        end_stream: bool,
    ) -> EncodeVerdict {
        debug!(status, end_stream, "encode headers");

        if matches!(self.stage, Stage::Leader { capture: None }) {
            let captured = Capture {
                status: parse_status(status),
                headers: headers.clone(),
                body: BytesMut::new(),
            };
            headers.set(CACHE_STATUS_HEADER, CacheStatus::Miss.as_str());

            if end_stream {
                self.commit(captured, None);
                return EncodeVerdict::Stored;
            }
            self.stage = Stage::Leader {
                capture: Some(captured),
            };
        } else if matches!(self.stage, Stage::Detached) {
            headers.set(CACHE_STATUS_HEADER, CacheStatus::Miss.as_str());
        }
        EncodeVerdict::Forward
    }

    /// A response body chunk arrived.
    pub fn encode_data(&mut self, chunk: &[u8], end_stream: bool) -> EncodeVerdict {
        let Stage::Leader {
            capture: Some(capture),
        } = &mut self.stage
        else {
            return EncodeVerdict::Forward;
        };

        capture.body.extend_from_slice(chunk);
        if !end_stream {
            return EncodeVerdict::Forward;
        }

        if let Stage::Leader {
            capture: Some(captured),
        } = std::mem::replace(&mut self.stage, Stage::Committed)
        {
            self.commit(captured, None);
        }
        EncodeVerdict::Stored
    }

    /// Response trailers arrived; they always end the response.
    pub fn encode_trailers(&mut self, trailers: &Headers) -> EncodeVerdict {
        if !matches!(self.stage, Stage::Leader { capture: Some(_) }) {
            return EncodeVerdict::Forward;
        }

        if let Stage::Leader {
            capture: Some(captured),
        } = std::mem::replace(&mut self.stage, Stage::Committed)
        {
            self.commit(captured, Some(trailers.clone()));
        }
        EncodeVerdict::Stored
    }

    fn commit(&mut self, captured: Capture, trailers: Option<Headers>) {
        self.stage = Stage::Committed;

        let (Some(pool), Some(key)) = (self.pool.and_then(|i| self.pools.get(i)), &self.key)
        else {
            return;
        };

        let cached = CachedResponse::new(
            captured.status,
            captured.headers,
            captured.body.freeze(),
            trailers,
        );
        let reply = cached.to_reply(CacheStatus::CoalescedHit);
        pool.store(key.clone(), cached);
        let delivered = pool.resolve(key, &reply);

        debug!(
            pool = pool.name(),
            key = %key,
            status = %reply.status(),
            followers = delivered,
            "committed response"
        );
    }

    /// The request is going away. Followers leave their pool's waiter list;
    /// an unresolved leader hands the fetch to its oldest follower.
    pub fn on_destroy(&mut self) {
        let stage = std::mem::replace(&mut self.stage, Stage::Aborted);
        let (Some(pool), Some(key)) = (self.pool.and_then(|i| self.pools.get(i)), &self.key)
        else {
            self.stage = settle(stage);
            return;
        };

        match stage {
            Stage::Follower { waiter, mut reply } => {
                reply.close();
                match reply.try_recv() {
                    // leadership was handed over but never taken up
                    Ok(Resolution::Promoted) => {
                        warn!(pool = pool.name(), key = %key, "promoted follower dropped");
                        pool.abandon(key);
                    }
                    Ok(Resolution::Completed(_)) => {}
                    Err(_) => {
                        pool.cancel_waiter(key, waiter);
                    }
                }
                debug!(pool = pool.name(), key = %key, waiter, "follower aborted");
            }
            Stage::Leader { .. } => {
                let promoted = pool.abandon(key);
                warn!(
                    pool = pool.name(),
                    key = %key,
                    promoted = ?promoted,
                    "leader dropped before completing"
                );
                self.stage = Stage::Abandoned;
            }
            other => self.stage = settle(other),
        }
    }
}

impl Drop for RingCacheFilter {
    fn drop(&mut self) {
        self.on_destroy();
    }
}

// Stages with no pool-side state survive destruction unchanged.
fn settle(stage: Stage) -> Stage {
    match stage {
        Stage::Follower { .. } => Stage::Aborted,
        Stage::Leader { .. } => Stage::Abandoned,
        other => other,
    }
}

/// Parses an upstream status code. Anything that is not an integer in
/// `100..=999` becomes 200; every other code is kept as-is.
pub fn parse_status(raw: &str) -> StatusCode {
    raw.trim()
        .parse::<u16>()
        .ok()
        .and_then(StatusCode::from_u16)
        .unwrap_or(StatusCode::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools(slots: usize) -> Rc<PoolSet> {
        Rc::new(PoolSet::new(vec![Pool::new(
            "api",
            vec!["/api/".to_string()],
            slots,
        )]))
    }

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: example.com\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new("example.com", path)
    }

    fn marker(headers: &Headers) -> Option<&str> {
        headers.get(CACHE_STATUS_HEADER)
    }

    /// Drives a leader through a complete upstream response.
    fn lead(set: &Rc<PoolSet>, path: &str, status: &str, chunks: &[&str]) -> Headers {
        let mut filter = RingCacheFilter::new(Rc::clone(set));
        assert!(matches!(
            filter.decode_headers(&get(path), true),
            RequestVerdict::Continue
        ));
        assert_eq!(filter.state(), FilterState::Leader);

        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        filter.encode_headers(status, &mut headers, chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            filter.encode_data(chunk.as_bytes(), i + 1 == chunks.len());
        }
        assert_eq!(filter.state(), FilterState::Committed);
        headers
    }

    #[test]
    fn parse_status_falls_back_to_ok() {
        assert_eq!(parse_status("404"), StatusCode::NotFound);
        assert_eq!(parse_status(" 503 "), StatusCode::ServiceUnavailable);
        assert_eq!(parse_status("abc"), StatusCode::Ok);
        assert_eq!(parse_status(""), StatusCode::Ok);
        assert_eq!(parse_status("42"), StatusCode::Ok);
        assert_eq!(parse_status("1000"), StatusCode::Ok);
        assert_eq!(parse_status("299").as_u16(), 299);
    }

    #[test]
    fn unnamed_status_reaches_cache_and_followers_intact() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/teapot"), true);
        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        assert!(matches!(
            follower.decode_headers(&get("/api/teapot"), true),
            RequestVerdict::Park
        ));

        let mut headers = Headers::new();
        leader.encode_headers("418", &mut headers, false);
        assert_eq!(leader.encode_data(b"teapot", true), EncodeVerdict::Stored);

        let cached = set.get(0).unwrap().lookup(&key("/api/teapot")).unwrap();
        assert_eq!(cached.status().as_u16(), 418);

        let Wakeup::Reply(reply) = follower.detach() else {
            panic!("follower gets the leader's reply");
        };
        assert_eq!(reply.status().as_u16(), 418);
        assert_eq!(reply.content().as_ref(), b"teapot");
        assert_eq!(marker(reply.headers()), Some("coalesced_hit"));
    }

    #[test]
    fn post_bypasses_cache() {
        let set = pools(4);
        let raw = b"POST /api/x HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let request = Request::parse(raw).unwrap().0;

        let mut filter = RingCacheFilter::new(Rc::clone(&set));
        assert!(matches!(
            filter.decode_headers(&request, true),
            RequestVerdict::Continue
        ));
        assert_eq!(filter.state(), FilterState::NoPool);
        assert!(!set.get(0).unwrap().is_in_flight(&key("/api/x")));

        let mut headers = Headers::new();
        assert_eq!(
            filter.encode_headers("200", &mut headers, true),
            EncodeVerdict::Forward
        );
        assert_eq!(marker(&headers), None);
        assert_eq!(set.get(0).unwrap().cached_len(), 0);
    }

    #[test]
    fn streamed_request_bypasses_cache() {
        let set = pools(4);
        lead(&set, "/api/x", "200", &["cached"]);

        let mut filter = RingCacheFilter::new(Rc::clone(&set));
        assert!(matches!(
            filter.decode_headers(&get("/api/x"), false),
            RequestVerdict::Continue
        ));
        assert_eq!(filter.state(), FilterState::NoPool);
        assert!(matches!(
            filter.decode_data(b"payload", true),
            RequestVerdict::Continue
        ));
    }

    #[test]
    fn unmatched_path_passes_through_unmarked() {
        let set = pools(4);
        let mut filter = RingCacheFilter::new(Rc::clone(&set));
        assert!(matches!(
            filter.decode_headers(&get("/other"), true),
            RequestVerdict::Continue
        ));
        assert_eq!(filter.state(), FilterState::NoPool);
        assert!(filter.pool().is_none());

        let mut headers = Headers::new();
        filter.encode_headers("200", &mut headers, false);
        filter.encode_data(b"x", true);
        assert_eq!(marker(&headers), None);
    }

    #[test]
    fn miss_then_hit() {
        let set = pools(4);
        let headers = lead(&set, "/api/thing", "200", &["hel", "lo"]);
        assert_eq!(marker(&headers), Some("cache_miss"));

        let mut filter = RingCacheFilter::new(Rc::clone(&set));
        let RequestVerdict::Respond(reply) = filter.decode_headers(&get("/api/thing"), true)
        else {
            panic!("expected a cache hit");
        };
        assert_eq!(filter.state(), FilterState::Hit);
        assert_eq!(reply.status(), StatusCode::Ok);
        assert_eq!(reply.content().as_ref(), b"hello");
        assert_eq!(marker(reply.headers()), Some("cache_hit"));
    }

    #[test]
    fn stored_headers_exclude_marker() {
        let set = pools(4);
        lead(&set, "/api/thing", "201", &["body"]);
        let cached = set.get(0).unwrap().lookup(&key("/api/thing")).unwrap();
        assert_eq!(cached.status(), StatusCode::Created);
        assert_eq!(cached.headers().get("content-type"), Some("text/plain"));
        assert!(!cached.headers().contains(CACHE_STATUS_HEADER));
    }

    #[test]
    fn header_only_response_commits_on_headers() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/empty"), true);

        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        assert!(matches!(
            follower.decode_headers(&get("/api/empty"), true),
            RequestVerdict::Park
        ));

        let mut headers = Headers::new();
        assert_eq!(
            leader.encode_headers("204", &mut headers, true),
            EncodeVerdict::Stored
        );
        assert_eq!(marker(&headers), Some("cache_miss"));
        assert_eq!(leader.state(), FilterState::Committed);

        let pool = set.get(0).unwrap();
        assert!(!pool.is_in_flight(&key("/api/empty")));
        assert_eq!(pool.lookup(&key("/api/empty")).unwrap().status(), StatusCode::NoContent);

        let Wakeup::Reply(reply) = follower.detach() else {
            panic!("follower should already hold the reply");
        };
        assert_eq!(follower.state(), FilterState::FannedOut);
        assert_eq!(reply.status(), StatusCode::NoContent);
        assert!(reply.content().is_empty());
        assert_eq!(marker(reply.headers()), Some("coalesced_hit"));
    }

    #[test]
    fn single_leader_per_key() {
        let set = pools(4);
        let mut filters: Vec<_> = (0..5)
            .map(|_| {
                let mut f = RingCacheFilter::new(Rc::clone(&set));
                f.decode_headers(&get("/api/x"), true);
                f
            })
            .collect();

        let leaders = filters
            .iter()
            .filter(|f| f.state() == FilterState::Leader)
            .count();
        assert_eq!(leaders, 1);
        assert_eq!(filters[0].state(), FilterState::Leader);
        assert_eq!(set.get(0).unwrap().waiter_count(&key("/api/x")), 4);

        // a different key gets its own leader
        let mut other = RingCacheFilter::new(Rc::clone(&set));
        other.decode_headers(&get("/api/y"), true);
        assert_eq!(other.state(), FilterState::Leader);

        filters.clear();
    }

    #[test]
    fn fan_out_reaches_every_follower() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);

        let mut followers: Vec<_> = (0..3)
            .map(|_| {
                let mut f = RingCacheFilter::new(Rc::clone(&set));
                assert!(matches!(
                    f.decode_headers(&get("/api/x"), true),
                    RequestVerdict::Park
                ));
                f
            })
            .collect();

        let mut headers = Headers::new();
        leader.encode_headers("200", &mut headers, false);
        assert_eq!(leader.encode_data(b"o", false), EncodeVerdict::Forward);
        assert_eq!(leader.encode_data(b"k", true), EncodeVerdict::Stored);

        for follower in &mut followers {
            let Wakeup::Reply(reply) = follower.detach() else {
                panic!("every follower gets the reply");
            };
            assert_eq!(reply.status(), StatusCode::Ok);
            assert_eq!(reply.content().as_ref(), b"ok");
            assert_eq!(marker(reply.headers()), Some("coalesced_hit"));
        }
    }

    #[test]
    fn trailers_commit_and_fan_out() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/t"), true);
        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        follower.decode_headers(&get("/api/t"), true);

        let mut headers = Headers::new();
        leader.encode_headers("200", &mut headers, false);
        leader.encode_data(b"body", false);
        let mut trailers = Headers::new();
        trailers.insert("X-Checksum", "42");
        assert_eq!(leader.encode_trailers(&trailers), EncodeVerdict::Stored);
        assert_eq!(leader.state(), FilterState::Committed);

        let pool = set.get(0).unwrap();
        let cached = pool.lookup(&key("/api/t")).unwrap();
        assert_eq!(cached.body().as_ref(), b"body");
        assert_eq!(cached.trailers().and_then(|t| t.get("x-checksum")), Some("42"));
        assert!(!pool.is_in_flight(&key("/api/t")));

        let Wakeup::Reply(reply) = follower.detach() else {
            panic!("trailer commit must fan out");
        };
        assert_eq!(reply.content().as_ref(), b"body");
    }

    #[test]
    fn destroyed_follower_is_deregistered_and_never_served() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);

        let mut staying = RingCacheFilter::new(Rc::clone(&set));
        staying.decode_headers(&get("/api/x"), true);
        let mut leaving = RingCacheFilter::new(Rc::clone(&set));
        leaving.decode_headers(&get("/api/x"), true);

        let pool = set.get(0).unwrap();
        assert_eq!(pool.waiter_count(&key("/api/x")), 2);

        leaving.on_destroy();
        assert_eq!(leaving.state(), FilterState::Aborted);
        assert_eq!(pool.waiter_count(&key("/api/x")), 1);
        drop(leaving);
        assert_eq!(pool.waiter_count(&key("/api/x")), 1);

        let mut headers = Headers::new();
        leader.encode_headers("200", &mut headers, false);
        leader.encode_data(b"ok", true);

        assert!(matches!(staying.detach(), Wakeup::Reply(_)));
    }

    #[test]
    fn dropping_follower_runs_cleanup() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        {
            let mut follower = RingCacheFilter::new(Rc::clone(&set));
            follower.decode_headers(&get("/api/x"), true);
            assert_eq!(set.get(0).unwrap().waiter_count(&key("/api/x")), 1);
        }
        assert_eq!(set.get(0).unwrap().waiter_count(&key("/api/x")), 0);
        assert!(set.get(0).unwrap().is_in_flight(&key("/api/x")));
    }

    #[test]
    fn abandoned_leader_promotes_follower() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        let mut first = RingCacheFilter::new(Rc::clone(&set));
        first.decode_headers(&get("/api/x"), true);
        let mut second = RingCacheFilter::new(Rc::clone(&set));
        second.decode_headers(&get("/api/x"), true);

        drop(leader);

        assert!(matches!(first.detach(), Wakeup::Promoted));
        assert_eq!(first.state(), FilterState::Leader);
        assert_eq!(second.state(), FilterState::Follower);
        assert_eq!(set.get(0).unwrap().waiter_count(&key("/api/x")), 1);

        let mut headers = Headers::new();
        first.encode_headers("200", &mut headers, false);
        first.encode_data(b"late", true);
        assert_eq!(marker(&headers), Some("cache_miss"));

        let Wakeup::Reply(reply) = second.detach() else {
            panic!("remaining follower is served by the promoted leader");
        };
        assert_eq!(reply.content().as_ref(), b"late");
    }

    #[test]
    fn abandoned_leader_without_followers_clears_record() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        leader.on_destroy();
        assert_eq!(leader.state(), FilterState::Abandoned);
        assert!(!set.get(0).unwrap().is_in_flight(&key("/api/x")));

        let mut next = RingCacheFilter::new(Rc::clone(&set));
        next.decode_headers(&get("/api/x"), true);
        assert_eq!(next.state(), FilterState::Leader);
    }

    #[test]
    fn dropped_promoted_follower_passes_leadership_on() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        let mut first = RingCacheFilter::new(Rc::clone(&set));
        first.decode_headers(&get("/api/x"), true);
        let mut second = RingCacheFilter::new(Rc::clone(&set));
        second.decode_headers(&get("/api/x"), true);

        drop(leader);
        // promotion is pending in `first`'s channel; it goes away before noticing
        drop(first);

        assert!(matches!(second.detach(), Wakeup::Promoted));
    }

    #[test]
    fn detach_without_resolution_deregisters() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        follower.decode_headers(&get("/api/x"), true);

        assert!(matches!(follower.detach(), Wakeup::Detached));
        assert_eq!(follower.state(), FilterState::Detached);
        assert_eq!(set.get(0).unwrap().waiter_count(&key("/api/x")), 0);

        let mut headers = Headers::new();
        assert_eq!(
            follower.encode_headers("200", &mut headers, true),
            EncodeVerdict::Forward
        );
        assert_eq!(marker(&headers), Some("cache_miss"));
        assert_eq!(set.get(0).unwrap().cached_len(), 0);
    }

    #[test]
    fn zero_slot_pool_still_coalesces() {
        let set = pools(0);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        follower.decode_headers(&get("/api/x"), true);

        let mut headers = Headers::new();
        leader.encode_headers("200", &mut headers, false);
        leader.encode_data(b"ok", true);

        assert!(matches!(follower.detach(), Wakeup::Reply(_)));
        assert_eq!(set.get(0).unwrap().cached_len(), 0);
    }

    #[tokio::test]
    async fn wait_resumes_when_leader_commits() {
        let set = pools(4);
        let mut leader = RingCacheFilter::new(Rc::clone(&set));
        leader.decode_headers(&get("/api/x"), true);
        let mut follower = RingCacheFilter::new(Rc::clone(&set));
        follower.decode_headers(&get("/api/x"), true);

        let mut headers = Headers::new();
        leader.encode_headers("200", &mut headers, false);
        leader.encode_data(b"ok", true);

        let Wakeup::Reply(reply) = follower.wait().await else {
            panic!("expected reply");
        };
        assert_eq!(reply.content().as_ref(), b"ok");
    }
}
