//! Named cache shards and their in-flight tables.
//!
//! A [`Pool`] owns one [`RingBuffer`] and one map from [`CacheKey`] to the
//! followers parked behind that key's leader. Both live in `RefCell`s: the
//! pool set is shared through `Rc` and only ever driven from one worker, so
//! the type system rules out concurrent access instead of a lock.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry as Slot;
use std::rc::Rc;

use tokio::sync::oneshot;

use super::config::PoolConfig;
use super::entry::{CacheKey, CachedResponse};
use super::ring::RingBuffer;
use crate::http::Response;

/// Identifies one parked follower inside a pool.
pub type WaiterId = u64;

/// What a parked follower is woken with.
#[derive(Debug)]
pub enum Resolution {
    /// The leader committed; this is the reply to send.
    Completed(Response),
    /// The leader went away; the follower takes over the upstream fetch.
    Promoted,
}

/// Result of arbitrating a cache miss.
#[derive(Debug)]
pub enum Claim {
    /// No fetch was in flight; the caller now owns it.
    Leader,
    /// A fetch is already in flight; wait on `reply`.
    Follower {
        waiter: WaiterId,
        reply: oneshot::Receiver<Resolution>,
    },
}

#[derive(Debug)]
struct Waiter {
    id: WaiterId,
    reply: oneshot::Sender<Resolution>,
}

/// Followers parked behind one key's leader, in arrival order.
#[derive(Debug, Default)]
pub struct InFlight {
    waiters: Vec<Waiter>,
}

impl InFlight {
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// A named cache shard serving a set of path prefixes.
#[derive(Debug)]
pub struct Pool {
    name: String,
    prefixes: Vec<String>,
    ring: RefCell<RingBuffer>,
    in_flight: RefCell<BTreeMap<CacheKey, InFlight>>,
    next_waiter: Cell<WaiterId>,
}

impl Pool {
    pub fn new(name: impl Into<String>, prefixes: Vec<String>, slots: usize) -> Self {
        Self {
            name: name.into(),
            prefixes,
            ring: RefCell::new(RingBuffer::new(slots)),
            in_flight: RefCell::new(BTreeMap::new()),
            next_waiter: Cell::new(0),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.path_prefixes.clone(),
            config.slots,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn capacity(&self) -> usize {
        self.ring.borrow().capacity()
    }

    /// Returns `true` if any configured prefix is a literal prefix of `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Rc<CachedResponse>> {
        self.ring.borrow().find(key).cloned()
    }

    pub fn store(&self, key: CacheKey, value: CachedResponse) {
        self.ring.borrow_mut().put(key, value);
    }

    /// Number of occupied ring slots.
    pub fn cached_len(&self) -> usize {
        self.ring.borrow().len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.borrow().contains_key(key)
    }

    /// Number of followers parked behind `key`'s leader.
    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.in_flight.borrow().get(key).map_or(0, InFlight::len)
    }

    /// Becomes leader for `key`, or joins the existing fetch as a follower.
    pub fn claim(&self, key: &CacheKey) -> Claim {
        match self.in_flight.borrow_mut().entry(key.clone()) {
            Slot::Vacant(slot) => {
                slot.insert(InFlight::default());
                Claim::Leader
            }
            Slot::Occupied(mut slot) => {
                let id = self.next_waiter.get();
                self.next_waiter.set(id.wrapping_add(1));

                let (tx, rx) = oneshot::channel();
                slot.get_mut().waiters.push(Waiter { id, reply: tx });
                Claim::Follower {
                    waiter: id,
                    reply: rx,
                }
            }
        }
    }

    /// Removes `key`'s in-flight record and hands `reply` to every parked
    /// follower. Returns how many followers were still listening.
    pub fn resolve(&self, key: &CacheKey, reply: &Response) -> usize {
        let Some(flight) = self.in_flight.borrow_mut().remove(key) else {
            return 0;
        };

        flight
            .waiters
            .into_iter()
            .filter_map(|waiter| {
                waiter
                    .reply
                    .send(Resolution::Completed(reply.clone()))
                    .ok()
            })
            .count()
    }

    /// Removes one follower from `key`'s waiter list. Returns `false` if it
    /// was not parked there.
    pub fn cancel_waiter(&self, key: &CacheKey, waiter: WaiterId) -> bool {
        let mut table = self.in_flight.borrow_mut();
        let Some(flight) = table.get_mut(key) else {
            return false;
        };
        let before = flight.waiters.len();
        flight.waiters.retain(|w| w.id != waiter);
        flight.waiters.len() < before
    }

    /// Hands leadership of `key` to the oldest follower still listening.
    ///
    /// Followers whose receiver is gone are dropped on the way. When nobody
    /// is left the in-flight record is removed. Returns the promoted waiter.
    pub fn abandon(&self, key: &CacheKey) -> Option<WaiterId> {
        let mut table = self.in_flight.borrow_mut();
        let flight = table.get_mut(key)?;

        while !flight.waiters.is_empty() {
            let waiter = flight.waiters.remove(0);
            if waiter.reply.send(Resolution::Promoted).is_ok() {
                return Some(waiter.id);
            }
        }

        table.remove(key);
        None
    }
}
