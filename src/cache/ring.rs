//! Fixed-capacity circular store with FIFO eviction.

use std::rc::Rc;

use super::entry::{CacheKey, CachedResponse, Entry};

/// A circular array of `capacity` slots.
///
/// Inserting past capacity overwrites the oldest entry (FIFO, not LRU).
/// Lookups scan occupied slots newest-to-oldest; pools are small enough that
/// a linear scan beats maintaining a secondary index.
///
/// ```
/// use ringcache::cache::{CacheKey, CachedResponse, RingBuffer};
/// use ringcache::http::{Headers, StatusCode};
///
/// let mut ring = RingBuffer::new(2);
/// for path in ["/a", "/b", "/c"] {
///     let value = CachedResponse::new(StatusCode::Ok, Headers::new(), path, None);
///     ring.put(CacheKey::new("h", path), value);
/// }
/// assert!(ring.find(&CacheKey::new("h", "/a")).is_none());
/// assert!(ring.find(&CacheKey::new("h", "/c")).is_some());
/// ```
#[derive(Debug)]
pub struct RingBuffer {
    // grows up to `capacity`, then is overwritten in place at `write`
    slots: Vec<Entry>,
    capacity: usize,
    write: usize,
}

impl RingBuffer {
    /// Creates an empty ring. Slots are allocated as entries arrive, so a
    /// large `capacity` costs nothing until it is filled.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            write: 0,
        }
    }

    /// Writes `value` at the cursor and advances it. No-op at capacity 0.
    pub fn put(&mut self, key: CacheKey, value: CachedResponse) {
        if self.capacity == 0 {
            return;
        }

        let entry = Entry {
            key,
            value: Rc::new(value),
        };
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
        } else {
            self.slots[self.write] = entry;
        }
        self.write = (self.write + 1) % self.capacity;
    }

    /// Returns the newest value stored under `key`.
    pub fn find(&self, key: &CacheKey) -> Option<&Rc<CachedResponse>> {
        let len = self.slots.len();
        (0..len)
            .map(|i| &self.slots[(self.write + len - 1 - i) % len])
            .find(|entry| &entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
