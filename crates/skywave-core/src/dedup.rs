//! Bounded first-wins dedup cache over `(origin, seqno)`.
//!
//! The cache is the guard in front of forwarding, local delivery, and store
//! insertion: a key that has been seen is never processed again, whichever
//! link it arrives on. Capacity is bounded with oldest-first eviction so a
//! seqno flood cannot grow memory without bound, and entries expire after a
//! TTL comfortably above the mesh's propagation time.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use skywave_proto::NodeId;

/// Frame identity: origin plus per-origin sequence number.
pub type FrameKey = (NodeId, u32);

/// Bounded, TTL-expiring membership set.
///
/// Generic over the instant type so the harness can drive it with virtual
/// time.
#[derive(Debug)]
pub struct DedupCache<I> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<FrameKey, I>,
    /// Insertion order for oldest-first eviction. May contain keys already
    /// expired out of `entries`; those are skipped on eviction.
    order: VecDeque<FrameKey>,
}

impl<I> DedupCache<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Create a cache with the given capacity bound and entry TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Atomically test membership and insert on miss.
    ///
    /// Returns `true` if the key was already present (the frame is a
    /// duplicate), `false` if it was inserted now. First-wins: a present
    /// key's timestamp is never refreshed.
    pub fn seen_or_insert(&mut self, key: FrameKey, now: I) -> bool {
        self.expire_front(now);

        if let Some(&inserted) = self.entries.get(&key) {
            if now - inserted < self.ttl {
                return true;
            }
            // Expired in place; treat as unseen and re-insert below.
            self.entries.remove(&key);
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(key, now);
        self.order.push_back(key);
        false
    }

    /// Membership test without insertion.
    #[must_use]
    pub fn contains(&self, key: &FrameKey, now: I) -> bool {
        self.entries.get(key).is_some_and(|&inserted| now - inserted < self.ttl)
    }

    /// Remove every entry older than the TTL. Called by the periodic sweep;
    /// insertion also expires lazily from the front.
    pub fn sweep(&mut self, now: I) {
        self.entries.retain(|_, &mut inserted| now - inserted < self.ttl);
        self.order.retain(|key| self.entries.contains_key(key));
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired keys from the front of the insertion order.
    fn expire_front(&mut self, now: I) {
        while let Some(&front) = self.order.front() {
            match self.entries.get(&front) {
                Some(&inserted) if now - inserted < self.ttl => break,
                Some(_) => {
                    self.entries.remove(&front);
                    self.order.pop_front();
                },
                // Stale order entry for a key evicted earlier.
                None => {
                    self.order.pop_front();
                },
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some(key) = self.order.pop_front() {
            if self.entries.remove(&key).is_some() {
                break;
            }
        }
    }
}
