//! Bounded dedup guard for button presses.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Identity of one accept attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub chat_id: String,
    pub message_id: i64,
    pub issue_id: String,
}

/// Remembers recently processed attempts so a double press acknowledges
/// without re-processing. Bounded FIFO: once full, the oldest key is evicted
/// and may be processed again.
pub struct DedupGuard {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

pub const DEFAULT_CAPACITY: usize = 512;

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { seen: HashSet::new(), order: VecDeque::new() }),
            capacity,
        }
    }

    /// Record an attempt. Returns `true` the first time a key is seen.
    /// Check, insert, and eviction happen under one lock.
    pub fn register_attempt(&self, key: DedupKey) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.seen.contains(&key) {
            return false;
        }
        inner.seen.insert(key.clone());
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(expired) = inner.order.pop_front() {
                inner.seen.remove(&expired);
            }
        }
        true
    }
}
