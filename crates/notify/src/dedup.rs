//! At-most-once acceptance registry.
//!
//! The push transport delivers at least once; this registry turns that into
//! at-most-once acceptance. It remembers the most recent ids in insertion
//! order and evicts the oldest once full, since a re-delivering transport
//! only ever repeats recent events.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Default number of ids remembered before old entries are evicted.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// A bounded set of notification ids that have already been processed.
pub struct DedupRegistry {
    inner: Mutex<DedupInner>,
    capacity: usize,
}

struct DedupInner {
    seen: FxHashSet<String>,
    order: VecDeque<String>,
}

impl DedupRegistry {
    /// Create a registry remembering up to `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(DedupInner {
                seen: FxHashSet::default(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Record `id` if it has not been seen yet.
    ///
    /// Returns `true` exactly once per id within the retention window. A
    /// `false` means the id was already accepted and the caller must not
    /// process it again.
    pub fn accept(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(id) {
            return false;
        }
        if inner.order.len() >= self.capacity
            && let Some(evicted) = inner.order.pop_front()
        {
            inner.seen.remove(&evicted);
        }
        inner.seen.insert(id.to_string());
        inner.order.push_back(id.to_string());
        true
    }

    /// Whether `id` is currently remembered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().seen.contains(id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether nothing has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every remembered id.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.seen.clear();
        inner.order.clear();
    }
}

impl Default for DedupRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
