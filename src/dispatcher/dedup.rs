//! Bounded FIFO+set deduplication (§4.3, §9 redesign note).
//!
//! A ring buffer gives eviction order; a `HashSet` gives O(1) lookup.
//! Both halves are updated together under the dispatcher's single lock
//! (§5: "both structures must be updated atomically").

use std::collections::{HashSet, VecDeque};

const CAPACITY: usize = 100;

#[derive(Debug, Default)]
pub struct BoundedIdSet {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl BoundedIdSet {
    pub fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(CAPACITY),
            seen: HashSet::with_capacity(CAPACITY),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Insert `id`, evicting the oldest entry if at capacity.
    pub fn insert(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.seen.contains(&id) {
            return;
        }
        self.order.push_back(id.clone());
        self.seen.insert(id);
        if self.order.len() > CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
