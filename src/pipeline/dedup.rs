//! Bounded memory of already-emitted record identities.
//!
//! Entries are evicted oldest-first-seen once the capacity is reached.
//! The queue is kept sorted by first-seen time, so its front is always the
//! entry to evict even when times arrive out of order.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::models::RecordId;

/// Identity → first-seen time, never larger than its capacity.
#[derive(Debug, Clone)]
pub struct DedupMemory {
    capacity: usize,
    first_seen: HashMap<RecordId, DateTime<Utc>>,
    /// (first seen, identity), ascending; ties keep insertion order
    order: VecDeque<(DateTime<Utc>, RecordId)>,
}

impl DedupMemory {
    /// Create an empty memory. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            first_seen: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.first_seen.contains_key(id)
    }

    /// Remember `id`. Returns `false` (and changes nothing) if it is known.
    ///
    /// When full, the existing entry with the oldest first-seen time is
    /// evicted. The new entry itself is always kept.
    pub fn insert(&mut self, id: RecordId, seen_at: DateTime<Utc>) -> bool {
        if self.first_seen.contains_key(&id) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some((_, oldest)) = self.order.pop_front() {
                self.first_seen.remove(&oldest);
                log::debug!("Dedup memory full, evicted {}", oldest);
            }
        }
        let slot = self.order.partition_point(|(at, _)| *at <= seen_at);
        self.first_seen.insert(id.clone(), seen_at);
        self.order.insert(slot, (seen_at, id));
        true
    }

    pub fn first_seen(&self, id: &RecordId) -> Option<DateTime<Utc>> {
        self.first_seen.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
