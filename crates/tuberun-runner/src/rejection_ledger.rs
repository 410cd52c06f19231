// RejectionLedger: how many times this runner rejected each job id.
// Bounded; once full, the oldest tracked id is forgotten.

use std::collections::{HashMap, VecDeque};

/// Default number of job ids tracked at once.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct RejectionLedger {
    capacity: usize,
    /// id -> (rejections, sequence of the entry's insertion)
    counts: HashMap<u64, (u32, u64)>,
    /// Insertion order. Entries whose sequence no longer matches `counts`
    /// are stale and skipped.
    order: VecDeque<(u64, u64)>,
    next_seq: u64,
}

impl RejectionLedger {
    /// A ledger tracking at most `capacity` ids. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            counts: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Count one more rejection of `id` and return the total.
    pub fn record(&mut self, id: u64) -> u32 {
        if let Some((count, _)) = self.counts.get_mut(&id) {
            *count += 1;
            return *count;
        }

        while self.counts.len() >= self.capacity && self.evict_oldest() {}

        let seq = self.next_seq;
        self.next_seq += 1;
        self.counts.insert(id, (1, seq));
        self.order.push_back((id, seq));
        self.compact();
        1
    }

    /// Stop tracking `id`.
    pub fn forget(&mut self, id: u64) {
        self.counts.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((id, seq)) = self.order.pop_front() {
            if matches!(self.counts.get(&id), Some((_, current)) if *current == seq) {
                self.counts.remove(&id);
                return true;
            }
        }
        false
    }

    /// Drop stale order entries left behind by `forget`.
    fn compact(&mut self) {
        if self.order.len() > self.capacity * 2 {
            let counts = &self.counts;
            self.order
                .retain(|(id, seq)| matches!(counts.get(id), Some((_, current)) if current == seq));
        }
    }
}

impl Default for RejectionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
