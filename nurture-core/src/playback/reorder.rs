//! Arrival-order release of asynchronously decoded chunks.
//!
//! Decodes may finish in any order. Each chunk is tagged with its arrival
//! sequence number; `ReorderBuffer` only releases a result once every earlier
//! sequence number has been released. A failed decode is inserted as `None`
//! so it does not hold back later chunks.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, Option<T>>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Sequence number the buffer is waiting on.
    pub fn next_expected(&self) -> u64 {
        self.next
    }

    /// Results held back behind a missing earlier sequence number.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    /// Record the result for `seq`. Already-released sequence numbers are ignored.
    pub fn insert(&mut self, seq: u64, item: Option<T>) {
        if seq < self.next {
            return;
        }
        self.pending.insert(seq, item);
    }

    /// Release every consecutive result from `next_expected`, skipping holes.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            self.next += 1;
            if let Some(item) = item {
                ready.push(item);
            }
        }
        ready
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.pending.clear();
    }
}
