//! Bounded, shared window of the most recent probe results.

use crate::ping::ProbeResult;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Up-front reservation cap; larger buffers grow on demand up to `capacity`.
const INITIAL_RESERVE: usize = 4096;

/// FIFO ring of results from every destination, interleaved in arrival order.
#[derive(Debug)]
pub struct ResultsBuffer {
    capacity: usize,
    entries: RwLock<VecDeque<ProbeResult>>,
}

impl ResultsBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(INITIAL_RESERVE))),
        }
    }

    /// Adds `result` at the tail, evicting the oldest entry when full.
    pub fn append(&self, result: ProbeResult) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        self.entries.read().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
