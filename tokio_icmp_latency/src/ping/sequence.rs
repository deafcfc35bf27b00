use std::sync::atomic::{AtomicU16, Ordering};

/// Per-destination echo sequence numbers: 1, 2, 3, ... wrapping with the
/// 16-bit ICMP sequence field.
#[derive(Debug)]
pub struct SequenceClock {
    next: AtomicU16,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
        }
    }

    pub fn next_sequence(&self) -> u16 {
        // fetch_add wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceClock {
    fn default() -> Self {
        Self::new()
    }
}
