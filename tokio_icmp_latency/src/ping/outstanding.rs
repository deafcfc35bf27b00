//! Echo requests that have been sent and not yet resolved.
//!
//! The sender inserts, the receiver takes live entries out, the reaper marks
//! expired entries and the sweeper deletes marked ones. Every access goes
//! through the same mutex, so whichever of receiver and reaper reaches an
//! entry first is the only one to report it.

use parking_lot::Mutex;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct OutstandingRequest {
    sent: Instant,
    sent_at_ms: u64,
    reaped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged {
    pub rtt: Duration,
    pub sent_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub sequence: u16,
    pub sent_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct OutstandingTable {
    entries: Mutex<BTreeMap<u16, OutstandingRequest>>,
}

impl OutstandingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request about to be sent. A leftover entry for the same
    /// sequence (only possible after a full wrap) is replaced.
    pub fn insert(&self, sequence: u16, sent: Instant, sent_at_ms: u64) {
        self.entries.lock().insert(
            sequence,
            OutstandingRequest {
                sent,
                sent_at_ms,
                reaped: false,
            },
        );
    }

    /// Drops an entry whatever its state. Used when transmission failed.
    pub fn discard(&self, sequence: u16) -> bool {
        self.entries.lock().remove(&sequence).is_some()
    }

    /// Takes a live entry out of the table for a matching reply.
    ///
    /// Returns `None` when the sequence is unknown or was already reaped;
    /// reaped entries stay in place for the sweeper.
    pub fn acknowledge(&self, sequence: u16, arrival: Instant) -> Option<Acknowledged> {
        match self.entries.lock().entry(sequence) {
            Entry::Occupied(entry) if !entry.get().reaped => {
                let request = entry.remove();
                Some(Acknowledged {
                    rtt: arrival.saturating_duration_since(request.sent),
                    sent_at_ms: request.sent_at_ms,
                })
            }
            _ => None,
        }
    }

    /// Marks every live entry at least `timeout` old and returns them in
    /// send order.
    pub fn reap(&self, now: Instant, timeout: Duration) -> Vec<Expired> {
        let mut entries = self.entries.lock();
        let mut expired: Vec<_> = entries
            .iter_mut()
            .filter(|(_, request)| {
                !request.reaped && now.saturating_duration_since(request.sent) >= timeout
            })
            .map(|(sequence, request)| {
                request.reaped = true;
                (
                    request.sent,
                    Expired {
                        sequence: *sequence,
                        sent_at_ms: request.sent_at_ms,
                    },
                )
            })
            .collect();
        drop(entries);
        expired.sort_by_key(|(sent, _)| *sent);
        expired.into_iter().map(|(_, e)| e).collect()
    }

    /// Deletes reaped entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, request| !request.reaped);
        before - entries.len()
    }

    pub fn contains(&self, sequence: u16) -> bool {
        self.entries.lock().contains_key(&sequence)
    }

    #[cfg(test)]
    pub fn is_reaped(&self, sequence: u16) -> Option<bool> {
        self.entries.lock().get(&sequence).map(|r| r.reaped)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
