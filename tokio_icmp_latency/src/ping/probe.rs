//! Sender, receiver, reaper and sweeper for a single destination.

use super::icmp::{self, IcmpTransport, RECV_BUFFER_SIZE};
use super::outstanding::OutstandingTable;
use super::sequence::SequenceClock;
use super::{epoch_millis, ProbeError, ProbeOutcome, ProbeResult, ProbeTimings};
use crate::results::ResultsBuffer;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct DestinationProbe {
    destination: Ipv4Addr,
    identifier: u16,
    timings: ProbeTimings,
    clock: SequenceClock,
    outstanding: OutstandingTable,
    transport: Arc<dyn IcmpTransport>,
    results: Arc<ResultsBuffer>,
}

impl std::fmt::Debug for DestinationProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationProbe")
            .field("destination", &self.destination)
            .field("identifier", &self.identifier)
            .field("timings", &self.timings)
            .field("outstanding", &self.outstanding.len())
            .finish_non_exhaustive()
    }
}

/// Sleeps for `period` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

impl DestinationProbe {
    pub fn new(
        destination: Ipv4Addr,
        identifier: u16,
        timings: ProbeTimings,
        transport: Arc<dyn IcmpTransport>,
        results: Arc<ResultsBuffer>,
    ) -> Self {
        Self {
            destination,
            identifier,
            timings,
            clock: SequenceClock::new(),
            outstanding: OutstandingTable::new(),
            transport,
            results,
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn outstanding(&self) -> &OutstandingTable {
        &self.outstanding
    }

    /// One sender cycle: allocate a sequence, record it, transmit.
    ///
    /// The entry is recorded before transmission so a fast reply always finds
    /// it. On failure the entry is dropped again.
    pub fn send_next(&self) -> Result<u16, ProbeError> {
        let sequence = self.clock.next_sequence();
        let packet = icmp::build_echo_request(self.identifier, sequence);
        self.outstanding
            .insert(sequence, Instant::now(), epoch_millis());
        if let Err(source) = self.transport.send_to(&packet, self.destination) {
            self.outstanding.discard(sequence);
            return Err(ProbeError::Send {
                destination: self.destination,
                source,
            });
        }
        tracing::trace!(destination = %self.destination, seq = sequence, "Echo request sent");
        Ok(sequence)
    }

    /// Correlates one inbound datagram. Returns the result it produced, if any.
    pub fn handle_datagram(&self, datagram: &[u8], arrival: Instant) -> Option<ProbeResult> {
        let datagram = match icmp::parse_datagram(datagram) {
            Ok(datagram) => datagram,
            Err(error) => {
                tracing::trace!(destination = %self.destination, %error, "Skipping datagram");
                return None;
            }
        };
        if !datagram.is_echo_reply_for(self.destination, self.identifier) {
            return None;
        }

        let acknowledged = match self.outstanding.acknowledge(datagram.sequence, arrival) {
            Some(acknowledged) => acknowledged,
            None => {
                tracing::trace!(
                    destination = %self.destination,
                    seq = datagram.sequence,
                    "Discarding stale or duplicate reply"
                );
                return None;
            }
        };

        let outcome = ProbeOutcome::from_rtt(acknowledged.rtt, self.timings.timeout);
        match outcome {
            ProbeOutcome::Success { rtt } => tracing::trace!(
                destination = %self.destination,
                seq = datagram.sequence,
                rtt_ms = rtt.as_millis() as u64,
                "Echo reply"
            ),
            ProbeOutcome::Lost => tracing::debug!(
                destination = %self.destination,
                seq = datagram.sequence,
                rtt_ms = acknowledged.rtt.as_millis() as u64,
                "Echo reply arrived past timeout"
            ),
        }
        let result = ProbeResult {
            destination: self.destination,
            sequence: datagram.sequence,
            outcome,
            sent_at_ms: acknowledged.sent_at_ms,
        };
        self.results.append(result);
        Some(result)
    }

    /// Marks requests older than the timeout and reports each as lost.
    pub fn reap(&self, now: Instant) -> usize {
        let expired = self.outstanding.reap(now, self.timings.timeout);
        for request in &expired {
            tracing::debug!(destination = %self.destination, seq = request.sequence, "Probe lost");
            self.results.append(ProbeResult {
                destination: self.destination,
                sequence: request.sequence,
                outcome: ProbeOutcome::Lost,
                sent_at_ms: request.sent_at_ms,
            });
        }
        expired.len()
    }

    pub fn sweep(&self) -> usize {
        let removed = self.outstanding.sweep();
        if removed > 0 {
            tracing::trace!(destination = %self.destination, removed, "Swept reaped requests");
        }
        removed
    }

    pub async fn run_sender(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ProbeError> {
        while !cancel.is_cancelled() {
            self.send_next()?;
            if !sleep_or_cancel(&cancel, self.timings.interval).await {
                break;
            }
        }
        Ok(())
    }

    /// Blocking receive loop, meant for `spawn_blocking`.
    pub fn run_receiver(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ProbeError> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        while !cancel.is_cancelled() {
            let n = match self.transport.recv(&mut buffer) {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(source) => {
                    return Err(ProbeError::Receive {
                        destination: self.destination,
                        source,
                    })
                }
            };
            let arrival = Instant::now();
            self.handle_datagram(&buffer[..n], arrival);
        }
        Ok(())
    }

    pub async fn run_reaper(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ProbeError> {
        while sleep_or_cancel(&cancel, self.timings.reap_period).await {
            self.reap(Instant::now());
        }
        Ok(())
    }

    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ProbeError> {
        while sleep_or_cancel(&cancel, self.timings.sweep_period).await {
            self.sweep();
        }
        Ok(())
    }
}
