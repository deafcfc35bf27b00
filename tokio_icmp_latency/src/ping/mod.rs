pub mod icmp;
pub mod outstanding;
pub mod probe;
pub mod sequence;

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_REAP_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { rtt: Duration },
    Lost,
}

impl ProbeOutcome {
    /// A round trip counts as a success only when it is strictly below the
    /// loss threshold. The reaper uses the same threshold, so a probe is never
    /// reported as both.
    pub fn from_rtt(rtt: Duration, timeout: Duration) -> Self {
        if rtt < timeout {
            Self::Success { rtt }
        } else {
            Self::Lost
        }
    }

    pub fn rtt(&self) -> Option<Duration> {
        match self {
            Self::Success { rtt } => Some(*rtt),
            Self::Lost => None,
        }
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Lost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub destination: Ipv4Addr,
    pub sequence: u16,
    pub outcome: ProbeOutcome,
    /// Send time in milliseconds since the UNIX epoch.
    pub sent_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    pub interval: Duration,
    pub timeout: Duration,
    pub reap_period: Duration,
    pub sweep_period: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            reap_period: DEFAULT_REAP_PERIOD,
            sweep_period: DEFAULT_SWEEP_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
    Sender,
    Receiver,
    Reaper,
    Sweeper,
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Reaper => "reaper",
            Self::Sweeper => "sweeper",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to open raw ICMP socket on {address}: {source}")]
    Socket {
        address: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("failed to send echo request to {destination}: {source}")]
    Send {
        destination: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("failed to read ICMP socket for {destination}: {source}")]
    Receive {
        destination: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("{role} task for {destination} aborted: {reason}")]
    Task {
        destination: Ipv4Addr,
        role: TaskRole,
        reason: String,
    },
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn outcome_boundary() {
        let timeout = Duration::from_millis(5000);
        assert_eq!(
            ProbeOutcome::from_rtt(Duration::from_millis(4999), timeout),
            ProbeOutcome::Success {
                rtt: Duration::from_millis(4999)
            }
        );
        assert_eq!(
            ProbeOutcome::from_rtt(Duration::from_millis(5000), timeout),
            ProbeOutcome::Lost
        );
        assert_eq!(
            ProbeOutcome::from_rtt(Duration::from_millis(5001), timeout),
            ProbeOutcome::Lost
        );
    }

    #[test]
    fn lost_has_no_rtt() {
        assert_eq!(ProbeOutcome::Lost.rtt(), None);
        assert!(ProbeOutcome::Lost.is_lost());
        let success = ProbeOutcome::Success {
            rtt: Duration::from_millis(3),
        };
        assert_eq!(success.rtt(), Some(Duration::from_millis(3)));
        assert!(!success.is_lost());
    }
}
