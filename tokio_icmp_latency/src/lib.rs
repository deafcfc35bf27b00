//! Continuous ICMP latency probing on top of tokio.
//!
//! A [`Monitor`] runs, for every destination, an echo sender, a reply
//! receiver, a timeout reaper and a stale-entry sweeper. Their results land
//! in a single bounded [`ResultsBuffer`] that readers snapshot at will.

pub mod monitor;
pub mod ping;
pub mod results;

pub use monitor::{Monitor, MonitorConfig};
pub use ping::{ProbeError, ProbeOutcome, ProbeResult, ProbeTimings, TaskRole};
pub use results::ResultsBuffer;
