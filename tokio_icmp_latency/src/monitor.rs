//! Process-level probing context.
//!
//! [`Monitor`] owns the shared results buffer, one [`DestinationProbe`] per
//! destination and the handles of every task it spawned. All tasks observe a
//! single cancellation token.

use crate::ping::icmp::{self, IcmpTransport, RawSocket};
use crate::ping::probe::DestinationProbe;
use crate::ping::{ProbeError, ProbeResult, ProbeTimings, TaskRole};
use crate::results::ResultsBuffer;
use futures::future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WINDOW: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Local address the raw sockets bind to.
    pub listen_address: Ipv4Addr,
    pub destinations: Vec<Ipv4Addr>,
    pub timings: ProbeTimings,
    /// Results kept per destination; the buffer holds `destinations * window`.
    pub window: usize,
}

impl MonitorConfig {
    pub fn new(destinations: Vec<Ipv4Addr>) -> Self {
        Self {
            listen_address: Ipv4Addr::UNSPECIFIED,
            destinations,
            timings: ProbeTimings::default(),
            window: DEFAULT_WINDOW,
        }
    }

    pub fn capacity(&self) -> usize {
        self.destinations.len().saturating_mul(self.window)
    }
}

struct ProbeTask {
    destination: Ipv4Addr,
    role: TaskRole,
    handle: JoinHandle<Result<(), ProbeError>>,
}

fn settle(
    destination: Ipv4Addr,
    role: TaskRole,
    joined: Result<Result<(), ProbeError>, JoinError>,
) -> Result<(), ProbeError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(ProbeError::Task {
            destination,
            role,
            reason: e.to_string(),
        }),
    }
}

pub struct Monitor {
    results: Arc<ResultsBuffer>,
    probes: Vec<Arc<DestinationProbe>>,
    cancel: CancellationToken,
    tasks: Vec<ProbeTask>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("probes", &self.probes)
            .field("results", &self.results.len())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Opens a raw ICMP socket per destination and starts probing.
    ///
    /// Must be called from within a tokio runtime. Fails before spawning
    /// anything if a socket cannot be opened, typically for lack of
    /// privilege.
    pub fn start(config: MonitorConfig) -> Result<Self, ProbeError> {
        let address = config.listen_address;
        Self::start_with(config, |_| {
            RawSocket::open(address)
                .map(|socket| Arc::new(socket) as Arc<dyn IcmpTransport>)
                .map_err(|source| ProbeError::Socket { address, source })
        })
    }

    /// Same as [`Monitor::start`] with a caller-provided transport per
    /// destination.
    pub fn start_with<F>(config: MonitorConfig, mut open: F) -> Result<Self, ProbeError>
    where
        F: FnMut(Ipv4Addr) -> Result<Arc<dyn IcmpTransport>, ProbeError>,
    {
        let results = Arc::new(ResultsBuffer::new(config.capacity()));
        let identifier = icmp::process_identifier();

        let probes = config
            .destinations
            .iter()
            .map(|&destination| {
                Ok::<_, ProbeError>(Arc::new(DestinationProbe::new(
                    destination,
                    identifier,
                    config.timings,
                    open(destination)?,
                    results.clone(),
                )))
            })
            .collect::<Result<Vec<_>, ProbeError>>()?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(probes.len() * 4);
        for probe in &probes {
            let destination = probe.destination();
            // receiver first so no early reply is missed
            tasks.push(ProbeTask {
                destination,
                role: TaskRole::Receiver,
                handle: tokio::task::spawn_blocking({
                    let probe = probe.clone();
                    let cancel = cancel.clone();
                    move || probe.run_receiver(cancel)
                }),
            });
            tasks.push(ProbeTask {
                destination,
                role: TaskRole::Sender,
                handle: tokio::spawn(probe.clone().run_sender(cancel.clone())),
            });
            tasks.push(ProbeTask {
                destination,
                role: TaskRole::Reaper,
                handle: tokio::spawn(probe.clone().run_reaper(cancel.clone())),
            });
            tasks.push(ProbeTask {
                destination,
                role: TaskRole::Sweeper,
                handle: tokio::spawn(probe.clone().run_sweeper(cancel.clone())),
            });
            tracing::info!(%destination, "Probing started");
        }

        tracing::info!(
            destinations = probes.len(),
            capacity = results.capacity(),
            identifier,
            "Monitor started"
        );
        Ok(Self {
            results,
            probes,
            cancel,
            tasks,
        })
    }

    pub fn results(&self) -> Arc<ResultsBuffer> {
        self.results.clone()
    }

    /// Snapshot of the most recent results, oldest first.
    pub fn recent_results(&self) -> Vec<ProbeResult> {
        self.results.snapshot()
    }

    pub fn probe(&self, destination: Ipv4Addr) -> Option<&DestinationProbe> {
        self.probes
            .iter()
            .find(|p| p.destination() == destination)
            .map(|p| p.as_ref())
    }

    pub fn destinations(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.probes.iter().map(|p| p.destination())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves when a task fails, after cancelling every other task, or
    /// once all tasks have stopped following cancellation.
    pub async fn wait(&mut self) -> Result<(), ProbeError> {
        while !self.tasks.is_empty() {
            let (joined, index, _) =
                future::select_all(self.tasks.iter_mut().map(|t| &mut t.handle)).await;
            let task = self.tasks.swap_remove(index);
            match settle(task.destination, task.role, joined) {
                Ok(()) => {
                    tracing::debug!(destination = %task.destination, role = %task.role, "Task stopped");
                }
                Err(e) => {
                    tracing::error!(destination = %task.destination, role = %task.role, error = %e, "Task failed");
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Cancels every task and waits for them, returning the first failure.
    pub async fn shutdown(mut self) -> Result<(), ProbeError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let labels: Vec<_> = tasks.iter().map(|t| (t.destination, t.role)).collect();
        let joined = future::join_all(tasks.into_iter().map(|t| t.handle)).await;

        let mut first_error = None;
        for ((destination, role), joined) in labels.into_iter().zip(joined) {
            if let Err(e) = settle(destination, role, joined) {
                tracing::warn!(%destination, %role, error = %e, "Task ended with error");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("Monitor stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
