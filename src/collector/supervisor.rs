use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::HarvesterConfig;
use crate::credentials::{AccessToken, CredentialResolver};
use crate::error::CredentialError;
use crate::metrics::{METRICS, incr};
use crate::publisher::{FlushReport, Publisher};
use crate::twitter::source::StreamConnector;

use super::backoff::ReconnectPolicy;
use super::worker::{StreamWorker, WorkerExit, WorkerStatus};

/// Observable state of one supervised slot.
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub config: Arc<HarvesterConfig>,
    /// 0 for the first worker, incremented on every respawn
    pub generation: u32,
    pub status: WorkerStatus,
}

struct Slot {
    config: Arc<HarvesterConfig>,
    generation: u32,
    status: watch::Receiver<WorkerStatus>,
}

/// Shared, read-only view of every slot's current worker.
#[derive(Clone, Default)]
pub struct WorkerBoard {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl WorkerBoard {
    pub fn snapshot(&self) -> Vec<WorkerView> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .map(|s| WorkerView {
                config: s.config.clone(),
                generation: s.generation,
                status: *s.status.borrow(),
            })
            .collect()
    }

    /// Workers in Starting, Running or Backoff.
    pub fn active(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|v| !v.status.is_terminal())
            .count()
    }

    fn install(&self, index: usize, config: Arc<HarvesterConfig>, status: watch::Receiver<WorkerStatus>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(index) {
            Some(slot) => {
                slot.generation += 1;
                slot.status = status;
            }
            None => slots.push(Slot {
                config,
                generation: 0,
                status,
            }),
        }
    }
}

/// Summary returned once the supervisor has shut down.
#[derive(Debug)]
pub struct SupervisorReport {
    pub respawns: usize,
    pub flush: FlushReport,
}

/// Keeps exactly one live worker per configured harvester.
///
/// DESIGN:
/// - One tokio task per harvester, held in a `JoinSet`
/// - Completion of a task is the failure signal; there is no polling
/// - A replacement is built from the slot's original configuration
///   and started immediately; backoff is the worker's job
/// - A replacement for a closed stream inherits the closed worker's
///   error count, so it backs off before reconnecting
/// - Panicked or lost tasks are replaced too
///
/// SHUTDOWN:
/// - Cancelling the token stops every worker (even mid-backoff)
/// - The publisher is then drained within `drain_timeout`
pub struct Supervisor {
    harvesters: Vec<Arc<HarvesterConfig>>,
    tokens: Vec<AccessToken>,
    connector: Arc<dyn StreamConnector>,
    publisher: Publisher,
    policy: ReconnectPolicy,
    drain_timeout: Duration,
    board: WorkerBoard,
}

impl Supervisor {
    /// Resolves every harvester's account up front: an unknown account
    /// fails here, before any worker starts.
    pub fn new(
        harvesters: Vec<Arc<HarvesterConfig>>,
        credentials: &dyn CredentialResolver,
        connector: Arc<dyn StreamConnector>,
        publisher: Publisher,
        drain_timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let tokens = harvesters
            .iter()
            .map(|h| credentials.resolve(&h.account))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            harvesters,
            tokens,
            connector,
            publisher,
            policy: ReconnectPolicy::default(),
            drain_timeout,
            board: WorkerBoard::default(),
        })
    }

    pub fn board(&self) -> WorkerBoard {
        self.board.clone()
    }

    fn spawn(
        &self,
        index: usize,
        consecutive_errors: u32,
        workers: &mut Workers,
        shutdown: &CancellationToken,
    ) {
        let config = self.harvesters[index].clone();
        let worker = StreamWorker::new(
            config.clone(),
            self.tokens[index].clone(),
            self.connector.clone(),
            self.publisher.clone(),
            self.policy,
        )
        .resume_after(consecutive_errors);
        self.board.install(index, config, worker.status());

        let handle = workers.tasks.spawn(worker.run(shutdown.child_token()));
        workers.slots.insert(handle.id(), index);
    }

    pub async fn run(self, shutdown: CancellationToken) -> SupervisorReport {
        let mut workers = Workers::default();
        for index in 0..self.harvesters.len() {
            self.spawn(index, 0, &mut workers, &shutdown);
        }
        info!(
            "supervising {} stream workers via {}",
            self.harvesters.len(),
            self.connector.name()
        );

        let mut respawns = 0;
        loop {
            let joined = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = workers.tasks.join_next_with_id() => joined,
            };

            let (id, exit) = match joined {
                Ok((id, exit)) => (id, Ok(exit)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(index) = workers.slots.remove(&id) else {
                error!("finished task {id} belongs to no slot");
                continue;
            };

            if shutdown.is_cancelled() {
                break;
            }

            let label = &self.harvesters[index].label;
            let carried = match exit {
                Ok(WorkerExit::StreamEnded { consecutive_errors }) => {
                    info!("[{label}] stream ended, starting a replacement");
                    consecutive_errors
                }
                Ok(exit) => {
                    warn!("[{label}] worker terminated ({exit:?}), starting a replacement");
                    0
                }
                Err(e) => {
                    error!("[{label}] worker {}, starting a replacement", describe(e));
                    0
                }
            };

            self.spawn(index, carried, &mut workers, &shutdown);
            respawns += 1;
            incr(&METRICS.worker_respawns);
        }

        info!("shutting down {} stream workers", workers.tasks.len());
        while workers.tasks.join_next().await.is_some() {}

        let flush = self.publisher.flush(self.drain_timeout).await;
        info!(
            "supervisor stopped ({respawns} respawns, {} undelivered)",
            flush.dropped
        );

        SupervisorReport { respawns, flush }
    }
}

/// Running worker tasks and the slot each one serves.
#[derive(Default)]
struct Workers {
    tasks: JoinSet<WorkerExit>,
    slots: HashMap<Id, usize>,
}

fn describe(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("task lost ({err})");
    }
    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("panicked ({message})")
}
