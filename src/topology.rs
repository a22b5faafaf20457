//! Primary/worker process topology.
//!
//! One binary, two roles. A process started without the worker marker and with a
//! parallelism factor other than 1 becomes the **primary**: it spawns
//! `min(available_cpus, max_cpu) + 1` workers, runs no service logic itself, and replaces
//! workers as they exit according to a [`RestartPolicy`]. Every other process runs the
//! service.
//!
//! The supervisor publishes a live [`FleetStatus`] over a `tokio::sync::watch` channel
//! and stops (killing its children) when the shutdown future resolves.

pub mod restart;
pub mod spawner;

pub use restart::{RestartDecision, RestartPolicy, RestartTracker};
pub use spawner::{primary_exited, ExecSpawner, SpawnedWorker, WorkerExit, WorkerSpawner, WORKER_SLOT_ENV};

use crate::clock::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::telemetry::{self, FleetEvent, SharedSink, TopologyEvent};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("failed to spawn worker for slot {slot}: {source}")]
    Spawn {
        slot: usize,
        #[source]
        source: io::Error,
    },
    #[error("all {slots} worker slots are degraded")]
    AllSlotsDegraded { slots: usize },
}

/// Which part this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Supervise `workers` children; run no service logic.
    Primary { workers: usize },
    /// Child started by a primary.
    Worker { slot: usize },
    /// `max_cpu == 1`: the only process, running the service itself.
    Sole,
}

impl Role {
    /// Decide from the process environment.
    pub fn from_env(max_cpu: usize) -> Role {
        let marker = std::env::var(WORKER_SLOT_ENV).ok();
        Role::decide(marker.as_deref(), max_cpu, available_cpus())
    }

    pub fn decide(marker: Option<&str>, max_cpu: usize, available_cpus: usize) -> Role {
        if let Some(raw) = marker {
            let slot = raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(target: "fleetline::topology", marker = raw, "unparseable worker slot, using 0");
                0
            });
            return Role::Worker { slot };
        }
        if max_cpu == 1 {
            Role::Sole
        } else {
            Role::Primary { workers: worker_count(available_cpus, max_cpu) }
        }
    }

    /// Processes in this role run the service (bootstrap, cache, subscriber).
    pub fn runs_service(&self) -> bool {
        !matches!(self, Role::Primary { .. })
    }
}

pub fn available_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Number of workers a primary keeps running.
pub fn worker_count(available_cpus: usize, max_cpu: usize) -> usize {
    available_cpus.min(max_cpu) + 1
}

/// A worker as tracked by the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProcess {
    pub slot: usize,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_exit: Option<WorkerExit>,
    /// Respawns of this slot before this process was started.
    pub restarts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Starting,
    Running,
    Restarting { after: Duration },
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub slot: usize,
    pub phase: SlotPhase,
    /// Current process, or the last one if the slot is restarting or degraded.
    pub process: Option<WorkerProcess>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetStatus {
    pub slots: Vec<SlotStatus>,
}

impl FleetStatus {
    pub fn running(&self) -> usize {
        self.count(|p| p == SlotPhase::Running)
    }

    pub fn degraded(&self) -> usize {
        self.count(|p| p == SlotPhase::Degraded)
    }

    fn count(&self, pred: impl Fn(SlotPhase) -> bool) -> usize {
        self.slots.iter().filter(|s| pred(s.phase)).count()
    }
}

enum SlotEvent {
    Exited { slot: usize, pid: u32, exit: WorkerExit },
    RestartDue { slot: usize },
}

/// Keeps `workers` children alive on behalf of the primary.
pub struct Supervisor {
    workers: usize,
    spawner: Arc<dyn WorkerSpawner>,
    tracker: RestartTracker,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
    status: watch::Sender<FleetStatus>,
}

impl Supervisor {
    pub fn new(workers: usize, policy: RestartPolicy, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let initial = FleetStatus {
            slots: (0..workers)
                .map(|slot| SlotStatus { slot, phase: SlotPhase::Starting, process: None })
                .collect(),
        };
        Self {
            workers,
            spawner,
            tracker: RestartTracker::new(policy, workers, clock),
            sleeper: Arc::new(TokioSleeper),
            sink: telemetry::null_sink(),
            status: watch::channel(initial).0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tracker = RestartTracker::new(self.tracker.policy(), self.workers, clock);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Live view of the fleet; stays readable after [`Supervisor::run`] returns.
    pub fn status(&self) -> watch::Receiver<FleetStatus> {
        self.status.subscribe()
    }

    /// Spawn every slot and supervise until `shutdown` resolves.
    ///
    /// Returns an error when a spawn fails or when every slot has been degraded; either
    /// way the caller is expected to exit non-zero. Children still running when this
    /// returns are killed.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), TopologyError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            target: "fleetline::topology",
            workers = self.workers,
            policy = ?self.tracker.policy(),
            "primary starting workers"
        );
        let mut pending: FuturesUnordered<BoxFuture<'static, SlotEvent>> = FuturesUnordered::new();
        for slot in 0..self.workers {
            self.start(slot, &mut pending).await?;
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(target: "fleetline::topology", "primary shutting down, stopping workers");
                    return Ok(());
                }
                Some(event) = pending.next() => match event {
                    SlotEvent::Exited { slot, pid, exit } => {
                        self.on_exit(slot, pid, exit, &mut pending).await?;
                    }
                    SlotEvent::RestartDue { slot } => {
                        self.start(slot, &mut pending).await?;
                    }
                },
            }
        }
    }

    async fn start(
        &mut self,
        slot: usize,
        pending: &mut FuturesUnordered<BoxFuture<'static, SlotEvent>>,
    ) -> Result<(), TopologyError> {
        let spawned = self.spawner.spawn(slot).map_err(|source| {
            tracing::error!(target: "fleetline::topology", slot, error = %source, "failed to spawn worker");
            TopologyError::Spawn { slot, source }
        })?;
        let pid = spawned.pid;
        let process = WorkerProcess {
            slot,
            pid,
            started_at: Utc::now(),
            last_exit: None,
            restarts: self.tracker.total_restarts(slot),
        };
        tracing::info!(target: "fleetline::topology", slot, pid, "worker started");
        self.set_slot(slot, SlotPhase::Running, Some(process));
        telemetry::emit(&self.sink, FleetEvent::Topology(TopologyEvent::WorkerStarted { slot, pid })).await;

        pending.push(spawned.exit.map(move |exit| SlotEvent::Exited { slot, pid, exit }).boxed());
        Ok(())
    }

    async fn on_exit(
        &mut self,
        slot: usize,
        pid: u32,
        exit: WorkerExit,
        pending: &mut FuturesUnordered<BoxFuture<'static, SlotEvent>>,
    ) -> Result<(), TopologyError> {
        tracing::warn!(
            target: "fleetline::topology",
            slot,
            pid,
            code = ?exit.code,
            "worker {pid} died, starting another worker"
        );
        telemetry::emit(
            &self.sink,
            FleetEvent::Topology(TopologyEvent::WorkerExited { slot, pid, code: exit.code }),
        )
        .await;
        let last = self.slot_process(slot).map(|mut p| {
            p.last_exit = Some(exit);
            p
        });

        match self.tracker.on_exit(slot) {
            RestartDecision::Restart { delay, restarts } => {
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Topology(TopologyEvent::RestartScheduled { slot, delay, restarts }),
                )
                .await;
                if delay.is_zero() {
                    self.set_slot(slot, SlotPhase::Starting, last);
                    self.start(slot, pending).await
                } else {
                    tracing::info!(
                        target: "fleetline::topology",
                        slot,
                        restarts,
                        delay_ms = delay.as_millis() as u64,
                        "worker restart scheduled"
                    );
                    self.set_slot(slot, SlotPhase::Restarting { after: delay }, last);
                    let wait = self.sleeper.sleep(delay);
                    pending.push(
                        async move {
                            wait.await;
                            SlotEvent::RestartDue { slot }
                        }
                        .boxed(),
                    );
                    Ok(())
                }
            }
            RestartDecision::Degrade { restarts } => {
                tracing::error!(
                    target: "fleetline::topology",
                    slot,
                    restarts,
                    "worker slot exhausted its restart budget and is degraded"
                );
                self.set_slot(slot, SlotPhase::Degraded, last);
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Topology(TopologyEvent::SlotDegraded { slot, restarts }),
                )
                .await;
                if self.status.borrow().degraded() == self.workers {
                    tracing::error!(target: "fleetline::topology", slots = self.workers, "every worker slot is degraded");
                    return Err(TopologyError::AllSlotsDegraded { slots: self.workers });
                }
                Ok(())
            }
        }
    }

    fn slot_process(&self, slot: usize) -> Option<WorkerProcess> {
        self.status.borrow().slots.get(slot).and_then(|s| s.process.clone())
    }

    fn set_slot(&self, slot: usize, phase: SlotPhase, process: Option<WorkerProcess>) {
        self.status.send_modify(|status| {
            if let Some(entry) = status.slots.get_mut(slot) {
                entry.phase = phase;
                entry.process = process;
            }
        });
    }
}
