use crate::state::{SupervisionAction, WorkerRecord, WorkerState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use predmarket_core::{SupervisionConfig, Worker};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Read-only view of one worker, owned by its supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub state: WorkerState,
    pub last_heartbeat: DateTime<Utc>,
    pub restart_count: u32,
}

/// Aggregate view of a domain, published on the supervisor's watch channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub domain: String,
    pub workers: Vec<WorkerSnapshot>,
    pub healthy: bool,
}

impl SupervisorStatus {
    fn empty(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            workers: Vec::new(),
            healthy: true,
        }
    }
}

/// Escalations from a supervisor to the orchestrator.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A worker exhausted its restart budget: fatal for the domain.
    DomainFatal { domain: String, worker: String },
}

#[derive(Debug)]
pub enum SupervisorCommand {
    Stop,
}

/// Cloneable handle to a running supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    status_rx: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    /// Asks the supervisor to drain and stop its workers.
    ///
    /// # Errors
    /// Returns an error if the supervisor already exited.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(SupervisorCommand::Stop).await?;
        Ok(())
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        self.status_rx.borrow().clone()
    }

    /// Completes once the supervisor publishes a status for which the
    /// predicate holds. Used by tests to await state transitions without
    /// polling.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&SupervisorStatus) -> bool) {
        while !predicate(&self.status_rx.borrow()) {
            if self.status_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns one domain's worker pool: polls health on a fixed interval, walks
/// each worker through the supervision state machine, restarts under the
/// bounded backoff policy, and escalates fatal failures.
pub struct Supervisor {
    domain: String,
    workers: Vec<(Box<dyn Worker>, WorkerRecord)>,
    config: SupervisionConfig,
    rx: mpsc::Receiver<SupervisorCommand>,
    status_tx: watch::Sender<SupervisorStatus>,
    event_tx: mpsc::Sender<SupervisorEvent>,
}

impl Supervisor {
    /// Spawns the supervisor actor for a domain and returns its handle.
    #[must_use]
    pub fn spawn(
        domain: impl Into<String>,
        workers: Vec<Box<dyn Worker>>,
        config: SupervisionConfig,
        event_tx: mpsc::Sender<SupervisorEvent>,
    ) -> SupervisorHandle {
        let domain = domain.into();
        let (tx, rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::empty(&domain));

        let now = Utc::now();
        let workers: Vec<(Box<dyn Worker>, WorkerRecord)> = workers
            .into_iter()
            .map(|worker| {
                let record = WorkerRecord::new(worker.name(), now);
                (worker, record)
            })
            .collect();

        let supervisor = Self {
            domain: domain.clone(),
            workers,
            config,
            rx,
            status_tx,
            event_tx,
        };
        tokio::spawn(async move {
            if let Err(e) = supervisor.run().await {
                tracing::error!(domain = %domain, "supervisor exited with error: {e:#}");
            }
        });

        SupervisorHandle { tx, status_rx }
    }

    async fn run(mut self) -> Result<()> {
        tracing::info!(domain = %self.domain, workers = self.workers.len(), "supervisor starting");

        for (worker, record) in &mut self.workers {
            if let Err(e) = worker.start().await {
                // Stays STARTING; the health loop will drive a restart.
                tracing::error!(
                    domain = %self.domain,
                    worker = %record.name,
                    "initial start failed: {e:#}"
                );
            }
        }
        self.publish_status();

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(SupervisorCommand::Stop) | None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.poll_workers().await;
                }
            }
        }

        tracing::info!(domain = %self.domain, "supervisor stopped");
        Ok(())
    }

    async fn poll_workers(&mut self) {
        let now = Utc::now();
        let mut escalations = Vec::new();

        for (worker, record) in &mut self.workers {
            if record.state == WorkerState::Stopped {
                continue;
            }
            let healthy = match worker.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(
                        domain = %self.domain,
                        worker = %record.name,
                        "health check failed: {e:#}"
                    );
                    false
                }
            };

            match record.on_health(healthy, now, &self.config) {
                SupervisionAction::None => {}
                SupervisionAction::Restart { backoff_ms } => {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    if let Err(e) = worker.stop().await {
                        tracing::warn!(worker = %record.name, "stop before restart failed: {e:#}");
                    }
                    match worker.start().await {
                        Ok(()) => record.mark_restarted(Utc::now()),
                        Err(e) => {
                            // Stays RESTARTING; the next tick retries or
                            // escalates.
                            tracing::error!(worker = %record.name, "restart failed: {e:#}");
                        }
                    }
                }
                SupervisionAction::Escalate => {
                    record.mark_stopped();
                    let _ = worker.stop().await;
                    escalations.push(SupervisorEvent::DomainFatal {
                        domain: self.domain.clone(),
                        worker: record.name.clone(),
                    });
                }
            }
        }

        self.publish_status();
        for event in escalations {
            if self.event_tx.send(event).await.is_err() {
                tracing::error!(domain = %self.domain, "orchestrator gone, escalation dropped");
            }
        }
    }

    /// Cooperative shutdown: every worker gets the drain timeout to finish
    /// in-flight work; the worker's own stop path aborts its task past
    /// that bound and reports the overrun.
    async fn shutdown(&mut self) {
        tracing::info!(domain = %self.domain, "stopping workers");
        for (worker, record) in &mut self.workers {
            if record.state == WorkerState::Stopped {
                continue;
            }
            if let Err(e) = worker.stop().await {
                // Fatal for this cycle only: the worker was terminated
                // forcibly and the overrun is recorded.
                tracing::error!(
                    domain = %self.domain,
                    worker = %record.name,
                    "worker exceeded drain timeout: {e:#}"
                );
            }
            record.mark_stopped();
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let workers: Vec<WorkerSnapshot> = self
            .workers
            .iter()
            .map(|(_, record)| WorkerSnapshot {
                name: record.name.clone(),
                state: record.state,
                last_heartbeat: record.last_heartbeat,
                restart_count: record.restart_count,
            })
            .collect();
        let healthy = workers
            .iter()
            .all(|w| matches!(w.state, WorkerState::Running | WorkerState::Starting));
        let _ = self.status_tx.send(SupervisorStatus {
            domain: self.domain.clone(),
            workers,
            healthy,
        });
    }
}
