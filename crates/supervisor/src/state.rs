//! Per-worker supervision state machine.
//!
//! STARTING -> RUNNING on the first healthy check, RUNNING -> DEGRADED on a
//! missed heartbeat, DEGRADED -> RESTARTING once the grace period expires,
//! RESTARTING -> STARTING on a successful restart or STOPPED when the
//! attempt budget is exhausted and the failure escalates. The machine is
//! pure over timestamps so recovery bounds are assertable in tests without
//! real waiting.

use chrono::{DateTime, Duration, Utc};
use predmarket_core::SupervisionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Running,
    Degraded,
    Restarting,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// What the supervisor must do after a health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionAction {
    None,
    /// Stop and restart the worker after waiting out the backoff.
    Restart { backoff_ms: u64 },
    /// Attempt budget exhausted: fatal for the domain.
    Escalate,
}

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub name: String,
    pub state: WorkerState,
    pub last_heartbeat: DateTime<Utc>,
    pub restart_count: u32,
    degraded_since: Option<DateTime<Utc>>,
    running_since: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::Starting,
            last_heartbeat: now,
            restart_count: 0,
            degraded_since: None,
            running_since: None,
        }
    }

    /// Folds one health observation into the state machine and returns the
    /// action the supervisor must take.
    pub fn on_health(
        &mut self,
        healthy: bool,
        now: DateTime<Utc>,
        config: &SupervisionConfig,
    ) -> SupervisionAction {
        match (self.state, healthy) {
            (WorkerState::Stopped, _) => SupervisionAction::None,

            (WorkerState::Starting | WorkerState::Degraded, true) => {
                if self.state == WorkerState::Starting {
                    tracing::info!(worker = %self.name, "worker running");
                }
                self.state = WorkerState::Running;
                self.last_heartbeat = now;
                self.degraded_since = None;
                self.running_since.get_or_insert(now);
                SupervisionAction::None
            }

            (WorkerState::Running, true) => {
                self.last_heartbeat = now;
                // The restart budget only replenishes after a sustained
                // healthy stretch.
                if self.restart_count > 0 {
                    let sustained = Duration::milliseconds(config.sustained_running_ms as i64);
                    if self
                        .running_since
                        .is_some_and(|since| now - since >= sustained)
                    {
                        tracing::debug!(worker = %self.name, "sustained running, restart count reset");
                        self.restart_count = 0;
                    }
                }
                SupervisionAction::None
            }

            (WorkerState::Running, false) => {
                tracing::warn!(worker = %self.name, "missed heartbeat, worker degraded");
                self.state = WorkerState::Degraded;
                self.degraded_since = Some(now);
                self.running_since = None;
                SupervisionAction::None
            }

            (WorkerState::Starting, false) => {
                // A worker that never comes up gets the same grace window,
                // measured from its last observed heartbeat.
                let waited = now - self.last_heartbeat;
                if waited >= Duration::milliseconds(config.degraded_grace_ms as i64) {
                    self.state = WorkerState::Degraded;
                    self.degraded_since = Some(now);
                }
                SupervisionAction::None
            }

            (WorkerState::Degraded, false) => {
                let grace = Duration::milliseconds(config.degraded_grace_ms as i64);
                let expired = self
                    .degraded_since
                    .is_none_or(|since| now - since >= grace);
                if !expired {
                    return SupervisionAction::None;
                }
                self.begin_restart(config)
            }

            (WorkerState::Restarting, false) => self.begin_restart(config),

            (WorkerState::Restarting, true) => {
                // A restart already in flight came healthy; treat it as the
                // fresh instance reporting in.
                self.state = WorkerState::Running;
                self.last_heartbeat = now;
                self.running_since = Some(now);
                SupervisionAction::None
            }
        }
    }

    fn begin_restart(&mut self, config: &SupervisionConfig) -> SupervisionAction {
        self.state = WorkerState::Restarting;
        self.restart_count += 1;
        if self.restart_count > config.max_restarts {
            tracing::error!(
                worker = %self.name,
                attempts = self.restart_count - 1,
                "restart budget exhausted, escalating"
            );
            return SupervisionAction::Escalate;
        }
        // Exponential backoff capped at the recovery bound.
        let shift = (self.restart_count - 1).min(16);
        let backoff_ms = config
            .backoff_base_ms
            .saturating_mul(1 << shift)
            .min(config.backoff_cap_ms);
        tracing::warn!(
            worker = %self.name,
            attempt = self.restart_count,
            backoff_ms,
            "restarting worker"
        );
        SupervisionAction::Restart { backoff_ms }
    }

    /// Marks a successful restart: the new instance begins STARTING.
    pub fn mark_restarted(&mut self, now: DateTime<Utc>) {
        self.state = WorkerState::Starting;
        self.last_heartbeat = now;
        self.degraded_since = None;
        self.running_since = None;
    }

    /// Terminal stop, either from shutdown or escalation.
    pub fn mark_stopped(&mut self) {
        self.state = WorkerState::Stopped;
        self.degraded_since = None;
        self.running_since = None;
    }
}
