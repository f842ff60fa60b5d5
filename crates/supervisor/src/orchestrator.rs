use crate::supervisor::{Supervisor, SupervisorEvent, SupervisorHandle, SupervisorStatus};
use chrono::{DateTime, Utc};
use predmarket_core::{SupervisionConfig, Worker};
use predmarket_risk::{CircuitBreaker, TradingState, TripReason};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};

/// How the orchestrator responds when a domain fails fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    /// Halt trading but keep the other domains alive (degraded operation).
    Critical,
    /// Rebuild the domain from scratch, once; a second fatal halts trading.
    Restartable,
    /// Log and carry on.
    Passive,
}

/// Builds a fresh worker pool for a domain; held so Restartable domains
/// can be rebuilt after a fatal failure.
pub type WorkerFactory = Box<dyn Fn() -> Vec<Box<dyn Worker>> + Send + Sync>;

struct DomainEntry {
    criticality: Criticality,
    handle: SupervisorHandle,
}

/// Aggregated health served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthView {
    pub trading_state: TradingState,
    pub domains: Vec<SupervisorStatus>,
    pub healthy: bool,
    pub generated_at: DateTime<Utc>,
}

/// Read-only, cloneable view of the orchestrator for the status API and
/// the shutdown path.
#[derive(Clone)]
pub struct OrchestratorHandle {
    domains: Arc<RwLock<Vec<(String, DomainEntry)>>>,
    breaker: Arc<CircuitBreaker>,
    shutdown_tx: watch::Sender<bool>,
}

impl OrchestratorHandle {
    /// Aggregates every supervisor's status with the trading state.
    pub async fn health(&self) -> HealthView {
        let domains = self.domains.read().await;
        let statuses: Vec<SupervisorStatus> =
            domains.iter().map(|(_, entry)| entry.handle.status()).collect();
        let healthy = statuses.iter().all(|s| s.healthy) && !self.breaker.is_halted();
        HealthView {
            trading_state: self.breaker.state(),
            domains: statuses,
            healthy,
            generated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn trading_state(&self) -> TradingState {
        self.breaker.state()
    }

    /// Operator clearance for a tripped circuit breaker.
    pub fn clear_halt(&self) {
        self.breaker.clear_halt();
    }

    /// Cooperative shutdown: stop supervisors in reverse start order, then
    /// end the orchestrator's own loop.
    pub async fn shutdown(&self) {
        tracing::info!("orchestrator shutting down");
        let domains = self.domains.read().await;
        for (name, entry) in domains.iter().rev() {
            if let Err(e) = entry.handle.stop().await {
                tracing::warn!(domain = %name, "supervisor already gone: {e:#}");
            }
        }
        drop(domains);
        let _ = self.shutdown_tx.send(true);
    }
}

/// Owns the set of supervisors, one per domain. Holds the worker factories
/// so a Restartable domain can be rebuilt, and routes fatal failures
/// according to each domain's criticality tier.
pub struct Orchestrator {
    config: SupervisionConfig,
    breaker: Arc<CircuitBreaker>,
    domains: Arc<RwLock<Vec<(String, DomainEntry)>>>,
    factories: HashMap<String, WorkerFactory>,
    /// Domains already granted their single rebuild.
    rebuilt: HashSet<String>,
    event_tx: mpsc::Sender<SupervisorEvent>,
    event_rx: mpsc::Receiver<SupervisorEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: SupervisionConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            breaker,
            domains: Arc::new(RwLock::new(Vec::new())),
            factories: HashMap::new(),
            rebuilt: HashSet::new(),
            event_tx,
            event_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Registers a domain and spawns its supervisor. Registration order is
    /// start order; shutdown walks it in reverse.
    pub async fn add_domain(
        &mut self,
        name: impl Into<String>,
        criticality: Criticality,
        factory: WorkerFactory,
    ) {
        let name = name.into();
        let handle = Supervisor::spawn(
            name.clone(),
            factory(),
            self.config.clone(),
            self.event_tx.clone(),
        );
        self.factories.insert(name.clone(), factory);
        self.domains.write().await.push((
            name,
            DomainEntry {
                criticality,
                handle,
            },
        ));
    }

    #[must_use]
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            domains: self.domains.clone(),
            breaker: self.breaker.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Event loop: reacts to domain-fatal escalations until shutdown.
    pub async fn run(mut self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(SupervisorEvent::DomainFatal { domain, worker }) => {
                        self.on_domain_fatal(&domain, &worker).await;
                    }
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("orchestrator loop ended");
    }

    async fn on_domain_fatal(&mut self, domain: &str, worker: &str) {
        let criticality = {
            let domains = self.domains.read().await;
            domains
                .iter()
                .find(|(name, _)| name == domain)
                .map(|(_, entry)| entry.criticality)
        };
        let Some(criticality) = criticality else {
            tracing::error!(domain, "fatal event for unknown domain");
            return;
        };

        tracing::error!(domain, worker, ?criticality, "domain failed fatally");

        match criticality {
            Criticality::Critical => {
                // Degraded operation: trading stops, ingestion and
                // observability stay alive.
                self.breaker.trip(TripReason::Manual(format!(
                    "fatal failure in critical domain {domain}"
                )));
            }
            Criticality::Restartable => {
                if self.rebuilt.insert(domain.to_string()) {
                    self.rebuild_domain(domain).await;
                } else {
                    tracing::error!(domain, "second fatal failure, halting trading");
                    self.breaker.trip(TripReason::Manual(format!(
                        "repeated fatal failure in domain {domain}"
                    )));
                }
            }
            Criticality::Passive => {
                tracing::warn!(domain, "passive domain failed, continuing without it");
            }
        }
    }

    async fn rebuild_domain(&mut self, domain: &str) {
        let Some(factory) = self.factories.get(domain) else {
            tracing::error!(domain, "no factory registered, cannot rebuild");
            return;
        };
        tracing::warn!(domain, "rebuilding domain from scratch");

        let mut domains = self.domains.write().await;
        if let Some((_, entry)) = domains.iter_mut().find(|(name, _)| name == domain) {
            let _ = entry.handle.stop().await;
            entry.handle = Supervisor::spawn(
                domain.to_string(),
                factory(),
                self.config.clone(),
                self.event_tx.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkerState;
    use anyhow::Result;
    use async_trait::async_trait;
    use predmarket_core::BreakerConfig;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config() -> SupervisionConfig {
        SupervisionConfig {
            heartbeat_interval_ms: 10,
            heartbeat_timeout_ms: 40,
            degraded_grace_ms: 20,
            backoff_base_ms: 10,
            backoff_cap_ms: 50,
            max_restarts: 2,
            sustained_running_ms: 10_000,
            drain_timeout_ms: 100,
        }
    }

    struct HealthyWorker;

    #[async_trait]
    impl Worker for HealthyWorker {
        fn name(&self) -> &str {
            "steady"
        }
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Dead until the shared flag flips, then healthy: the first
    /// incarnation escalates, the rebuilt one comes up clean.
    struct PhoenixWorker {
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Worker for PhoenixWorker {
        fn name(&self) -> &str {
            "phoenix"
        }
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                anyhow::bail!("not yet")
            }
        }
    }

    async fn wait_until<F>(mut condition: F)
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if condition().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition within bound");
    }

    #[tokio::test]
    async fn health_aggregates_domains() {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let mut orchestrator = Orchestrator::new(fast_config(), breaker);
        orchestrator
            .add_domain("observability", Criticality::Passive, Box::new(|| {
                vec![Box::new(HealthyWorker)]
            }))
            .await;
        let handle = orchestrator.handle();
        tokio::spawn(orchestrator.run());

        let check = handle.clone();
        wait_until(move || {
            let check = check.clone();
            Box::pin(async move {
                let view = check.health().await;
                view.domains.iter().any(|d| {
                    d.workers
                        .iter()
                        .any(|w| w.state == WorkerState::Running)
                })
            })
        })
        .await;

        let view = handle.health().await;
        assert!(view.healthy);
        assert_eq!(view.domains.len(), 1);
        assert_eq!(view.trading_state, TradingState::Active);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn critical_domain_fatal_halts_trading() {
        struct AlwaysDead;

        #[async_trait]
        impl Worker for AlwaysDead {
            fn name(&self) -> &str {
                "dead"
            }
            async fn start(&mut self) -> Result<()> {
                Ok(())
            }
            async fn stop(&mut self) -> Result<()> {
                Ok(())
            }
            async fn health_check(&self) -> Result<()> {
                anyhow::bail!("dead")
            }
        }

        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let mut orchestrator = Orchestrator::new(fast_config(), breaker.clone());
        orchestrator
            .add_domain("execution", Criticality::Critical, Box::new(|| {
                vec![Box::new(AlwaysDead)]
            }))
            .await;
        orchestrator
            .add_domain("observability", Criticality::Passive, Box::new(|| {
                vec![Box::new(HealthyWorker)]
            }))
            .await;
        let handle = orchestrator.handle();
        tokio::spawn(orchestrator.run());

        let check_breaker = breaker.clone();
        wait_until(move || {
            let b = check_breaker.clone();
            Box::pin(async move { b.is_halted() })
        })
        .await;

        // Degraded operation: the passive domain is still supervised.
        let view = handle.health().await;
        assert!(view.trading_state.is_halted());
        assert!(view
            .domains
            .iter()
            .any(|d| d.domain == "observability" && d.healthy));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn restartable_domain_is_rebuilt_once() {
        let alive = Arc::new(AtomicBool::new(false));
        let spawns = Arc::new(AtomicU32::new(0));

        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let mut orchestrator = Orchestrator::new(fast_config(), breaker.clone());
        let factory_alive = alive.clone();
        let factory_spawns = spawns.clone();
        orchestrator
            .add_domain(
                "ingestion",
                Criticality::Restartable,
                Box::new(move || {
                    factory_spawns.fetch_add(1, Ordering::SeqCst);
                    vec![Box::new(PhoenixWorker {
                        alive: factory_alive.clone(),
                    })]
                }),
            )
            .await;
        let handle = orchestrator.handle();
        tokio::spawn(orchestrator.run());

        // Let the first incarnation burn through its restart budget, then
        // allow the rebuild to come up healthy.
        let flip_spawns = spawns.clone();
        let flip_alive = alive.clone();
        wait_until(move || {
            let spawns = flip_spawns.clone();
            let alive = flip_alive.clone();
            Box::pin(async move {
                if spawns.load(Ordering::SeqCst) >= 2 {
                    alive.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            })
        })
        .await;

        let check = handle.clone();
        wait_until(move || {
            let check = check.clone();
            Box::pin(async move {
                let view = check.health().await;
                view.domains.iter().any(|d| {
                    d.domain == "ingestion"
                        && d.workers.iter().any(|w| w.state == WorkerState::Running)
                })
            })
        })
        .await;

        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert!(!breaker.is_halted());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn clear_halt_reopens_trading() {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let orchestrator = Orchestrator::new(fast_config(), breaker.clone());
        let handle = orchestrator.handle();
        tokio::spawn(orchestrator.run());

        breaker.trip(TripReason::Manual("test".to_string()));
        assert!(handle.trading_state().is_halted());
        handle.clear_halt();
        assert_eq!(handle.trading_state(), TradingState::Active);
        handle.shutdown().await;
    }
}
