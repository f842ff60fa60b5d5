//! Concrete domain workers.
//!
//! Each worker runs its loop as an independently scheduled tokio task and
//! reports liveness through a heartbeat the supervisor polls. Cross-domain
//! handoff is queue-based: the pipeline pushes approved proposals to the
//! execution worker, execution pushes fills to the capital worker, and only
//! the capital worker settles against the portfolio ledger.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use predmarket_core::{
    ExchangeClient, ExchangeConfig, FillEvent, MarketFilter, OrderProposal, Position,
    PositionStatus, Repository, SupervisionConfig, TradeAction, TradeLogEntry, TradingConfig,
    Worker,
};
use predmarket_execution::OrderExecutor;
use predmarket_risk::{CircuitBreaker, PositionSizer, RiskMonitor};
use predmarket_scoring::{MarketScorer, ReferenceStats};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Prices kept per market when building the volatility window.
const PRICE_WINDOW: usize = 32;

/// Heartbeat handle passed into a worker loop.
#[derive(Clone)]
struct Beat(Arc<AtomicI64>);

impl Beat {
    fn pulse(&self) {
        self.0.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }
}

/// Owns a worker's tokio task: stop signal, drain-bounded join, heartbeat.
struct WorkerTask {
    heartbeat_timeout_ms: i64,
    drain_timeout: Duration,
    last_beat: Arc<AtomicI64>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerTask {
    fn new(supervision: &SupervisionConfig) -> Self {
        Self {
            heartbeat_timeout_ms: supervision.heartbeat_timeout_ms as i64,
            drain_timeout: Duration::from_millis(supervision.drain_timeout_ms),
            last_beat: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
            stop_tx: None,
            handle: None,
        }
    }

    /// Spawns the loop body with a fresh stop channel and heartbeat.
    fn spawn<F, Fut>(&mut self, body: F)
    where
        F: FnOnce(Beat, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let beat = Beat(self.last_beat.clone());
        beat.pulse();
        self.stop_tx = Some(stop_tx);
        self.handle = Some(tokio::spawn(body(beat, stop_rx)));
    }

    /// Signals stop and waits out the drain timeout; a task that overruns
    /// it is aborted and the overrun surfaces as an error.
    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.drain_timeout, handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                abort.abort();
                Err(anyhow!("drain timeout exceeded, task aborted"))
            }
        }
    }

    fn health(&self) -> Result<()> {
        let alive = self.handle.as_ref().is_some_and(|h| !h.is_finished());
        if !alive {
            return Err(anyhow!("task not running"));
        }
        let age = Utc::now().timestamp_millis() - self.last_beat.load(Ordering::SeqCst);
        if age > self.heartbeat_timeout_ms {
            return Err(anyhow!("heartbeat {age}ms old"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Polls the venue for market snapshots and appends them to the
/// repository. Feeds the circuit breaker's feed-freshness signal.
pub struct IngestWorker {
    exchange: Arc<dyn ExchangeClient>,
    repo: Arc<dyn Repository>,
    breaker: Arc<CircuitBreaker>,
    filter: MarketFilter,
    poll_interval: Duration,
    idle_beat: Duration,
    task: WorkerTask,
}

impl IngestWorker {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        repo: Arc<dyn Repository>,
        breaker: Arc<CircuitBreaker>,
        filter: MarketFilter,
        exchange_config: &ExchangeConfig,
        supervision: &SupervisionConfig,
    ) -> Self {
        Self {
            exchange,
            repo,
            breaker,
            filter,
            poll_interval: Duration::from_millis(exchange_config.poll_interval_ms),
            idle_beat: Duration::from_millis(supervision.heartbeat_interval_ms),
            task: WorkerTask::new(supervision),
        }
    }
}

#[async_trait]
impl Worker for IngestWorker {
    fn name(&self) -> &str {
        "market-ingest"
    }

    async fn start(&mut self) -> Result<()> {
        let exchange = self.exchange.clone();
        let repo = self.repo.clone();
        let breaker = self.breaker.clone();
        let filter = self.filter.clone();
        let poll_interval = self.poll_interval;
        let idle_beat = self.idle_beat;

        self.task.spawn(move |beat, mut stop_rx| async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut idle = tokio::time::interval(idle_beat);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = idle.tick() => beat.pulse(),
                    _ = ticker.tick() => {
                        match exchange.list_markets(&filter).await {
                            Ok(snapshots) => {
                                breaker.record_feed_update(Utc::now());
                                for snapshot in snapshots {
                                    if let Err(e) = repo.append_snapshot(snapshot).await {
                                        tracing::warn!("snapshot append failed: {e:#}");
                                    }
                                }
                            }
                            Err(e) => {
                                // Transient listing failures cost one poll
                                // cycle; feed staleness trips the breaker.
                                tracing::warn!(%e, "market listing failed");
                            }
                        }
                        breaker.check_feed_freshness(Utc::now());
                        beat.pulse();
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.task.stop().await
    }

    async fn health_check(&self) -> Result<()> {
        self.task.health()
    }
}

// ---------------------------------------------------------------------------
// Decision pipeline
// ---------------------------------------------------------------------------

/// One rebalance cycle: load snapshots and portfolio, check exits, score,
/// size, review, and push approved proposals onto the execution queue.
pub struct PipelineWorker {
    deps: Arc<PipelineDeps>,
    rebalance_interval: Duration,
    idle_beat: Duration,
    task: WorkerTask,
}

struct PipelineDeps {
    repo: Arc<dyn Repository>,
    scorer: MarketScorer,
    sizer: PositionSizer,
    monitor: RiskMonitor,
    breaker: Arc<CircuitBreaker>,
    proposal_tx: mpsc::Sender<OrderProposal>,
}

impl PipelineWorker {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        scorer: MarketScorer,
        sizer: PositionSizer,
        monitor: RiskMonitor,
        breaker: Arc<CircuitBreaker>,
        proposal_tx: mpsc::Sender<OrderProposal>,
        trading: &TradingConfig,
        supervision: &SupervisionConfig,
    ) -> Self {
        Self {
            deps: Arc::new(PipelineDeps {
                repo,
                scorer,
                sizer,
                monitor,
                breaker,
                proposal_tx,
            }),
            rebalance_interval: Duration::from_secs(trading.rebalance_interval_secs),
            idle_beat: Duration::from_millis(supervision.heartbeat_interval_ms),
            task: WorkerTask::new(supervision),
        }
    }
}

impl PipelineDeps {
    /// A proposal approved earlier in the cycle reserves its notional so
    /// later reviews in the same cycle see the exposure it will add.
    fn reserve(portfolio: &mut predmarket_core::PortfolioState, proposal: &OrderProposal) {
        portfolio.positions.push(Position {
            market_id: proposal.market_id.clone(),
            category: proposal.category.clone(),
            side: proposal.side,
            entry_price: proposal.limit_price,
            contracts: proposal.contracts,
            notional: proposal.notional,
            opened_at: Utc::now(),
            stop_loss: 0.0,
            take_profit: 0.0,
            status: PositionStatus::Open,
            realized_pnl: None,
        });
    }

    async fn run_cycle(&self) -> Result<()> {
        let now = Utc::now();
        let snapshots = self.repo.latest_snapshots().await?;
        let mut portfolio = self.repo.portfolio().await?;
        self.breaker.record_equity(now, portfolio.capital);

        let prices: HashMap<String, Decimal> = snapshots
            .iter()
            .map(|s| (s.market_id.clone(), s.price))
            .collect();

        // Exit checks run every cycle, halted or not.
        let state = self.breaker.state();
        for mut exit in self.monitor.check_exits(&portfolio, &prices) {
            if self.monitor.review(&mut exit, &portfolio, &state).is_ok() {
                self.log(
                    TradeAction::ProposalApproved,
                    &exit.market_id,
                    format!("exit {} contracts", exit.contracts),
                )
                .await;
                if self.proposal_tx.send(exit).await.is_err() {
                    return Err(anyhow!("execution queue closed"));
                }
            }
        }

        let mut reference = ReferenceStats::with_standard_baselines();
        for snapshot in &snapshots {
            let history = self
                .repo
                .price_history(&snapshot.market_id, PRICE_WINDOW)
                .await?;
            if history.len() >= 2 {
                let changes: Vec<f64> = history
                    .windows(2)
                    .map(|w| (w[1] - w[0]).try_into().unwrap_or(0.0))
                    .collect();
                reference.set_price_window(snapshot.market_id.clone(), changes);
            }
        }

        let ranked = self.scorer.rank_markets(&snapshots, &reference, now);
        tracing::debug!(candidates = ranked.len(), "scoring cycle complete");

        for score in ranked {
            let Some(snapshot) = snapshots.iter().find(|s| s.market_id == score.market_id)
            else {
                continue;
            };
            let fair = reference.fair_estimate(snapshot);
            let Some(mut proposal) = self.sizer.propose(&score, snapshot, fair, &portfolio)
            else {
                continue;
            };

            let state = self.breaker.state();
            match self.monitor.review(&mut proposal, &portfolio, &state) {
                Ok(()) => {
                    Self::reserve(&mut portfolio, &proposal);
                    self.log(
                        TradeAction::ProposalApproved,
                        &proposal.market_id,
                        format!(
                            "{:?} {} @ {} (score {:.1}, confidence {:.2})",
                            proposal.side,
                            proposal.contracts,
                            proposal.limit_price,
                            proposal.rationale.score,
                            proposal.rationale.confidence,
                        ),
                    )
                    .await;
                    if self.proposal_tx.send(proposal).await.is_err() {
                        return Err(anyhow!("execution queue closed"));
                    }
                }
                Err(reason) => {
                    self.log(
                        TradeAction::ProposalVetoed,
                        &proposal.market_id,
                        reason.to_string(),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn log(&self, action: TradeAction, market_id: &str, detail: String) {
        if let Err(e) = self
            .repo
            .append_trade_log(TradeLogEntry::now(action, market_id, detail))
            .await
        {
            tracing::warn!("trade log append failed: {e:#}");
        }
    }
}

#[async_trait]
impl Worker for PipelineWorker {
    fn name(&self) -> &str {
        "decision-pipeline"
    }

    async fn start(&mut self) -> Result<()> {
        let deps = self.deps.clone();
        let rebalance_interval = self.rebalance_interval;
        let idle_beat = self.idle_beat;

        self.task.spawn(move |beat, mut stop_rx| async move {
            let mut cycle = tokio::time::interval(rebalance_interval);
            cycle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut idle = tokio::time::interval(idle_beat);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = idle.tick() => beat.pulse(),
                    _ = cycle.tick() => {
                        if let Err(e) = deps.run_cycle().await {
                            tracing::error!("pipeline cycle failed: {e:#}");
                        }
                        beat.pulse();
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.task.stop().await
    }

    async fn health_check(&self) -> Result<()> {
        self.task.health()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Drains the proposal queue through the order executor and forwards fills
/// to the capital domain. Execution failures feed the circuit breaker.
pub struct ExecutionWorker {
    executor: Arc<OrderExecutor>,
    repo: Arc<dyn Repository>,
    breaker: Arc<CircuitBreaker>,
    proposal_rx: Arc<Mutex<mpsc::Receiver<OrderProposal>>>,
    fill_tx: mpsc::Sender<FillEvent>,
    idle_beat: Duration,
    task: WorkerTask,
}

impl ExecutionWorker {
    #[must_use]
    pub fn new(
        executor: Arc<OrderExecutor>,
        repo: Arc<dyn Repository>,
        breaker: Arc<CircuitBreaker>,
        proposal_rx: Arc<Mutex<mpsc::Receiver<OrderProposal>>>,
        fill_tx: mpsc::Sender<FillEvent>,
        supervision: &SupervisionConfig,
    ) -> Self {
        Self {
            executor,
            repo,
            breaker,
            proposal_rx,
            fill_tx,
            idle_beat: Duration::from_millis(supervision.heartbeat_interval_ms),
            task: WorkerTask::new(supervision),
        }
    }
}

#[async_trait]
impl Worker for ExecutionWorker {
    fn name(&self) -> &str {
        "order-execution"
    }

    async fn start(&mut self) -> Result<()> {
        let executor = self.executor.clone();
        let repo = self.repo.clone();
        let breaker = self.breaker.clone();
        let proposal_rx = self.proposal_rx.clone();
        let fill_tx = self.fill_tx.clone();
        let idle_beat = self.idle_beat;

        self.task.spawn(move |beat, mut stop_rx| async move {
            let mut idle = tokio::time::interval(idle_beat);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = idle.tick() => beat.pulse(),
                    proposal = async {
                        proposal_rx.lock().await.recv().await
                    } => {
                        let Some(mut proposal) = proposal else {
                            tracing::info!("proposal queue closed, execution loop ending");
                            break;
                        };
                        let entry = TradeLogEntry::now(
                            TradeAction::OrderSubmitted,
                            proposal.market_id.clone(),
                            format!("{:?} {} @ {}", proposal.side, proposal.contracts, proposal.limit_price),
                        );
                        if let Err(e) = repo.append_trade_log(entry).await {
                            tracing::warn!("trade log append failed: {e:#}");
                        }

                        match executor.execute(&mut proposal).await {
                            Ok(Some(fill)) => {
                                breaker.record_execution_success();
                                if fill_tx.send(fill).await.is_err() {
                                    tracing::error!("fill queue closed, dropping settlement");
                                }
                            }
                            Ok(None) => {
                                let entry = TradeLogEntry::now(
                                    TradeAction::OrderRejected,
                                    proposal.market_id.clone(),
                                    "rejected by venue or duplicate".to_string(),
                                );
                                let _ = repo.append_trade_log(entry).await;
                            }
                            Err(e) => {
                                tracing::error!("execution failed: {e:#}");
                                breaker.record_execution_failure();
                                let entry = TradeLogEntry::now(
                                    TradeAction::OrderRejected,
                                    proposal.market_id.clone(),
                                    format!("{e:#}"),
                                );
                                let _ = repo.append_trade_log(entry).await;
                            }
                        }
                        beat.pulse();
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.task.stop().await
    }

    async fn health_check(&self) -> Result<()> {
        self.task.health()
    }
}

// ---------------------------------------------------------------------------
// Capital
// ---------------------------------------------------------------------------

/// Sole consumer of the fill queue and therefore the single writer of
/// portfolio state: commits fills (at-most-once per proposal) and records
/// settlements in the trade log.
pub struct CapitalWorker {
    repo: Arc<dyn Repository>,
    fill_rx: Arc<Mutex<mpsc::Receiver<FillEvent>>>,
    idle_beat: Duration,
    task: WorkerTask,
}

impl CapitalWorker {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        fill_rx: Arc<Mutex<mpsc::Receiver<FillEvent>>>,
        supervision: &SupervisionConfig,
    ) -> Self {
        Self {
            repo,
            fill_rx,
            idle_beat: Duration::from_millis(supervision.heartbeat_interval_ms),
            task: WorkerTask::new(supervision),
        }
    }
}

#[async_trait]
impl Worker for CapitalWorker {
    fn name(&self) -> &str {
        "capital-ledger"
    }

    async fn start(&mut self) -> Result<()> {
        let repo = self.repo.clone();
        let fill_rx = self.fill_rx.clone();
        let idle_beat = self.idle_beat;

        self.task.spawn(move |beat, mut stop_rx| async move {
            let mut idle = tokio::time::interval(idle_beat);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = idle.tick() => beat.pulse(),
                    fill = async {
                        fill_rx.lock().await.recv().await
                    } => {
                        let Some(fill) = fill else {
                            tracing::info!("fill queue closed, capital loop ending");
                            break;
                        };
                        match repo
                            .commit_fill(&fill.proposal, fill.fill_price, fill.fill_qty)
                            .await
                        {
                            Ok(Some(position)) => {
                                let action = if fill.proposal.is_exit {
                                    TradeAction::PositionClosed
                                } else {
                                    TradeAction::OrderFilled
                                };
                                let entry = TradeLogEntry::now(
                                    action,
                                    position.market_id.clone(),
                                    format!(
                                        "{} contracts @ {}",
                                        fill.fill_qty, fill.fill_price
                                    ),
                                );
                                let _ = repo.append_trade_log(entry).await;
                            }
                            Ok(None) => {
                                tracing::warn!(
                                    proposal_id = %fill.proposal.id,
                                    "duplicate fill ignored by ledger"
                                );
                            }
                            Err(e) => {
                                tracing::error!("fill settlement failed: {e:#}");
                            }
                        }
                        beat.pulse();
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.task.stop().await
    }

    async fn health_check(&self) -> Result<()> {
        self.task.health()
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

/// Periodic portfolio and health summary through structured logging.
pub struct ObservabilityWorker {
    repo: Arc<dyn Repository>,
    breaker: Arc<CircuitBreaker>,
    report_interval: Duration,
    idle_beat: Duration,
    task: WorkerTask,
}

impl ObservabilityWorker {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        breaker: Arc<CircuitBreaker>,
        report_interval: Duration,
        supervision: &SupervisionConfig,
    ) -> Self {
        Self {
            repo,
            breaker,
            report_interval,
            idle_beat: Duration::from_millis(supervision.heartbeat_interval_ms),
            task: WorkerTask::new(supervision),
        }
    }
}

#[async_trait]
impl Worker for ObservabilityWorker {
    fn name(&self) -> &str {
        "observability"
    }

    async fn start(&mut self) -> Result<()> {
        let repo = self.repo.clone();
        let breaker = self.breaker.clone();
        let report_interval = self.report_interval;
        let idle_beat = self.idle_beat;

        self.task.spawn(move |beat, mut stop_rx| async move {
            let mut report = tokio::time::interval(report_interval);
            let mut idle = tokio::time::interval(idle_beat);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = idle.tick() => beat.pulse(),
                    _ = report.tick() => {
                        match repo.portfolio().await {
                            Ok(portfolio) => {
                                tracing::info!(
                                    capital = %portfolio.capital,
                                    cash = %portfolio.cash_available,
                                    exposure = %portfolio.exposure_notional(),
                                    open_positions = portfolio.open_positions().count(),
                                    realized_pnl = %portfolio.realized_pnl,
                                    win_rate = portfolio.win_rate(),
                                    halted = breaker.is_halted(),
                                    "portfolio summary"
                                );
                            }
                            Err(e) => tracing::warn!("portfolio read failed: {e:#}"),
                        }
                        beat.pulse();
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.task.stop().await
    }

    async fn health_check(&self) -> Result<()> {
        self.task.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use predmarket_core::{
        BreakerConfig, CapitalConfig, MarketFilterConfig, MarketSnapshot, ProposalStatus,
        ScoringConfig,
    };
    use predmarket_data::MemoryRepository;
    use predmarket_execution::PaperExchangeClient;
    use predmarket_risk::TripReason;
    use rust_decimal_macros::dec;

    fn snapshot(id: &str, price: Decimal, volume: Decimal) -> MarketSnapshot {
        let now = Utc::now();
        MarketSnapshot {
            market_id: id.to_string(),
            category: "economics".to_string(),
            price,
            yes_bid: price - dec!(0.01),
            yes_ask: price + dec!(0.01),
            volume_24h: volume,
            open_interest: dec!(9000),
            close_time: now + chrono::Duration::days(14),
            timestamp: now,
        }
    }

    fn pipeline_deps(
        repo: Arc<dyn Repository>,
        breaker: Arc<CircuitBreaker>,
        proposal_tx: mpsc::Sender<OrderProposal>,
    ) -> PipelineDeps {
        let trading = TradingConfig::default();
        PipelineDeps {
            repo,
            scorer: MarketScorer::new(
                ScoringConfig::default(),
                MarketFilterConfig::default(),
                trading.clone(),
            ),
            sizer: PositionSizer::new(CapitalConfig::default(), trading.min_edge),
            monitor: RiskMonitor::new(CapitalConfig::default()),
            breaker,
            proposal_tx,
        }
    }

    async fn seed_history(repo: &MemoryRepository, id: &str, prices: &[Decimal]) {
        for price in prices {
            repo.append_snapshot(snapshot(id, *price, dec!(4000)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn cycle_produces_approved_proposals() {
        let repo = Arc::new(MemoryRepository::new(dec!(1000), -0.5, 0.5));
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let (proposal_tx, mut proposal_rx) = mpsc::channel(16);

        // Deeply underpriced market: the contrarian fair estimate gives the
        // sizer an edge to act on.
        seed_history(&repo, "CHEAP", &[dec!(0.06), dec!(0.05), dec!(0.04)]).await;
        let deps = pipeline_deps(repo.clone(), breaker, proposal_tx);
        deps.run_cycle().await.unwrap();

        let proposal = proposal_rx.try_recv().expect("one approved proposal");
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert_eq!(proposal.market_id, "CHEAP");
        assert!(!repo.recent_trades(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn halted_cycle_approves_nothing_new() {
        let repo = Arc::new(MemoryRepository::new(dec!(1000), -0.5, 0.5));
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        breaker.trip(TripReason::Manual("test halt".to_string()));
        let (proposal_tx, mut proposal_rx) = mpsc::channel(16);

        seed_history(&repo, "CHEAP", &[dec!(0.06), dec!(0.05), dec!(0.04)]).await;
        let deps = pipeline_deps(repo.clone(), breaker, proposal_tx);
        deps.run_cycle().await.unwrap();

        assert!(proposal_rx.try_recv().is_err());
        let trades = repo.recent_trades(10).await.unwrap();
        assert!(trades
            .iter()
            .any(|t| t.action == TradeAction::ProposalVetoed));
    }

    #[tokio::test]
    async fn same_cycle_correlated_proposals_respect_cap() {
        // Both candidates clear the sizer individually; the reservation of
        // the first approval forces the category cap to veto the second,
        // whichever order they rank in.
        let repo = Arc::new(MemoryRepository::new(dec!(10000), -0.5, 0.5));
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let (proposal_tx, mut proposal_rx) = mpsc::channel(16);

        seed_history(&repo, "A", &[dec!(0.06), dec!(0.05), dec!(0.04)]).await;
        seed_history(&repo, "B", &[dec!(0.07), dec!(0.06), dec!(0.05)]).await;

        let mut capital = CapitalConfig::default();
        // A correlation cap one approval exhausts (0.5% of 10k = $50).
        capital.correlation_cap = dec!(0.005);
        let trading = TradingConfig::default();
        let deps = PipelineDeps {
            repo: repo.clone(),
            scorer: MarketScorer::new(
                ScoringConfig::default(),
                MarketFilterConfig::default(),
                trading.clone(),
            ),
            sizer: PositionSizer::new(capital.clone(), trading.min_edge),
            monitor: RiskMonitor::new(capital),
            breaker,
            proposal_tx,
        };
        deps.run_cycle().await.unwrap();

        let mut approved = Vec::new();
        while let Ok(p) = proposal_rx.try_recv() {
            approved.push(p);
        }
        let trades = repo.recent_trades(20).await.unwrap();
        let vetoed = trades
            .iter()
            .filter(|t| t.action == TradeAction::ProposalVetoed)
            .count();
        assert_eq!(approved.len(), 1);
        assert!(vetoed >= 1);
    }

    #[tokio::test]
    async fn execution_worker_end_to_end_settlement() {
        let repo = Arc::new(MemoryRepository::new(dec!(1000), -0.5, 0.5));
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let venue = Arc::new(PaperExchangeClient::new(0));
        venue.seed_market(snapshot("M1", dec!(0.40), dec!(4000)));

        let supervision = SupervisionConfig::default();
        let (proposal_tx, proposal_rx) = mpsc::channel(16);
        let (fill_tx, fill_rx) = mpsc::channel(16);
        let executor = Arc::new(OrderExecutor::new(venue, &ExchangeConfig::default()));

        let mut execution = ExecutionWorker::new(
            executor,
            repo.clone(),
            breaker,
            Arc::new(Mutex::new(proposal_rx)),
            fill_tx,
            &supervision,
        );
        let mut capital = CapitalWorker::new(
            repo.clone(),
            Arc::new(Mutex::new(fill_rx)),
            &supervision,
        );
        execution.start().await.unwrap();
        capital.start().await.unwrap();

        let mut proposal = OrderProposal::new(
            "M1".to_string(),
            "economics".to_string(),
            predmarket_core::Side::Yes,
            10,
            dec!(0.41),
            dec!(4.10),
            predmarket_core::SizingRationale {
                score: 70.0,
                confidence: 0.8,
                kelly_fraction: dec!(0.05),
            },
        );
        proposal.advance(ProposalStatus::Approved).unwrap();
        proposal_tx.send(proposal).await.unwrap();

        // Wait for the fill to settle through the capital worker.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let portfolio = repo.portfolio().await.unwrap();
                if !portfolio.positions.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("fill settled");

        let portfolio = repo.portfolio().await.unwrap();
        assert_eq!(portfolio.positions.len(), 1);
        assert!(portfolio.cash_available < dec!(1000));

        execution.stop().await.unwrap();
        capital.stop().await.unwrap();
    }

    #[tokio::test]
    async fn ingest_worker_populates_repository() {
        let repo = Arc::new(MemoryRepository::new(dec!(1000), -0.5, 0.5));
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let venue = Arc::new(PaperExchangeClient::new(0));
        venue.seed_market(snapshot("M1", dec!(0.40), dec!(4000)));

        let mut exchange_config = ExchangeConfig::default();
        exchange_config.poll_interval_ms = 10;
        let mut ingest = IngestWorker::new(
            venue,
            repo.clone(),
            breaker,
            MarketFilter {
                categories: Vec::new(),
                min_volume: dec!(500),
                max_markets: 10,
            },
            &exchange_config,
            &SupervisionConfig::default(),
        );
        ingest.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !repo.latest_snapshots().await.unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("snapshot ingested");

        assert!(ingest.health_check().await.is_ok());
        ingest.stop().await.unwrap();
        assert!(ingest.health_check().await.is_err());
    }
}
