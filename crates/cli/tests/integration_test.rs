use chrono::{Duration, Utc};
use predmarket_core::{
    AppConfig, MarketFilter, MarketSnapshot, Repository, SupervisionConfig,
};
use predmarket_data::MemoryRepository;
use predmarket_execution::{OrderExecutor, PaperExchangeClient};
use predmarket_risk::{CircuitBreaker, PositionSizer, RiskMonitor, TripReason};
use predmarket_scoring::MarketScorer;
use predmarket_supervisor::{
    CapitalWorker, Criticality, ExecutionWorker, IngestWorker, Orchestrator, PipelineWorker,
    WorkerFactory,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, Mutex};

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.capital.initial_balance = dec!(1000);
    config.trading.rebalance_interval_secs = 1;
    config.exchange.poll_interval_ms = 50;
    config.supervision = SupervisionConfig {
        heartbeat_interval_ms: 20,
        heartbeat_timeout_ms: 200,
        degraded_grace_ms: 50,
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        max_restarts: 3,
        sustained_running_ms: 10_000,
        drain_timeout_ms: 500,
    };
    config
}

fn underpriced_market() -> MarketSnapshot {
    let now = Utc::now();
    MarketSnapshot {
        market_id: "RATE-CUT".to_string(),
        category: "economics".to_string(),
        price: dec!(0.04),
        yes_bid: dec!(0.03),
        yes_ask: dec!(0.05),
        volume_24h: dec!(4000),
        open_interest: dec!(9000),
        close_time: now + Duration::days(20),
        timestamp: now,
    }
}

struct Engine {
    repo: Arc<dyn Repository>,
    breaker: Arc<CircuitBreaker>,
    handle: predmarket_supervisor::OrchestratorHandle,
}

/// Wires ingestion, pipeline, execution, and capital domains against the
/// paper venue, the way the run command does.
async fn start_engine(config: AppConfig, venue: Arc<PaperExchangeClient>) -> Engine {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new(
        config.capital.initial_balance,
        config.trading.stop_loss,
        config.trading.take_profit,
    ));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));

    let (proposal_tx, proposal_rx) = mpsc::channel(64);
    let (fill_tx, fill_rx) = mpsc::channel(64);
    let proposal_rx = Arc::new(Mutex::new(proposal_rx));
    let fill_rx = Arc::new(Mutex::new(fill_rx));
    let executor = Arc::new(OrderExecutor::new(venue.clone(), &config.exchange));

    let mut orchestrator = Orchestrator::new(config.supervision.clone(), breaker.clone());

    let ingest: WorkerFactory = {
        let venue = venue.clone();
        let repo = repo.clone();
        let breaker = breaker.clone();
        let config = config.clone();
        Box::new(move || {
            vec![Box::new(IngestWorker::new(
                venue.clone(),
                repo.clone(),
                breaker.clone(),
                MarketFilter {
                    categories: config.markets.categories.clone(),
                    min_volume: config.markets.min_liquidity,
                    max_markets: config.markets.max_markets,
                },
                &config.exchange,
                &config.supervision,
            ))]
        })
    };
    orchestrator
        .add_domain("ingestion", Criticality::Restartable, ingest)
        .await;

    let pipeline: WorkerFactory = {
        let repo = repo.clone();
        let breaker = breaker.clone();
        let proposal_tx = proposal_tx.clone();
        let config = config.clone();
        Box::new(move || {
            vec![Box::new(PipelineWorker::new(
                repo.clone(),
                MarketScorer::new(
                    config.scoring.clone(),
                    config.markets.clone(),
                    config.trading.clone(),
                ),
                PositionSizer::new(config.capital.clone(), config.trading.min_edge),
                RiskMonitor::new(config.capital.clone()),
                breaker.clone(),
                proposal_tx.clone(),
                &config.trading,
                &config.supervision,
            ))]
        })
    };
    orchestrator
        .add_domain("pipeline", Criticality::Restartable, pipeline)
        .await;

    let execution: WorkerFactory = {
        let executor = executor.clone();
        let repo = repo.clone();
        let breaker = breaker.clone();
        let proposal_rx = proposal_rx.clone();
        let fill_tx = fill_tx.clone();
        let supervision = config.supervision.clone();
        Box::new(move || {
            vec![Box::new(ExecutionWorker::new(
                executor.clone(),
                repo.clone(),
                breaker.clone(),
                proposal_rx.clone(),
                fill_tx.clone(),
                &supervision,
            ))]
        })
    };
    orchestrator
        .add_domain("execution", Criticality::Critical, execution)
        .await;

    let capital: WorkerFactory = {
        let repo = repo.clone();
        let fill_rx = fill_rx.clone();
        let supervision = config.supervision.clone();
        Box::new(move || {
            vec![Box::new(CapitalWorker::new(
                repo.clone(),
                fill_rx.clone(),
                &supervision,
            ))]
        })
    };
    orchestrator
        .add_domain("capital", Criticality::Critical, capital)
        .await;

    let handle = orchestrator.handle();
    tokio::spawn(orchestrator.run());

    Engine {
        repo,
        breaker,
        handle,
    }
}

#[tokio::test]
async fn engine_opens_a_position_end_to_end() {
    let venue = Arc::new(PaperExchangeClient::new(0));
    venue.seed_market(underpriced_market());

    let engine = start_engine(fast_config(), venue).await;

    // Ingestion -> scoring -> sizing -> review -> execution -> settlement.
    tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            let portfolio = engine.repo.portfolio().await.unwrap();
            if portfolio.open_positions().count() > 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
    })
    .await
    .expect("a position opened within the bound");

    let portfolio = engine.repo.portfolio().await.unwrap();
    let position = portfolio.open_positions().next().unwrap();
    assert_eq!(position.market_id, "RATE-CUT");
    assert!(portfolio.cash_available < dec!(1000));
    // Both capital invariants hold on the live book.
    assert!(position.notional <= dec!(0.15) * portfolio.capital);
    assert!(portfolio.exposure() <= dec!(0.60));

    let trades = engine.repo.recent_trades(50).await.unwrap();
    assert!(!trades.is_empty());

    let health = engine.handle.health().await;
    assert!(health.domains.len() == 4);

    engine.handle.shutdown().await;
}

#[tokio::test]
async fn halted_engine_stops_proposing() {
    let venue = Arc::new(PaperExchangeClient::new(0));
    venue.seed_market(underpriced_market());

    let engine = start_engine(fast_config(), venue).await;
    engine
        .breaker
        .trip(TripReason::Manual("operator halt".to_string()));

    // Give the engine several full rebalance cycles while halted.
    tokio::time::sleep(StdDuration::from_secs(3)).await;

    let portfolio = engine.repo.portfolio().await.unwrap();
    assert_eq!(portfolio.open_positions().count(), 0);
    assert_eq!(portfolio.cash_available, dec!(1000));

    let health = engine.handle.health().await;
    assert!(health.trading_state.is_halted());
    assert!(!health.healthy);

    engine.handle.shutdown().await;
}

#[tokio::test]
async fn cleared_halt_resumes_trading() {
    let venue = Arc::new(PaperExchangeClient::new(0));
    venue.seed_market(underpriced_market());

    let engine = start_engine(fast_config(), venue).await;
    engine
        .breaker
        .trip(TripReason::Manual("operator halt".to_string()));
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(
        engine.repo.portfolio().await.unwrap().open_positions().count(),
        0
    );

    engine.handle.clear_halt();

    tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            let portfolio = engine.repo.portfolio().await.unwrap();
            if portfolio.open_positions().count() > 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
    })
    .await
    .expect("trading resumed after clearance");

    engine.handle.shutdown().await;
}

#[tokio::test]
async fn duplicate_markets_are_not_stacked() {
    // Over repeated cycles the engine must hold at most one position per
    // market: later proposals for the same market are vetoed.
    let venue = Arc::new(PaperExchangeClient::new(0));
    venue.seed_market(underpriced_market());

    let engine = start_engine(fast_config(), venue).await;

    tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            if engine.repo.portfolio().await.unwrap().open_positions().count() > 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
    })
    .await
    .expect("first position opened");

    // Two more rebalance cycles.
    tokio::time::sleep(StdDuration::from_secs(2)).await;

    let portfolio = engine.repo.portfolio().await.unwrap();
    assert_eq!(
        portfolio
            .open_positions()
            .filter(|p| p.market_id == "RATE-CUT")
            .count(),
        1
    );

    engine.handle.shutdown().await;
}
