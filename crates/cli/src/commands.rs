use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use predmarket_core::{
    AppConfig, ConfigLoader, MarketFilter, MarketSnapshot, Repository,
};
use predmarket_data::MemoryRepository;
use predmarket_execution::{OrderExecutor, PaperExchangeClient};
use predmarket_risk::{CircuitBreaker, PositionSizer, RiskMonitor};
use predmarket_scoring::{MarketScorer, ReferenceStats};
use predmarket_supervisor::{
    CapitalWorker, Criticality, ExecutionWorker, IngestWorker, ObservabilityWorker, Orchestrator,
    PipelineWorker, WorkerFactory,
};
use predmarket_web_api::ApiServer;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, Mutex};

/// Demo market set for the paper venue, in the spirit of the venue's
/// public categories.
fn demo_markets() -> Vec<MarketSnapshot> {
    let now = Utc::now();
    let market = |id: &str, category: &str, price: Decimal, volume: Decimal, days: i64| {
        MarketSnapshot {
            market_id: id.to_string(),
            category: category.to_string(),
            price,
            yes_bid: (price - dec!(0.01)).max(Decimal::ZERO),
            yes_ask: (price + dec!(0.01)).min(Decimal::ONE),
            volume_24h: volume,
            open_interest: volume * dec!(3),
            close_time: now + Duration::days(days),
            timestamp: now,
        }
    };
    vec![
        market("NFL-CHAMPIONSHIP", "sports", dec!(0.65), dec!(15000), 10),
        market("GDP-Q3-ABOVE-3PCT", "economics", dec!(0.42), dec!(3000), 25),
        market("RATE-CUT-DECEMBER", "economics", dec!(0.12), dec!(8000), 40),
        market("ELECTION-TURNOUT-60", "politics", dec!(0.30), dec!(6000), 90),
        market("HEATWAVE-AUGUST", "weather", dec!(0.85), dec!(700), 5),
    ]
}

fn market_filter(config: &AppConfig) -> MarketFilter {
    MarketFilter {
        categories: config.markets.categories.clone(),
        min_volume: config.markets.min_liquidity,
        max_markets: config.markets.max_markets,
    }
}

/// Wires the full supervised engine: paper venue, repository, decision
/// pipeline, execution, capital settlement, observability, and the status
/// API. Runs until ctrl-c, then shuts down cooperatively.
pub async fn run(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path).context("loading configuration")?;
    tracing::info!(
        initial_balance = %config.capital.initial_balance,
        max_position_size = %config.capital.max_position_size,
        max_portfolio_risk = %config.capital.max_portfolio_risk,
        "starting predmarket engine (paper venue)"
    );

    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new(
        config.capital.initial_balance,
        config.trading.stop_loss,
        config.trading.take_profit,
    ));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));

    let venue = Arc::new(PaperExchangeClient::new(10));
    for snapshot in demo_markets() {
        venue.seed_market(snapshot);
    }

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
        let filter = market_filter(&config);
        let exchange_config = config.exchange.clone();
        let supervision = config.supervision.clone();
        Box::new(move || {
            vec![Box::new(IngestWorker::new(
                venue.clone(),
                repo.clone(),
                breaker.clone(),
                filter.clone(),
                &exchange_config,
                &supervision,
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

    let observability: WorkerFactory = {
        let repo = repo.clone();
        let breaker = breaker.clone();
        let supervision = config.supervision.clone();
        Box::new(move || {
            vec![Box::new(ObservabilityWorker::new(
                repo.clone(),
                breaker.clone(),
                StdDuration::from_secs(30),
                &supervision,
            ))]
        })
    };
    orchestrator
        .add_domain("observability", Criticality::Passive, observability)
        .await;

    let handle = orchestrator.handle();
    tokio::spawn(orchestrator.run());

    let server = ApiServer::new(handle.clone(), repo.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tokio::spawn(async move {
        if let Err(e) = server.serve(&addr).await {
            tracing::error!("status API failed: {e:#}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    handle.shutdown().await;
    Ok(())
}

/// One-shot scoring pass over the demo market set.
pub async fn score(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path).context("loading configuration")?;
    let scorer = MarketScorer::new(
        config.scoring.clone(),
        config.markets.clone(),
        config.trading.clone(),
    );
    let reference = ReferenceStats::with_standard_baselines();
    let snapshots = demo_markets();
    let ranked = scorer.rank_markets(&snapshots, &reference, Utc::now());

    println!("{:<24} {:>9} {:>11} {:>7}", "MARKET", "COMPOSITE", "CONFIDENCE", "PRICE");
    for score in &ranked {
        let price = snapshots
            .iter()
            .find(|s| s.market_id == score.market_id)
            .map(|s| s.price)
            .unwrap_or_default();
        println!(
            "{:<24} {:>9.1} {:>11.2} {:>7}",
            score.market_id, score.composite, score.confidence, price
        );
    }
    println!("\n{} of {} markets ranked", ranked.len(), snapshots.len());
    Ok(())
}
