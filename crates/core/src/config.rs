use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded once at startup and immutable during a
/// run cycle. Changing any of it requires a controlled restart of the
/// affected domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub markets: MarketFilterConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl AppConfig {
    /// Validates cross-field invariants that serde cannot express.
    ///
    /// # Errors
    /// Returns an error when scoring weights do not sum to 1 or any cap is
    /// outside (0, 1].
    pub fn validate(&self) -> Result<()> {
        self.scoring.weights.validate()?;
        for (name, value) in [
            ("capital.max_position_size", self.capital.max_position_size),
            ("capital.max_portfolio_risk", self.capital.max_portfolio_risk),
            ("capital.kelly_fraction", self.capital.kelly_fraction),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                bail!("{name} must be in (0, 1], got {value}");
            }
        }
        if self.capital.initial_balance <= Decimal::ZERO {
            bail!("capital.initial_balance must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Per-call budget for order entry; past it the call is treated as
    /// failed and retried per policy.
    pub order_timeout_ms: u64,
    pub max_attempts: u32,
    /// Venue request budget: at most this many requests per interval.
    pub requests_per_interval: u32,
    pub interval_ms: u64,
    /// How often the ingestion worker refreshes market snapshots.
    pub poll_interval_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: 5_000,
            max_attempts: 3,
            requests_per_interval: 10,
            interval_ms: 1_000,
            poll_interval_ms: 15_000,
        }
    }
}

/// Capital limits. Defaults mirror a small-bankroll account: 15% per
/// position, 60% deployed, quarter Kelly, $2 venue minimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    pub initial_balance: Decimal,
    pub max_position_size: Decimal,
    pub max_portfolio_risk: Decimal,
    pub kelly_fraction: Decimal,
    pub min_bet: Decimal,
    /// Cap on open notional per category bucket, as a fraction of capital.
    pub correlation_cap: Decimal,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(100),
            max_position_size: Decimal::new(15, 2),  // 0.15
            max_portfolio_risk: Decimal::new(60, 2), // 0.60
            kelly_fraction: Decimal::new(25, 2),     // 0.25
            min_bet: Decimal::from(2),
            correlation_cap: Decimal::new(30, 2), // 0.30
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Minimum probability edge before the sizer stakes anything.
    pub min_edge: Decimal,
    /// Spread (probability units) above which the risk factor bottoms out.
    pub max_spread: Decimal,
    pub rebalance_interval_secs: u64,
    /// Exit thresholds as unrealized-return fractions.
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_edge: Decimal::new(5, 2),   // 0.05
            max_spread: Decimal::new(10, 2), // 0.10
            rebalance_interval_secs: 60,
            stop_loss: -0.50,
            take_profit: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFilterConfig {
    /// Empty means all categories.
    pub categories: Vec<String>,
    /// Daily volume below this excludes the market outright.
    pub min_liquidity: Decimal,
    pub max_markets: usize,
}

impl Default for MarketFilterConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            min_liquidity: Decimal::from(500),
            max_markets: 20,
        }
    }
}

/// Factor weights for the composite score. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub liquidity: f64,
    pub edge: f64,
    pub timeframe: f64,
    pub volatility: f64,
    pub risk: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.25,
            edge: 0.35,
            timeframe: 0.20,
            volatility: 0.10,
            risk: 0.10,
        }
    }
}

impl ScoringWeights {
    /// # Errors
    /// Returns an error when the weights do not sum to 1 within tolerance.
    pub fn validate(&self) -> Result<()> {
        let sum = self.liquidity + self.edge + self.timeframe + self.volatility + self.risk;
        if (sum - 1.0).abs() > 1e-6 {
            bail!("scoring weights must sum to 1.0, got {sum}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Composite below this floor drops the market from ranking.
    pub score_floor: f64,
    /// Snapshot age past which confidence starts to decay.
    pub stale_after_secs: i64,
    /// Tradeable resolution band in days.
    pub tradeable_min_days: i64,
    pub tradeable_max_days: i64,
    /// Timeframe score at zero days to resolution.
    pub short_dated_score: f64,
    /// Half-life of the decay applied past the tradeable band.
    pub moonshot_half_life_days: f64,
    /// Long-dated markets never score below this (reduced but nonzero).
    pub moonshot_floor: f64,
    /// Realized stddev of recent price changes that scores 100 on the
    /// volatility factor.
    pub target_volatility: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            score_floor: 40.0,
            stale_after_secs: 600,
            tradeable_min_days: 7,
            tradeable_max_days: 30,
            short_dated_score: 20.0,
            moonshot_half_life_days: 45.0,
            moonshot_floor: 20.0,
            target_volatility: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionConfig {
    pub heartbeat_interval_ms: u64,
    /// Heartbeat age past which a worker is considered missed.
    pub heartbeat_timeout_ms: u64,
    /// How long a DEGRADED worker gets to recover before a forced restart.
    pub degraded_grace_ms: u64,
    pub backoff_base_ms: u64,
    /// Backoff ceiling; doubles up to this target recovery bound.
    pub backoff_cap_ms: u64,
    pub max_restarts: u32,
    /// Continuous RUNNING time after which the restart counter resets.
    pub sustained_running_ms: u64,
    /// Workers get this long to finish in-flight work on shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 500,
            heartbeat_timeout_ms: 2_000,
            degraded_grace_ms: 1_000,
            backoff_base_ms: 250,
            backoff_cap_ms: 5_000,
            max_restarts: 3,
            sustained_running_ms: 30_000,
            drain_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Realized drawdown over the rolling window that trips the breaker.
    pub max_drawdown: f64,
    pub drawdown_window_secs: i64,
    pub max_consecutive_failures: u32,
    /// Price feed silence past this trips the anomaly signal.
    pub feed_stale_after_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_drawdown: 0.10,
            drawdown_window_secs: 86_400,
            max_consecutive_failures: 5,
            feed_stale_after_secs: 120,
        }
    }
}
