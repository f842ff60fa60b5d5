use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures talking to the trading venue, classified so callers can decide
/// between retry (transient) and surfacing (permanent).
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("exchange request timed out after {0}ms")]
    Timeout(u64),
    #[error("rate limited by venue")]
    RateLimited,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("order rejected by venue: {0}")]
    Rejected(String),
    #[error("unknown order: {0}")]
    UnknownOrder(String),
}

impl ExchangeError {
    /// Transient failures are retried with backoff up to the configured
    /// attempt bound; everything else is surfaced immediately.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited | Self::Transport(_)
        )
    }
}

/// Reason codes recorded on vetoed proposals.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VetoReason {
    #[error("position notional would exceed the per-position cap")]
    PositionLimitExceeded,
    #[error("aggregate exposure would exceed the portfolio cap")]
    ExposureLimitExceeded,
    #[error("correlated exposure cap reached for category {category}")]
    CorrelatedExposure { category: String },
    #[error("already holding a position in market {market_id}")]
    DuplicateMarket { market_id: String },
    #[error("trading halted: {reason}")]
    TradingHalted { reason: String },
}

/// A proposal status may only move forward through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid proposal transition {from} -> {to}")]
pub struct ProposalError {
    pub from: &'static str,
    pub to: &'static str,
}

/// Data-validation failures on an incoming market snapshot.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("{market_id}: {field} {value} outside [0, 1]")]
    PriceOutOfRange {
        market_id: String,
        field: &'static str,
        value: Decimal,
    },
    #[error("{market_id}: bid above ask")]
    InvertedQuote { market_id: String },
    #[error("{market_id}: negative volume or open interest")]
    NegativeQuantity { market_id: String },
    #[error("{market_id}: snapshot is {age_secs}s old")]
    Stale { market_id: String, age_secs: i64 },
}
