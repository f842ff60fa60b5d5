use crate::error::ExchangeError;
use crate::events::{OrderResult, TradeLogEntry};
use crate::market::MarketSnapshot;
use crate::portfolio::{PortfolioState, Position};
use crate::proposal::OrderProposal;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filter passed to the venue when listing markets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFilter {
    /// Empty means all categories.
    pub categories: Vec<String>,
    pub min_volume: Decimal,
    pub max_markets: usize,
}

/// Durable store for snapshots, portfolio state, and the trade log.
/// The implementation owns the single-writer portfolio ledger; all calls
/// are synchronous from the caller's perspective.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn append_snapshot(&self, snapshot: MarketSnapshot) -> Result<()>;

    async fn latest_snapshot(&self, market_id: &str) -> Result<Option<MarketSnapshot>>;

    /// Latest snapshot per known market.
    async fn latest_snapshots(&self) -> Result<Vec<MarketSnapshot>>;

    /// Recent prices for a market, oldest first, bounded by `limit`.
    async fn price_history(&self, market_id: &str, limit: usize) -> Result<Vec<Decimal>>;

    /// Consistent point-in-time copy of the portfolio.
    async fn portfolio(&self) -> Result<PortfolioState>;

    /// Settles a fill against the portfolio. At-most-once per proposal:
    /// a proposal id that already settled returns `Ok(None)` and changes
    /// nothing.
    async fn commit_fill(
        &self,
        proposal: &OrderProposal,
        fill_price: Decimal,
        fill_qty: u64,
    ) -> Result<Option<Position>>;

    /// Settles an open position when its market resolves.
    async fn resolve_position(&self, market_id: &str, yes_won: bool) -> Result<Option<Position>>;

    async fn append_trade_log(&self, entry: TradeLogEntry) -> Result<()>;

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>>;
}

/// Acknowledgement for a cancellation request. A cancel racing a fill is
/// not an error: the fill is authoritative and the cancel reports
/// `AlreadyFilled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    Cancelled,
    AlreadyFilled,
}

/// Rate-limited accessor for market quotes and order entry. Implemented
/// outside this workspace for real venues; the paper client stands in for
/// tests and paper runs.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn list_markets(
        &self,
        filter: &MarketFilter,
    ) -> std::result::Result<Vec<MarketSnapshot>, ExchangeError>;

    async fn submit_order(
        &self,
        proposal: &OrderProposal,
    ) -> std::result::Result<OrderResult, ExchangeError>;

    async fn cancel_order(&self, proposal_id: Uuid)
        -> std::result::Result<CancelAck, ExchangeError>;
}

/// A unit of executable work owned by a supervisor. `start` brings the
/// worker's task up, `stop` asks it to finish in-flight work and exit, and
/// `health_check` reports liveness for the supervision loop.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Ok when the worker's task is alive and heartbeating within its
    /// deadline; Err carries the failure context.
    async fn health_check(&self) -> Result<()>;
}
