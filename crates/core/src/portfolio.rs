use crate::proposal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
    Expired,
}

/// An open or settled holding in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub category: String,
    pub side: Side,
    /// Cost per contract paid for the chosen side.
    pub entry_price: Decimal,
    pub contracts: u64,
    pub notional: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Exit thresholds as unrealized return fractions (e.g. -0.5 / 0.5).
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: PositionStatus,
    /// Set once when the position settles (exit fill or market resolution).
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    /// Cost per contract this side trades at given the current YES price.
    #[must_use]
    pub fn side_price(&self, yes_price: Decimal) -> Decimal {
        self.side.cost(yes_price)
    }

    /// Mark-to-market profit against the current YES quote.
    #[must_use]
    pub fn unrealized_pnl(&self, yes_price: Decimal) -> Decimal {
        (self.side_price(yes_price) - self.entry_price) * Decimal::from(self.contracts)
    }

    /// Unrealized return as a fraction of cost basis, 0 when the basis is 0.
    #[must_use]
    pub fn unrealized_return(&self, yes_price: Decimal) -> f64 {
        if self.notional.is_zero() {
            return 0.0;
        }
        let pnl: f64 = self.unrealized_pnl(yes_price).try_into().unwrap_or(0.0);
        let basis: f64 = self.notional.try_into().unwrap_or(1.0);
        pnl / basis
    }
}

/// Aggregate portfolio view. Mutated only by the single-writer ledger in the
/// repository; everything else reads cloned snapshots of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub capital: Decimal,
    pub cash_available: Decimal,
    pub positions: Vec<Position>,
    pub realized_pnl: Decimal,
}

impl PortfolioState {
    #[must_use]
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            capital: initial_balance,
            cash_available: initial_balance,
            positions: Vec::new(),
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
    }

    /// Sum of open position notional.
    #[must_use]
    pub fn exposure_notional(&self) -> Decimal {
        self.open_positions().map(|p| p.notional).sum()
    }

    /// Open notional as a fraction of capital; 0 for an empty book.
    #[must_use]
    pub fn exposure(&self) -> Decimal {
        if self.capital.is_zero() {
            return Decimal::ZERO;
        }
        self.exposure_notional() / self.capital
    }

    /// Open notional held in one category bucket.
    #[must_use]
    pub fn category_notional(&self, category: &str) -> Decimal {
        self.open_positions()
            .filter(|p| p.category == category)
            .map(|p| p.notional)
            .sum()
    }

    #[must_use]
    pub fn open_position(&self, market_id: &str) -> Option<&Position> {
        self.open_positions().find(|p| p.market_id == market_id)
    }

    /// Fraction of settled positions that realized a profit.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        let settled: Vec<_> = self
            .positions
            .iter()
            .filter(|p| p.status != PositionStatus::Open)
            .collect();
        if settled.is_empty() {
            return 0.0;
        }
        let won = settled
            .iter()
            .filter(|p| p.realized_pnl.is_some_and(|pnl| pnl > Decimal::ZERO))
            .count();
        won as f64 / settled.len() as f64
    }
}
