use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use predmarket_core::{
    MarketSnapshot, OrderProposal, PortfolioState, Position, PositionStatus, Repository,
    TradeLogEntry,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Bounded trade-log retention.
const MAX_LOG_ENTRIES: usize = 100;
/// Prices kept per market for the volatility window.
const MAX_PRICE_HISTORY: usize = 64;

/// Everything behind one lock so a settlement commits atomically: cash
/// debit, position mutation, and the settled-proposal marker move together.
struct Ledger {
    snapshots: HashMap<String, MarketSnapshot>,
    price_history: HashMap<String, VecDeque<Decimal>>,
    portfolio: PortfolioState,
    /// Proposal ids already settled; the at-most-once guard for fills.
    settled: HashSet<Uuid>,
    trade_log: VecDeque<TradeLogEntry>,
}

/// In-memory `Repository`. The single RwLock makes the portfolio a
/// single-writer aggregate: concurrent readers get consistent clones,
/// writers serialize.
pub struct MemoryRepository {
    ledger: RwLock<Ledger>,
    stop_loss: f64,
    take_profit: f64,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(initial_balance: Decimal, stop_loss: f64, take_profit: f64) -> Self {
        Self {
            ledger: RwLock::new(Ledger {
                snapshots: HashMap::new(),
                price_history: HashMap::new(),
                portfolio: PortfolioState::new(initial_balance),
                settled: HashSet::new(),
                trade_log: VecDeque::new(),
            }),
            stop_loss,
            take_profit,
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn append_snapshot(&self, snapshot: MarketSnapshot) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let history = ledger
            .price_history
            .entry(snapshot.market_id.clone())
            .or_default();
        history.push_back(snapshot.price);
        while history.len() > MAX_PRICE_HISTORY {
            history.pop_front();
        }
        ledger
            .snapshots
            .insert(snapshot.market_id.clone(), snapshot);
        Ok(())
    }

    async fn latest_snapshot(&self, market_id: &str) -> Result<Option<MarketSnapshot>> {
        Ok(self.ledger.read().await.snapshots.get(market_id).cloned())
    }

    async fn latest_snapshots(&self) -> Result<Vec<MarketSnapshot>> {
        Ok(self.ledger.read().await.snapshots.values().cloned().collect())
    }

    async fn price_history(&self, market_id: &str, limit: usize) -> Result<Vec<Decimal>> {
        let ledger = self.ledger.read().await;
        let Some(history) = ledger.price_history.get(market_id) else {
            return Ok(Vec::new());
        };
        let skip = history.len().saturating_sub(limit);
        Ok(history.iter().skip(skip).copied().collect())
    }

    async fn portfolio(&self) -> Result<PortfolioState> {
        Ok(self.ledger.read().await.portfolio.clone())
    }

    async fn commit_fill(
        &self,
        proposal: &OrderProposal,
        fill_price: Decimal,
        fill_qty: u64,
    ) -> Result<Option<Position>> {
        let mut ledger = self.ledger.write().await;
        if !ledger.settled.insert(proposal.id) {
            tracing::warn!(
                proposal_id = %proposal.id,
                "fill already settled, commit ignored"
            );
            return Ok(None);
        }

        let notional = fill_price * Decimal::from(fill_qty);

        if proposal.is_exit {
            let Some(position) = ledger
                .portfolio
                .positions
                .iter_mut()
                .find(|p| p.market_id == proposal.market_id && p.status == PositionStatus::Open)
            else {
                tracing::warn!(
                    market_id = %proposal.market_id,
                    "exit fill for a market with no open position"
                );
                return Ok(None);
            };

            let pnl = (fill_price - position.entry_price) * Decimal::from(position.contracts);
            position.status = PositionStatus::Closed;
            position.realized_pnl = Some(pnl);
            let settled_position = position.clone();

            ledger.portfolio.cash_available += notional;
            ledger.portfolio.capital += pnl;
            ledger.portfolio.realized_pnl += pnl;
            return Ok(Some(settled_position));
        }

        let position = Position {
            market_id: proposal.market_id.clone(),
            category: proposal.category.clone(),
            side: proposal.side,
            entry_price: fill_price,
            contracts: fill_qty,
            notional,
            opened_at: Utc::now(),
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            status: PositionStatus::Open,
            realized_pnl: None,
        };
        ledger.portfolio.cash_available -= notional;
        ledger.portfolio.positions.push(position.clone());
        Ok(Some(position))
    }

    async fn resolve_position(&self, market_id: &str, yes_won: bool) -> Result<Option<Position>> {
        let mut ledger = self.ledger.write().await;
        let Some(position) = ledger
            .portfolio
            .positions
            .iter_mut()
            .find(|p| p.market_id == market_id && p.status == PositionStatus::Open)
        else {
            return Ok(None);
        };

        let won = match position.side {
            predmarket_core::Side::Yes => yes_won,
            predmarket_core::Side::No => !yes_won,
        };
        let contracts = Decimal::from(position.contracts);
        let (payout, pnl) = if won {
            (contracts, (Decimal::ONE - position.entry_price) * contracts)
        } else {
            (Decimal::ZERO, -position.notional)
        };

        position.status = if won {
            PositionStatus::Closed
        } else {
            PositionStatus::Expired
        };
        position.realized_pnl = Some(pnl);
        let settled = position.clone();

        ledger.portfolio.cash_available += payout;
        ledger.portfolio.capital += pnl;
        ledger.portfolio.realized_pnl += pnl;

        tracing::info!(
            market_id,
            won,
            %pnl,
            "position settled on market resolution"
        );
        Ok(Some(settled))
    }

    async fn append_trade_log(&self, entry: TradeLogEntry) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        ledger.trade_log.push_back(entry);
        while ledger.trade_log.len() > MAX_LOG_ENTRIES {
            ledger.trade_log.pop_front();
        }
        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.trade_log.iter().rev().take(limit).cloned().collect())
    }
}
