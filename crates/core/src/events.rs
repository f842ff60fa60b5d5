use crate::proposal::OrderProposal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Emitted by the execution domain when an order fills; consumed
/// asynchronously by the capital domain, which owns settlement. This queue
/// handoff is the only path that mutates portfolio state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub proposal: OrderProposal,
    pub fill_price: Decimal,
    pub fill_qty: u64,
    pub timestamp: DateTime<Utc>,
}

/// Venue response to an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderResult {
    Filled { fill_price: Decimal, contracts: u64 },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    ProposalApproved,
    ProposalVetoed,
    OrderSubmitted,
    OrderFilled,
    OrderRejected,
    OrderCancelled,
    PositionClosed,
    MarketResolved,
    CircuitTripped,
    HaltCleared,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProposalApproved => "proposal_approved",
            Self::ProposalVetoed => "proposal_vetoed",
            Self::OrderSubmitted => "order_submitted",
            Self::OrderFilled => "order_filled",
            Self::OrderRejected => "order_rejected",
            Self::OrderCancelled => "order_cancelled",
            Self::PositionClosed => "position_closed",
            Self::MarketResolved => "market_resolved",
            Self::CircuitTripped => "circuit_tripped",
            Self::HaltCleared => "halt_cleared",
        };
        f.write_str(s)
    }
}

/// One line in the append-only trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub market_id: String,
    pub detail: String,
}

impl TradeLogEntry {
    #[must_use]
    pub fn now(action: TradeAction, market_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            market_id: market_id.into(),
            detail: detail.into(),
        }
    }
}
