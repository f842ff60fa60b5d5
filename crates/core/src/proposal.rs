use crate::error::{ProposalError, VetoReason};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a binary market an order takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Cost per contract for this side given the YES quote.
    #[must_use]
    pub fn cost(self, yes_price: Decimal) -> Decimal {
        match self {
            Self::Yes => yes_price,
            Self::No => Decimal::ONE - yes_price,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

/// Lifecycle of an order proposal. Transitions are strictly monotonic:
/// Proposed -> Approved | Vetoed, Approved -> Submitted,
/// Submitted -> Filled | Rejected. Vetoed, Filled, and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Vetoed,
    Submitted,
    Filled,
    Rejected,
}

impl ProposalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Vetoed => "vetoed",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Vetoed | Self::Filled | Self::Rejected)
    }

    const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Approved | Self::Vetoed)
                | (Self::Approved, Self::Submitted)
                | (Self::Submitted, Self::Filled | Self::Rejected)
        )
    }
}

/// Why the sizer chose this size: carried on the proposal for the trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingRationale {
    pub score: f64,
    pub confidence: f64,
    /// The Kelly fraction actually applied after the fractional multiplier
    /// and confidence scaling.
    pub kelly_fraction: Decimal,
}

/// A bounded order proposal produced by the position sizer and stamped by
/// the risk monitor or the execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProposal {
    pub id: Uuid,
    pub market_id: String,
    pub category: String,
    pub side: Side,
    pub contracts: u64,
    pub limit_price: Decimal,
    pub notional: Decimal,
    pub rationale: SizingRationale,
    /// Exit proposals close an open position and stay permitted while
    /// trading is halted.
    pub is_exit: bool,
    pub status: ProposalStatus,
    pub veto_reason: Option<VetoReason>,
    pub created_at: DateTime<Utc>,
}

impl OrderProposal {
    #[must_use]
    pub fn new(
        market_id: String,
        category: String,
        side: Side,
        contracts: u64,
        limit_price: Decimal,
        notional: Decimal,
        rationale: SizingRationale,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id,
            category,
            side,
            contracts,
            limit_price,
            notional,
            rationale,
            is_exit: false,
            status: ProposalStatus::Proposed,
            veto_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Advances the proposal to `next`, rejecting any transition that moves
    /// backward or skips a stage.
    ///
    /// # Errors
    /// Returns `ProposalError` when the transition is not in the allowed set.
    pub fn advance(&mut self, next: ProposalStatus) -> Result<(), ProposalError> {
        if !self.status.allows(next) {
            return Err(ProposalError {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Terminal-stamps the proposal as vetoed with its reason code.
    ///
    /// # Errors
    /// Returns `ProposalError` unless the proposal is still `Proposed`.
    pub fn veto(&mut self, reason: VetoReason) -> Result<(), ProposalError> {
        self.advance(ProposalStatus::Vetoed)?;
        self.veto_reason = Some(reason);
        Ok(())
    }
}
