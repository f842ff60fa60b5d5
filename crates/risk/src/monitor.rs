use crate::breaker::TradingState;
use predmarket_core::{
    CapitalConfig, OrderProposal, PortfolioState, ProposalStatus, SizingRationale, VetoReason,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Validates proposals against the portfolio's capital constraints and
/// watches open positions for exit triggers.
///
/// A veto is terminal for the proposal: the constraint is recorded as a
/// reason code, the size is never silently clamped into a valid range.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    capital: CapitalConfig,
}

impl RiskMonitor {
    #[must_use]
    pub const fn new(capital: CapitalConfig) -> Self {
        Self { capital }
    }

    /// Reviews a proposal, advancing it to Approved or terminal-stamping it
    /// Vetoed with the failed constraint.
    ///
    /// Exit proposals are approved even while trading is halted; they only
    /// reduce exposure.
    ///
    /// # Errors
    /// Returns the veto reason (also recorded on the proposal).
    pub fn review(
        &self,
        proposal: &mut OrderProposal,
        portfolio: &PortfolioState,
        state: &TradingState,
    ) -> Result<(), VetoReason> {
        let verdict = self.evaluate(proposal, portfolio, state);
        match verdict {
            Ok(()) => {
                // The proposal lifecycle enforces Proposed -> Approved.
                if proposal.advance(ProposalStatus::Approved).is_err() {
                    tracing::error!(
                        proposal_id = %proposal.id,
                        status = proposal.status.as_str(),
                        "review on a proposal past the Proposed stage"
                    );
                }
                Ok(())
            }
            Err(reason) => {
                tracing::info!(
                    proposal_id = %proposal.id,
                    market_id = %proposal.market_id,
                    %reason,
                    "proposal vetoed"
                );
                let _ = proposal.veto(reason.clone());
                Err(reason)
            }
        }
    }

    fn evaluate(
        &self,
        proposal: &OrderProposal,
        portfolio: &PortfolioState,
        state: &TradingState,
    ) -> Result<(), VetoReason> {
        if let TradingState::Halted { reason, .. } = state {
            if !proposal.is_exit {
                return Err(VetoReason::TradingHalted {
                    reason: reason.clone(),
                });
            }
        }
        if proposal.is_exit {
            return Ok(());
        }

        if portfolio.open_position(&proposal.market_id).is_some() {
            return Err(VetoReason::DuplicateMarket {
                market_id: proposal.market_id.clone(),
            });
        }

        let max_position = self.capital.max_position_size * portfolio.capital;
        if proposal.notional > max_position {
            return Err(VetoReason::PositionLimitExceeded);
        }

        let max_exposure = self.capital.max_portfolio_risk * portfolio.capital;
        if portfolio.exposure_notional() + proposal.notional > max_exposure {
            return Err(VetoReason::ExposureLimitExceeded);
        }

        let category_cap = self.capital.correlation_cap * portfolio.capital;
        if portfolio.category_notional(&proposal.category) + proposal.notional > category_cap {
            return Err(VetoReason::CorrelatedExposure {
                category: proposal.category.clone(),
            });
        }

        Ok(())
    }

    /// Scans open positions against the latest YES quotes and emits exit
    /// proposals for any that crossed their stop-loss or take-profit
    /// threshold.
    #[must_use]
    pub fn check_exits(
        &self,
        portfolio: &PortfolioState,
        latest_prices: &HashMap<String, Decimal>,
    ) -> Vec<OrderProposal> {
        let mut exits = Vec::new();
        for position in portfolio.open_positions() {
            let Some(yes_price) = latest_prices.get(&position.market_id) else {
                continue;
            };
            let ret = position.unrealized_return(*yes_price);
            let triggered = if ret <= position.stop_loss {
                "stop_loss"
            } else if ret >= position.take_profit {
                "take_profit"
            } else {
                continue;
            };

            tracing::info!(
                market_id = %position.market_id,
                unrealized_return = ret,
                trigger = triggered,
                "exit triggered"
            );

            let mut exit = OrderProposal::new(
                position.market_id.clone(),
                position.category.clone(),
                position.side,
                position.contracts,
                position.side_price(*yes_price),
                position.side_price(*yes_price) * Decimal::from(position.contracts),
                SizingRationale {
                    score: 0.0,
                    confidence: 1.0,
                    kelly_fraction: Decimal::ZERO,
                },
            );
            exit.is_exit = true;
            exits.push(exit);
        }
        exits
    }
}
