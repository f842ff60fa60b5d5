use predmarket_core::{
    CapitalConfig, KellySizer, MarketSnapshot, OrderProposal, PortfolioState, Score, Side,
    SizingRationale,
};
use rust_decimal::Decimal;

/// Converts a scored market into a bounded order proposal, or decides not
/// to propose at all.
///
/// Sizing is fractional Kelly scaled by signal confidence, then clamped in
/// order: per-position cap, aggregate-exposure headroom, available cash.
/// Contract counts round down to whole units; anything that lands under the
/// venue minimum is dropped rather than padded up.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    capital: CapitalConfig,
    kelly: KellySizer,
}

impl PositionSizer {
    #[must_use]
    pub fn new(capital: CapitalConfig, min_edge: Decimal) -> Self {
        let kelly = KellySizer::new(capital.kelly_fraction, min_edge);
        Self { capital, kelly }
    }

    /// Produces a proposal for the market, or `None` when no bet clears the
    /// sizing policy. Pure: reads only the given portfolio snapshot.
    #[must_use]
    pub fn propose(
        &self,
        score: &Score,
        snapshot: &MarketSnapshot,
        fair: Decimal,
        portfolio: &PortfolioState,
    ) -> Option<OrderProposal> {
        let (side, win_prob) = if fair > snapshot.price {
            (Side::Yes, fair)
        } else if fair < snapshot.price {
            (Side::No, Decimal::ONE - fair)
        } else {
            return None;
        };

        // Cross the spread on entry: YES fills at the ask, NO at one minus
        // the bid.
        let cost = match side {
            Side::Yes => snapshot.yes_ask,
            Side::No => Decimal::ONE - snapshot.yes_bid,
        };

        let confidence = Decimal::try_from(score.confidence).ok()?;
        let stake = self.kelly.stake_fraction(win_prob, cost, confidence)?;

        let mut notional = stake.applied_fraction * portfolio.capital;

        let max_position = self.capital.max_position_size * portfolio.capital;
        notional = notional.min(max_position);

        let exposure_headroom =
            self.capital.max_portfolio_risk * portfolio.capital - portfolio.exposure_notional();
        notional = notional.min(exposure_headroom);

        notional = notional.min(portfolio.cash_available);

        if notional < self.capital.min_bet {
            tracing::debug!(
                market_id = %snapshot.market_id,
                %notional,
                "no proposal: clamped notional under minimum bet"
            );
            return None;
        }

        let contracts_dec = (notional / cost).floor();
        let contracts: u64 = contracts_dec.try_into().ok()?;
        if contracts == 0 {
            return None;
        }
        let final_notional = Decimal::from(contracts) * cost;
        if final_notional < self.capital.min_bet {
            return None;
        }

        Some(OrderProposal::new(
            snapshot.market_id.clone(),
            snapshot.category.clone(),
            side,
            contracts,
            cost,
            final_notional,
            SizingRationale {
                score: score.composite,
                confidence: score.confidence,
                kelly_fraction: stake.applied_fraction,
            },
        ))
    }
}
