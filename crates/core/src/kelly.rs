//! Kelly Criterion sizing for binary prediction markets.
//!
//! For a contract costing `c` that pays 1 on a win, the payout-to-stake
//! ratio is `b = (1 - c) / c` and the optimal capital fraction is
//! `f* = (b*p - q) / b` with `q = 1 - p`. Full Kelly is far too aggressive
//! for noisy probability estimates, so a fractional multiplier and the
//! signal's confidence scale it down before any capital is committed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellySizer {
    /// Fraction of full Kelly to apply (0.25 = quarter Kelly).
    pub fraction: Decimal,
    /// Minimum edge (p - cost) required before staking anything.
    pub min_edge: Decimal,
}

impl Default for KellySizer {
    fn default() -> Self {
        Self {
            fraction: Decimal::new(25, 2), // 0.25
            min_edge: Decimal::new(1, 2),  // 0.01
        }
    }
}

/// Outcome of a Kelly computation, before capital clamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KellyStake {
    /// Unscaled f*.
    pub full_fraction: Decimal,
    /// f* after the fractional multiplier and confidence scaling.
    pub applied_fraction: Decimal,
    /// Raw edge p - cost.
    pub edge: Decimal,
}

impl KellySizer {
    #[must_use]
    pub const fn new(fraction: Decimal, min_edge: Decimal) -> Self {
        Self { fraction, min_edge }
    }

    /// Computes the capital fraction to stake on a contract costing `cost`
    /// with estimated win probability `win_prob`, scaled by `confidence`
    /// in [0, 1].
    ///
    /// Returns `None` when the inputs are invalid, the edge does not clear
    /// `min_edge`, or full Kelly is non-positive. The caller converts the
    /// applied fraction to a notional and enforces the portfolio caps.
    #[must_use]
    pub fn stake_fraction(
        &self,
        win_prob: Decimal,
        cost: Decimal,
        confidence: Decimal,
    ) -> Option<KellyStake> {
        if win_prob < Decimal::ZERO
            || win_prob > Decimal::ONE
            || cost <= Decimal::ZERO
            || cost >= Decimal::ONE
            || confidence < Decimal::ZERO
            || confidence > Decimal::ONE
        {
            return None;
        }

        let edge = win_prob - cost;
        if edge < self.min_edge {
            return None;
        }

        // b = (1 - c) / c, f* = (b*p - q) / b
        let odds = (Decimal::ONE - cost) / cost;
        let full_fraction = (odds * win_prob - (Decimal::ONE - win_prob)) / odds;
        if full_fraction <= Decimal::ZERO {
            return None;
        }

        Some(KellyStake {
            full_fraction,
            applied_fraction: full_fraction * self.fraction * confidence,
            edge,
        })
    }
}
