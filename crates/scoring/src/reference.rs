use predmarket_core::MarketSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What "normal" looks like for a category: liquidity norms plus the prior
/// on how much informational edge this category tends to offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBaseline {
    pub typical_volume: Decimal,
    pub typical_open_interest: Decimal,
    /// Prior on available edge in [0, 1]. Economics and politics reward
    /// analysis; weather and entertainment are mostly noise.
    pub edge_prior: f64,
}

impl Default for CategoryBaseline {
    fn default() -> Self {
        Self {
            typical_volume: Decimal::from(5_000),
            typical_open_interest: Decimal::from(10_000),
            edge_prior: 0.3,
        }
    }
}

/// Reference statistics the scorer reads alongside each snapshot: category
/// baselines, per-market fair-probability estimates, the recent
/// price-change window, and concentration signals.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStats {
    baselines: HashMap<String, CategoryBaseline>,
    fair_estimates: HashMap<String, Decimal>,
    /// Recent per-snapshot price changes, most recent last.
    price_windows: HashMap<String, Vec<f64>>,
    /// Single-counterparty share of open interest in [0, 1].
    concentration: HashMap<String, f64>,
}

impl ReferenceStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard category priors; unknown categories fall back to the
    /// default baseline.
    #[must_use]
    pub fn with_standard_baselines() -> Self {
        let mut stats = Self::new();
        for (category, edge_prior) in [
            ("economics", 0.5),
            ("politics", 0.4),
            ("sports", 0.3),
            ("weather", 0.2),
            ("entertainment", 0.2),
        ] {
            stats.baselines.insert(
                category.to_string(),
                CategoryBaseline {
                    edge_prior,
                    ..CategoryBaseline::default()
                },
            );
        }
        stats
    }

    pub fn set_baseline(&mut self, category: impl Into<String>, baseline: CategoryBaseline) {
        self.baselines.insert(category.into(), baseline);
    }

    pub fn set_fair_estimate(&mut self, market_id: impl Into<String>, fair: Decimal) {
        self.fair_estimates.insert(market_id.into(), fair);
    }

    pub fn set_price_window(&mut self, market_id: impl Into<String>, changes: Vec<f64>) {
        self.price_windows.insert(market_id.into(), changes);
    }

    pub fn set_concentration(&mut self, market_id: impl Into<String>, share: f64) {
        self.concentration.insert(market_id.into(), share.clamp(0.0, 1.0));
    }

    #[must_use]
    pub fn baseline_for(&self, category: &str) -> CategoryBaseline {
        self.baselines.get(category).cloned().unwrap_or_default()
    }

    /// The bot's fair-probability estimate for a market. Falls back to a
    /// contrarian prior-weighted estimate when no model output is present:
    /// extreme prices get pulled back toward the 20-80 band in proportion
    /// to the category's edge prior.
    #[must_use]
    pub fn fair_estimate(&self, snapshot: &MarketSnapshot) -> Decimal {
        if let Some(fair) = self.fair_estimates.get(&snapshot.market_id) {
            return *fair;
        }
        let prior = Decimal::try_from(self.baseline_for(&snapshot.category).edge_prior)
            .unwrap_or_default();
        let low = Decimal::new(20, 2);
        let high = Decimal::new(80, 2);
        if snapshot.price < low {
            snapshot.price + (low - snapshot.price) * prior
        } else if snapshot.price > high {
            snapshot.price - (snapshot.price - high) * prior
        } else {
            snapshot.price
        }
    }

    #[must_use]
    pub fn has_fair_estimate(&self, market_id: &str) -> bool {
        self.fair_estimates.contains_key(market_id)
    }

    #[must_use]
    pub fn price_window(&self, market_id: &str) -> Option<&[f64]> {
        self.price_windows.get(market_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn concentration_for(&self, market_id: &str) -> f64 {
        self.concentration.get(market_id).copied().unwrap_or(0.0)
    }
}
