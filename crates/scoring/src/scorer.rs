use crate::factors;
use crate::reference::ReferenceStats;
use chrono::{DateTime, Duration, Utc};
use predmarket_core::{
    FactorScores, MarketFilterConfig, MarketSnapshot, Score, ScoringConfig, TradingConfig,
};

/// Scores markets for trading opportunity: five weighted factors, a
/// composite in [0, 100], and a data-quality confidence in [0, 1].
///
/// Pure with respect to its inputs; no I/O. Markets below the composite
/// floor or with zero liquidity are excluded from ranking.
#[derive(Debug, Clone)]
pub struct MarketScorer {
    scoring: ScoringConfig,
    filters: MarketFilterConfig,
    trading: TradingConfig,
}

impl MarketScorer {
    #[must_use]
    pub const fn new(
        scoring: ScoringConfig,
        filters: MarketFilterConfig,
        trading: TradingConfig,
    ) -> Self {
        Self {
            scoring,
            filters,
            trading,
        }
    }

    /// Scores a single market. Returns `None` when the market is excluded:
    /// zero liquidity, composite below the floor, or a category outside the
    /// configured filter.
    #[must_use]
    pub fn score_market(
        &self,
        snapshot: &MarketSnapshot,
        reference: &ReferenceStats,
        now: DateTime<Utc>,
    ) -> Option<Score> {
        if !self.filters.categories.is_empty()
            && !self.filters.categories.contains(&snapshot.category)
        {
            return None;
        }

        let baseline = reference.baseline_for(&snapshot.category);
        let fair = reference.fair_estimate(snapshot);

        let liquidity = factors::liquidity(snapshot, &baseline, self.filters.min_liquidity);
        if liquidity == 0.0 {
            tracing::debug!(market_id = %snapshot.market_id, "excluded: below liquidity minimum");
            return None;
        }

        let factor_scores = FactorScores {
            liquidity,
            edge: factors::edge(snapshot, fair, self.trading.min_edge),
            timeframe: factors::timeframe(snapshot.days_to_resolution(now), &self.scoring),
            volatility: factors::volatility(
                snapshot,
                reference.price_window(&snapshot.market_id),
                &baseline,
                &self.scoring,
            ),
            risk: factors::risk(
                snapshot,
                &baseline,
                self.trading.max_spread,
                reference.concentration_for(&snapshot.market_id),
            ),
        };

        let weights = &self.scoring.weights;
        let composite = (factor_scores.liquidity * weights.liquidity
            + factor_scores.edge * weights.edge
            + factor_scores.timeframe * weights.timeframe
            + factor_scores.volatility * weights.volatility
            + factor_scores.risk * weights.risk)
            .clamp(0.0, 100.0);

        if composite < self.scoring.score_floor {
            tracing::debug!(
                market_id = %snapshot.market_id,
                composite,
                "excluded: composite below floor"
            );
            return None;
        }

        Some(Score {
            market_id: snapshot.market_id.clone(),
            category: snapshot.category.clone(),
            factors: factor_scores,
            composite,
            confidence: self.confidence(snapshot, reference, &factor_scores, now),
            computed_at: now,
        })
    }

    /// Confidence = data completeness x inter-factor agreement, in [0, 1].
    /// Completeness decays with snapshot age and drops when reference
    /// inputs are missing; agreement falls as the factors disagree.
    fn confidence(
        &self,
        snapshot: &MarketSnapshot,
        reference: &ReferenceStats,
        factor_scores: &FactorScores,
        now: DateTime<Utc>,
    ) -> f64 {
        let age = (now - snapshot.timestamp).num_seconds().max(0) as f64;
        let recency = (1.0 - age / self.scoring.stale_after_secs as f64).clamp(0.0, 1.0);

        let mut inputs = 1.0;
        if !reference.has_fair_estimate(&snapshot.market_id) {
            inputs -= 0.25;
        }
        if reference.price_window(&snapshot.market_id).is_none() {
            inputs -= 0.25;
        }

        let completeness = recency * inputs;
        let agreement = (1.0 - factor_scores.spread() / 50.0).clamp(0.0, 1.0);

        (completeness * agreement).clamp(0.0, 1.0)
    }

    /// Scores and ranks a batch: invalid snapshots are logged and skipped,
    /// exclusions dropped, the rest sorted best-first and truncated to the
    /// configured market cap.
    #[must_use]
    pub fn rank_markets(
        &self,
        snapshots: &[MarketSnapshot],
        reference: &ReferenceStats,
        now: DateTime<Utc>,
    ) -> Vec<Score> {
        let stale_after = Duration::seconds(self.scoring.stale_after_secs);
        let mut scored: Vec<Score> = snapshots
            .iter()
            .filter(|snapshot| match snapshot.validate(now, stale_after) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(market_id = %snapshot.market_id, %err, "snapshot excluded from cycle");
                    false
                }
            })
            .filter_map(|snapshot| self.score_market(snapshot, reference, now))
            .collect();

        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.filters.max_markets);
        scored
    }
}
