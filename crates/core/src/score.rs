use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five factor sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorScores {
    pub liquidity: f64,
    pub edge: f64,
    pub timeframe: f64,
    pub volatility: f64,
    pub risk: f64,
}

impl FactorScores {
    #[must_use]
    pub const fn as_array(&self) -> [f64; 5] {
        [
            self.liquidity,
            self.edge,
            self.timeframe,
            self.volatility,
            self.risk,
        ]
    }

    /// Population standard deviation across the five factors; low spread
    /// means the factors agree.
    #[must_use]
    pub fn spread(&self) -> f64 {
        let values = self.as_array();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }
}

/// Derived score for one market. Never mutated; recomputed on each new
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub market_id: String,
    pub category: String,
    pub factors: FactorScores,
    /// Weighted composite in [0, 100].
    pub composite: f64,
    /// Data-quality confidence in [0, 1].
    pub confidence: f64,
    pub computed_at: DateTime<Utc>,
}
