use crate::error::SnapshotError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A point-in-time view of a single binary prediction market.
///
/// Snapshots are immutable once recorded; a newer snapshot of the same
/// market supersedes older ones, it never replaces them in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_id: String,
    pub category: String,
    /// Last traded YES price expressed as a probability (0-1).
    pub price: Decimal,
    pub yes_bid: Decimal,
    pub yes_ask: Decimal,
    pub volume_24h: Decimal,
    pub open_interest: Decimal,
    /// When the market resolves.
    pub close_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Bid/ask spread in probability units.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.yes_ask - self.yes_bid
    }

    /// Whole days until the market resolves, negative once past close.
    #[must_use]
    pub fn days_to_resolution(&self, now: DateTime<Utc>) -> i64 {
        (self.close_time - now).num_days()
    }

    /// Checks the snapshot against the data-validation rules: prices must be
    /// probabilities, quotes must not be inverted, and the snapshot must not
    /// be older than `stale_after`.
    ///
    /// # Errors
    /// Returns the first violated rule; a failing snapshot is excluded from
    /// the scoring cycle, it is never fatal.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<(), SnapshotError> {
        for (field, value) in [
            ("price", self.price),
            ("yes_bid", self.yes_bid),
            ("yes_ask", self.yes_ask),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(SnapshotError::PriceOutOfRange {
                    market_id: self.market_id.clone(),
                    field,
                    value,
                });
            }
        }

        if self.yes_bid > self.yes_ask {
            return Err(SnapshotError::InvertedQuote {
                market_id: self.market_id.clone(),
            });
        }

        if self.volume_24h < Decimal::ZERO || self.open_interest < Decimal::ZERO {
            return Err(SnapshotError::NegativeQuantity {
                market_id: self.market_id.clone(),
            });
        }

        if now - self.timestamp > stale_after {
            return Err(SnapshotError::Stale {
                market_id: self.market_id.clone(),
                age_secs: (now - self.timestamp).num_seconds(),
            });
        }

        Ok(())
    }
}
