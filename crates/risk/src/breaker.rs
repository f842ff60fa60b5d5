//! Trading circuit breaker.
//!
//! Trips the process-wide trading state to HALTED when realized drawdown
//! over a rolling window exceeds its limit, when order execution fails
//! repeatedly, or when the price feed goes stale. While halted, the risk
//! monitor vetoes every non-exit proposal. Only an explicit operator
//! clearance returns the state to Active.

use chrono::{DateTime, Duration, Utc};
use predmarket_core::BreakerConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

/// Process-wide trading state, published on a watch channel so every
/// domain observes trips immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingState {
    Active,
    Halted {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl TradingState {
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

/// What tripped the breaker.
#[derive(Debug, Clone)]
pub enum TripReason {
    DrawdownExceeded { drawdown: f64, limit: f64 },
    ExecutionFailures(u32),
    FeedStale { silent_secs: i64 },
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DrawdownExceeded { drawdown, limit } => {
                write!(f, "drawdown {drawdown:.1}% exceeded limit {limit:.1}%",
                    drawdown = drawdown * 100.0, limit = limit * 100.0)
            }
            Self::ExecutionFailures(n) => write!(f, "{n} consecutive execution failures"),
            Self::FeedStale { silent_secs } => {
                write!(f, "price feed silent for {silent_secs}s")
            }
            Self::Manual(reason) => write!(f, "manual: {reason}"),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state_tx: watch::Sender<TradingState>,
    /// Rolling equity observations for the drawdown window.
    equity_window: Mutex<VecDeque<(DateTime<Utc>, Decimal)>>,
    consecutive_failures: AtomicU32,
    last_feed_update: Mutex<DateTime<Utc>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let (state_tx, _) = watch::channel(TradingState::Active);
        Self {
            config,
            state_tx,
            equity_window: Mutex::new(VecDeque::new()),
            consecutive_failures: AtomicU32::new(0),
            last_feed_update: Mutex::new(Utc::now()),
        }
    }

    /// Channel for observing trading-state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TradingState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> TradingState {
        self.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state_tx.borrow().is_halted()
    }

    /// Records an equity observation and trips when peak-to-trough decline
    /// over the rolling window exceeds the configured limit.
    pub fn record_equity(&self, now: DateTime<Utc>, equity: Decimal) {
        let drawdown = {
            let mut window = self.equity_window.lock().unwrap_or_else(|e| e.into_inner());
            window.push_back((now, equity));
            let horizon = now - Duration::seconds(self.config.drawdown_window_secs);
            while window.front().is_some_and(|(t, _)| *t < horizon) {
                window.pop_front();
            }
            let peak = window
                .iter()
                .map(|(_, e)| *e)
                .max()
                .unwrap_or(equity);
            if peak <= Decimal::ZERO {
                0.0
            } else {
                ((peak - equity) / peak).try_into().unwrap_or(0.0)
            }
        };

        if drawdown > self.config.max_drawdown {
            self.trip(TripReason::DrawdownExceeded {
                drawdown,
                limit: self.config.max_drawdown,
            });
        }
    }

    /// Records an order-execution failure; trips at the configured
    /// consecutive-failure count.
    pub fn record_execution_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.max_consecutive_failures {
            self.trip(TripReason::ExecutionFailures(failures));
        }
    }

    pub fn record_execution_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn record_feed_update(&self, now: DateTime<Utc>) {
        *self.last_feed_update.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Checks price-feed freshness; trips when the feed has been silent
    /// longer than the configured bound.
    pub fn check_feed_freshness(&self, now: DateTime<Utc>) {
        let last = *self.last_feed_update.lock().unwrap_or_else(|e| e.into_inner());
        let silent = (now - last).num_seconds();
        if silent > self.config.feed_stale_after_secs {
            self.trip(TripReason::FeedStale { silent_secs: silent });
        }
    }

    /// Flips the trading state to HALTED. Idempotent: re-tripping while
    /// halted keeps the original reason and timestamp.
    pub fn trip(&self, reason: TripReason) {
        let mut tripped = false;
        self.state_tx.send_if_modified(|state| {
            if state.is_halted() {
                return false;
            }
            tracing::error!(%reason, "circuit breaker tripped, trading halted");
            *state = TradingState::Halted {
                reason: reason.to_string(),
                since: Utc::now(),
            };
            tripped = true;
            true
        });
        if !tripped {
            tracing::debug!(%reason, "breaker already open, trip ignored");
        }
    }

    /// Explicit operator clearance: the only path out of HALTED. Resets the
    /// failure counter so a stale count cannot re-trip immediately.
    pub fn clear_halt(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state_tx.send_if_modified(|state| {
            if state.is_halted() {
                tracing::warn!("trading halt cleared by operator");
                *state = TradingState::Active;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default())
    }

    #[test]
    fn starts_active() {
        assert!(!breaker().is_halted());
    }

    #[test]
    fn drawdown_past_limit_trips() {
        let breaker = breaker();
        let now = Utc::now();
        breaker.record_equity(now, dec!(100));
        breaker.record_equity(now + Duration::minutes(1), dec!(95));
        assert!(!breaker.is_halted());
        // 12% below the peak, limit is 10%.
        breaker.record_equity(now + Duration::minutes(2), dec!(88));
        assert!(breaker.is_halted());
    }

    #[test]
    fn drawdown_outside_window_forgotten() {
        let breaker = breaker();
        let now = Utc::now();
        breaker.record_equity(now - Duration::days(3), dec!(100));
        // The old peak fell out of the rolling window, so 88 is no drawdown.
        breaker.record_equity(now, dec!(88));
        assert!(!breaker.is_halted());
    }

    #[test]
    fn consecutive_failures_trip() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_execution_failure();
        }
        assert!(!breaker.is_halted());
        breaker.record_execution_failure();
        assert!(breaker.is_halted());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_execution_failure();
        }
        breaker.record_execution_success();
        for _ in 0..4 {
            breaker.record_execution_failure();
        }
        assert!(!breaker.is_halted());
    }

    #[test]
    fn stale_feed_trips() {
        let breaker = breaker();
        let now = Utc::now();
        breaker.record_feed_update(now);
        breaker.check_feed_freshness(now + Duration::seconds(60));
        assert!(!breaker.is_halted());
        breaker.check_feed_freshness(now + Duration::seconds(180));
        assert!(breaker.is_halted());
    }

    #[test]
    fn only_operator_clears_halt() {
        let breaker = breaker();
        breaker.trip(TripReason::Manual("test".to_string()));
        assert!(breaker.is_halted());

        // New equity observations do not clear the halt.
        breaker.record_equity(Utc::now(), dec!(1000));
        assert!(breaker.is_halted());

        breaker.clear_halt();
        assert!(!breaker.is_halted());
    }

    #[test]
    fn retrip_keeps_original_reason() {
        let breaker = breaker();
        breaker.trip(TripReason::Manual("first".to_string()));
        breaker.trip(TripReason::Manual("second".to_string()));
        match breaker.state() {
            TradingState::Halted { reason, .. } => assert!(reason.contains("first")),
            TradingState::Active => panic!("expected halted"),
        }
    }

    #[test]
    fn subscribers_observe_trip() {
        let breaker = breaker();
        let rx = breaker.subscribe();
        breaker.trip(TripReason::Manual("test".to_string()));
        assert!(rx.borrow().is_halted());
    }
}
