//! The five factor scores, each in [0, 100]. Pure functions of the
//! snapshot, reference statistics, and scoring configuration.

use crate::reference::CategoryBaseline;
use predmarket_core::{MarketSnapshot, ScoringConfig};
use rust_decimal::Decimal;

fn ratio(value: Decimal, norm: Decimal) -> f64 {
    if norm <= Decimal::ZERO {
        return 0.0;
    }
    let r: f64 = (value / norm).try_into().unwrap_or(0.0);
    r.min(1.0)
}

/// Liquidity against category norms, volume-weighted 60/40 over open
/// interest. Hard zero below the configured volume minimum: the market is
/// untradeable and gets excluded upstream.
#[must_use]
pub fn liquidity(
    snapshot: &MarketSnapshot,
    baseline: &CategoryBaseline,
    min_liquidity: Decimal,
) -> f64 {
    if snapshot.volume_24h < min_liquidity {
        return 0.0;
    }
    let volume = ratio(snapshot.volume_24h, baseline.typical_volume);
    let open_interest = ratio(snapshot.open_interest, baseline.typical_open_interest);
    (volume * 0.6 + open_interest * 0.4) * 100.0
}

/// Edge between the fair estimate and the quoted price, normalized by
/// price and dampened near the poles so extreme long shots don't dominate.
/// Scores 0 at or below `min_edge` and saturates at five times it.
#[must_use]
pub fn edge(snapshot: &MarketSnapshot, fair: Decimal, min_edge: Decimal) -> f64 {
    let price: f64 = snapshot.price.try_into().unwrap_or(0.5);
    if price <= 0.0 || price >= 1.0 {
        return 0.0;
    }
    let fair: f64 = fair.try_into().unwrap_or(price);
    let min_edge: f64 = min_edge.try_into().unwrap_or(0.05);

    let raw = (fair - price).abs() / price;
    let damp = 4.0 * price * (1.0 - price);
    let damped = raw * damp;

    let saturation = min_edge * 5.0;
    if damped <= min_edge {
        return 0.0;
    }
    ((damped - min_edge) / (saturation - min_edge) * 100.0).min(100.0)
}

/// Timeframe score: 100 inside the tradeable band, a ramp up to it for
/// short-dated markets, and an exponential decay past it that never falls
/// below the moonshot floor.
#[must_use]
pub fn timeframe(days_to_resolution: i64, config: &ScoringConfig) -> f64 {
    if days_to_resolution < 0 {
        return 0.0;
    }
    let days = days_to_resolution as f64;
    let min_days = config.tradeable_min_days as f64;
    let max_days = config.tradeable_max_days as f64;

    if days < min_days {
        let floor = config.short_dated_score;
        return floor + (100.0 - floor) * (days / min_days);
    }
    if days <= max_days {
        return 100.0;
    }
    let overshoot = days - max_days;
    let decayed = 100.0 * 0.5_f64.powf(overshoot / config.moonshot_half_life_days);
    decayed.max(config.moonshot_floor)
}

/// Volatility: rewards moderate realized movement, penalizes both dead
/// markets and violent repricing. Peaks where the window's stddev matches
/// the configured target; reaches zero at three times it. A volume spike
/// above twice the category norm boosts the score as an interest signal.
#[must_use]
pub fn volatility(
    snapshot: &MarketSnapshot,
    window: Option<&[f64]>,
    baseline: &CategoryBaseline,
    config: &ScoringConfig,
) -> f64 {
    let Some(changes) = window.filter(|w| w.len() >= 2) else {
        // No history yet: neutral midpoint.
        return 50.0;
    };
    let mean = changes.iter().sum::<f64>() / changes.len() as f64;
    let variance =
        changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / changes.len() as f64;
    let realized = variance.sqrt();

    let r = realized / config.target_volatility;
    let mut score = if r <= 1.0 {
        100.0 * r
    } else if r < 3.0 {
        100.0 * (3.0 - r) / 2.0
    } else {
        0.0
    };

    let spike_threshold = baseline.typical_volume * Decimal::from(2);
    if snapshot.volume_24h > spike_threshold {
        score = (score * 1.2).min(100.0);
    }
    score
}

/// Risk factor: starts at 100 and is penalized by spread width, a thin
/// book relative to the category norm, and counterparty concentration.
#[must_use]
pub fn risk(
    snapshot: &MarketSnapshot,
    baseline: &CategoryBaseline,
    max_spread: Decimal,
    concentration: f64,
) -> f64 {
    let spread_ratio = if max_spread > Decimal::ZERO {
        let r: f64 = (snapshot.spread() / max_spread).try_into().unwrap_or(1.0);
        r.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let depth = ratio(snapshot.open_interest, baseline.typical_open_interest);

    let spread_penalty = spread_ratio * 50.0;
    let thin_book_penalty = (1.0 - depth) * 30.0;
    let concentration_penalty = concentration.clamp(0.0, 1.0) * 20.0;

    (100.0 - spread_penalty - thin_book_penalty - concentration_penalty).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        let now = Utc::now();
        MarketSnapshot {
            market_id: "M1".to_string(),
            category: "economics".to_string(),
            price: dec!(0.42),
            yes_bid: dec!(0.40),
            yes_ask: dec!(0.44),
            volume_24h: dec!(3000),
            open_interest: dec!(8000),
            close_time: now + Duration::days(14),
            timestamp: now,
        }
    }

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn liquidity_zero_below_minimum() {
        let mut snap = snapshot();
        snap.volume_24h = dec!(100);
        let score = liquidity(&snap, &CategoryBaseline::default(), dec!(500));
        assert!(score.abs() < f64::EPSILON);
    }

    #[test]
    fn liquidity_saturates_at_category_norm() {
        let mut snap = snapshot();
        snap.volume_24h = dec!(50000);
        snap.open_interest = dec!(100000);
        let score = liquidity(&snap, &CategoryBaseline::default(), dec!(500));
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn edge_zero_when_fair_equals_price() {
        let snap = snapshot();
        assert!(edge(&snap, dec!(0.42), dec!(0.05)).abs() < f64::EPSILON);
    }

    #[test]
    fn edge_dampened_at_extremes() {
        let mut near_pole = snapshot();
        near_pole.price = dec!(0.02);
        let mut mid = snapshot();
        mid.price = dec!(0.40);
        // Same relative mispricing: fair is 1.5x price in both cases.
        let pole_score = edge(&near_pole, dec!(0.03), dec!(0.05));
        let mid_score = edge(&mid, dec!(0.60), dec!(0.05));
        assert!(mid_score > pole_score);
    }

    #[test]
    fn timeframe_peaks_inside_band() {
        let cfg = config();
        assert!((timeframe(14, &cfg) - 100.0).abs() < f64::EPSILON);
        assert!((timeframe(30, &cfg) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timeframe_short_dated_ramps_up() {
        let cfg = config();
        let at_zero = timeframe(0, &cfg);
        let near_band = timeframe(6, &cfg);
        assert!((at_zero - cfg.short_dated_score).abs() < f64::EPSILON);
        assert!(near_band > at_zero);
        assert!(near_band < 100.0);
    }

    #[test]
    fn moonshot_decays_but_never_zero() {
        let cfg = config();
        let decayed = timeframe(90, &cfg);
        let far = timeframe(720, &cfg);
        assert!(decayed < 100.0);
        assert!(far >= cfg.moonshot_floor);
        assert!(far > 0.0);
    }

    #[test]
    fn expired_market_scores_zero() {
        assert!(timeframe(-1, &config()).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_peaks_at_target() {
        let cfg = config();
        let baseline = CategoryBaseline::default();
        let snap = snapshot();
        // stddev of [-0.05, 0.05] = 0.05 = target.
        let at_target = volatility(&snap, Some(&[-0.05, 0.05]), &baseline, &cfg);
        let quiet = volatility(&snap, Some(&[-0.005, 0.005]), &baseline, &cfg);
        let violent = volatility(&snap, Some(&[-0.2, 0.2]), &baseline, &cfg);
        assert!((at_target - 100.0).abs() < 1e-9);
        assert!(quiet < at_target);
        assert!(violent < 1e-9);
    }

    #[test]
    fn volatility_without_history_is_neutral() {
        let snap = snapshot();
        let score = volatility(&snap, None, &CategoryBaseline::default(), &config());
        assert!((score - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn risk_penalizes_wide_spread() {
        let baseline = CategoryBaseline::default();
        let tight = snapshot();
        let mut wide = snapshot();
        wide.yes_bid = dec!(0.35);
        wide.yes_ask = dec!(0.50);
        let tight_score = risk(&tight, &baseline, dec!(0.10), 0.0);
        let wide_score = risk(&wide, &baseline, dec!(0.10), 0.0);
        assert!(tight_score > wide_score);
    }

    #[test]
    fn risk_penalizes_concentration() {
        let baseline = CategoryBaseline::default();
        let snap = snapshot();
        let clean = risk(&snap, &baseline, dec!(0.10), 0.0);
        let concentrated = risk(&snap, &baseline, dec!(0.10), 1.0);
        assert!((clean - concentrated - 20.0).abs() < 1e-9);
    }
}
