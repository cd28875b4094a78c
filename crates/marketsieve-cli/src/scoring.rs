//! Default scoring function supplied to the core screener.
//!
//! A weighted blend of momentum, participation and stability on a 0–100
//! scale. The core treats scoring as an opaque pure function; swap this out
//! without touching the acquisition machinery.

use marketsieve_core::{Score, Series, Snapshot};

const MOMENTUM_WEIGHT: f64 = 0.5;
const VOLUME_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.2;

const MOMENTUM_SMA_WINDOW: usize = 20;

/// Scores a candidate from its snapshot and bar history.
pub fn weighted_score(snapshot: &Snapshot, series: &Series) -> Score {
    // Momentum: last close against the 20-bar average, ±10 % maps to 0..100.
    let momentum = match (series.last_close(), series.sma_close(MOMENTUM_SMA_WINDOW)) {
        (Some(close), Some(sma)) if sma > 0.0 => {
            let gap = close / sma - 1.0;
            ((gap / 0.10) * 50.0 + 50.0).clamp(0.0, 100.0)
        }
        _ => 50.0,
    };

    // Participation: turnover relative to market cap, 0.5 % turns the
    // component fully on.
    let participation = if snapshot.market_cap > 0.0 {
        ((snapshot.turnover / snapshot.market_cap) / 0.005 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    // Stability: lower return volatility scores higher; 5 % per-bar
    // volatility zeroes the component.
    let stability = match series.return_volatility() {
        Some(volatility) => ((1.0 - volatility / 0.05) * 100.0).clamp(0.0, 100.0),
        None => 50.0,
    };

    let value = momentum * MOMENTUM_WEIGHT
        + participation * VOLUME_WEIGHT
        + stability * STABILITY_WEIGHT;

    let reason = format!(
        "momentum {momentum:.0}, participation {participation:.0}, stability {stability:.0}"
    );

    Score { value, reason }
}
