//! Multi-timeframe momentum scoring.
//!
//! Every timeframe with indicators gets a sub-score in roughly [0, 1]; the
//! instrument score is the weighted mean of those sub-scores, with timeframe
//! weights renormalized over the timeframes that are actually present.

use crate::models::{IndicatorSet, Timeframe, TimeframeResult};
use std::collections::BTreeMap;

/// Fixed optimism prior applied to every timeframe.
pub const BASE_BULLISH: f64 = 0.5;

pub const BASE_WEIGHT: f64 = 0.40;
pub const RSI_WEIGHT: f64 = 0.20;
pub const VOLUME_WEIGHT: f64 = 0.25;
pub const PRICE_WEIGHT: f64 = 0.15;

/// Volume ratio at which the volume sub-score saturates.
const VOLUME_SATURATION: f64 = 1.5;

pub fn rsi_subscore(rsi: f64) -> f64 {
    if (50.0..=70.0).contains(&rsi) {
        0.8
    } else if rsi > 70.0 && rsi <= 80.0 {
        0.6
    } else if rsi > 80.0 {
        0.3
    } else if (40.0..50.0).contains(&rsi) {
        0.4
    } else {
        0.2
    }
}

pub fn volume_subscore(volume_ratio: f64) -> f64 {
    (volume_ratio / VOLUME_SATURATION).min(1.0)
}

pub fn price_subscore(price_change_pct: f64) -> f64 {
    (price_change_pct / 10.0 + 0.5).clamp(0.0, 1.0)
}

pub fn timeframe_subscore(indicators: &IndicatorSet) -> f64 {
    BASE_BULLISH * BASE_WEIGHT
        + rsi_subscore(indicators.rsi) * RSI_WEIGHT
        + volume_subscore(indicators.volume_ratio) * VOLUME_WEIGHT
        + price_subscore(indicators.price_change_pct) * PRICE_WEIGHT
}

/// Momentum score over the timeframes that produced indicators.
///
/// `None` when no timeframe has indicators; such an instrument has no score at all.
pub fn score(results: &BTreeMap<Timeframe, TimeframeResult>) -> Option<f64> {
    let mut total_score = 0.0;
    let mut total_weight = 0.0;

    for (timeframe, result) in results {
        if let Some(indicators) = &result.indicators {
            let weight = timeframe.weight();
            total_score += timeframe_subscore(indicators) * weight;
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        Some(total_score / total_weight)
    } else {
        None
    }
}
