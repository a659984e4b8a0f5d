use crate::error::IndicatorError;
use crate::models::{Candle, IndicatorSet};
use ta::{Close, Next, Reset, Volume};

/// Series shorter than this never produce an indicator set.
pub const MIN_BARS: usize = 30;
pub const RSI_PERIOD: usize = 14;
const VOLUME_LOOKBACK: usize = 5;
const PRICE_LOOKBACK: usize = 20;
const NEUTRAL_RSI: f64 = 50.0;

/// RSI with Wilder smoothing (alpha = 1/period), seeded at the first bar.
///
/// Yields `None` until `period` closes have been fed.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    count: usize,
}

impl WilderRsi {
    pub fn new(period: usize) -> Option<Self> {
        if period == 0 {
            return None;
        }
        Some(Self {
            period,
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            count: 0,
        })
    }
}

impl Next<f64> for WilderRsi {
    type Output = Option<f64>;

    fn next(&mut self, close: f64) -> Self::Output {
        let change = self.prev_close.map_or(0.0, |prev| close - prev);
        self.prev_close = Some(close);

        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if self.count == 0 {
            self.avg_gain = gain;
            self.avg_loss = loss;
        } else {
            let alpha = 1.0 / self.period as f64;
            self.avg_gain = (1.0 - alpha) * self.avg_gain + alpha * gain;
            self.avg_loss = (1.0 - alpha) * self.avg_loss + alpha * loss;
        }
        self.count += 1;

        if self.count < self.period {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Reset for WilderRsi {
    fn reset(&mut self) {
        self.prev_close = None;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.count = 0;
    }
}

/// RSI at the last bar, or `None` if the series is too short to warm up.
pub fn calculate_rsi<T: Close>(bars: &[T], period: usize) -> Option<f64> {
    let mut rsi_indicator = WilderRsi::new(period)?;

    let mut last_rsi = None;
    for bar in bars {
        last_rsi = rsi_indicator.next(bar.close());
    }
    last_rsi
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Percent change of the last close against the close `lookback` bars before the end.
/// Series shorter than `lookback` report no change.
pub fn price_change_pct<T: Close>(bars: &[T], lookback: usize) -> f64 {
    if lookback == 0 || bars.len() < lookback {
        return 0.0;
    }
    let reference = bars[bars.len() - lookback].close();
    let last = bars[bars.len() - 1].close();
    (last - reference) / reference * 100.0
}

/// Computes the indicator set for one timeframe's candles.
pub fn compute(series: &[Candle]) -> Result<IndicatorSet, IndicatorError> {
    if series.len() < MIN_BARS {
        return Err(IndicatorError::InsufficientHistory {
            bars: series.len(),
            required: MIN_BARS,
        });
    }
    if series
        .iter()
        .any(|c| !c.close().is_finite() || !c.volume().is_finite())
    {
        return Err(IndicatorError::NonFinite);
    }

    let rsi = calculate_rsi(series, RSI_PERIOD).unwrap_or(NEUTRAL_RSI);

    let recent = &series[series.len() - VOLUME_LOOKBACK..];
    let recent_volume = mean(recent.iter().map(|c| c.volume()));
    let avg_volume = mean(series.iter().map(|c| c.volume()));
    let volume_ratio = if avg_volume > 0.0 {
        recent_volume / avg_volume
    } else {
        1.0
    };

    let indicators = IndicatorSet {
        rsi,
        volume_ratio,
        price_change_pct: price_change_pct(series, PRICE_LOOKBACK),
        last_price: series[series.len() - 1].close(),
        recent_volume,
    };

    let values = [
        indicators.rsi,
        indicators.volume_ratio,
        indicators.price_change_pct,
        indicators.last_price,
        indicators.recent_volume,
    ];
    if values.iter().all(|v| v.is_finite()) {
        Ok(indicators)
    } else {
        Err(IndicatorError::NonFinite)
    }
}
