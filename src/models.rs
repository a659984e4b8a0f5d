use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// --- Instruments & Timeframes ---

/// Exchange symbol of a tradable pair, e.g. `B-BTC_USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human readable form used by reports: `B-BTC_USDT` becomes `BTC/USDT`.
    pub fn display_pair(&self) -> String {
        self.0.replace("B-", "").replace("_USDT", "/USDT")
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candle resolutions the screener scores, ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Timeframe {
    #[serde(rename = "15")]
    M15,
    #[serde(rename = "30")]
    M30,
    #[serde(rename = "60")]
    H1,
    #[serde(rename = "240")]
    H4,
    #[serde(rename = "1D")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Importance of the timeframe for short-term momentum. Sums to 1.0 over `ALL`.
    pub fn weight(self) -> f64 {
        match self {
            Timeframe::M15 => 0.35,
            Timeframe::M30 => 0.25,
            Timeframe::H1 => 0.20,
            Timeframe::H4 => 0.15,
            Timeframe::D1 => 0.05,
        }
    }

    /// Code sent as the `resolution` query parameter.
    pub fn resolution(self) -> &'static str {
        match self {
            Timeframe::M15 => "15",
            Timeframe::M30 => "30",
            Timeframe::H1 => "60",
            Timeframe::H4 => "240",
            Timeframe::D1 => "1D",
        }
    }

    /// Bar length in minutes for the minute-based resolutions, `None` for daily bars.
    pub fn minutes(self) -> Option<i64> {
        match self {
            Timeframe::M15 => Some(15),
            Timeframe::M30 => Some(30),
            Timeframe::H1 => Some(60),
            Timeframe::H4 => Some(240),
            Timeframe::D1 => None,
        }
    }

    pub fn label(self) -> String {
        match self.minutes() {
            Some(m) => format!("{}min", m),
            None => "1Day".to_string(),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resolution())
    }
}

// --- Candles ---

/// One OHLCV bar. `time` is the bucket open in unix milliseconds.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub time: i64,
    #[serde(default = "nan", deserialize_with = "deserialize_f64_lenient")]
    pub open: f64,
    #[serde(default = "nan", deserialize_with = "deserialize_f64_lenient")]
    pub high: f64,
    #[serde(default = "nan", deserialize_with = "deserialize_f64_lenient")]
    pub low: f64,
    #[serde(default = "nan", deserialize_with = "deserialize_f64_lenient")]
    pub close: f64,
    #[serde(default = "nan", deserialize_with = "deserialize_f64_lenient")]
    pub volume: f64,
}

impl Candle {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Time-ascending bars for one (instrument, timeframe) pair.
pub type CandleSeries = Vec<Candle>;

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(f64::NAN)
        } else {
            v.trim().parse::<f64>().map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(f64::NAN)
    }
}

fn nan() -> f64 {
    f64::NAN
}

// Missing values become NaN so the indicator engine can reject the series as a whole.
fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

// --- Analysis results ---

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSet {
    pub rsi: f64,
    pub volume_ratio: f64,
    pub price_change_pct: f64,
    pub last_price: f64,
    pub recent_volume: f64,
}

/// A fetched series and, when it was long and clean enough, its indicators.
#[derive(Serialize, Debug, Clone)]
pub struct TimeframeResult {
    #[serde(skip)]
    pub series: CandleSeries,
    pub bars: usize,
    pub indicators: Option<IndicatorSet>,
}

impl TimeframeResult {
    pub fn new(series: CandleSeries, indicators: Option<IndicatorSet>) -> Self {
        Self {
            bars: series.len(),
            series,
            indicators,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct InstrumentAnalysis {
    pub instrument: Instrument,
    pub momentum_score: f64,
    /// Only timeframes whose fetch succeeded have an entry.
    pub timeframes: BTreeMap<Timeframe, TimeframeResult>,
}

impl InstrumentAnalysis {
    pub fn indicators(&self, timeframe: Timeframe) -> Option<&IndicatorSet> {
        self.timeframes
            .get(&timeframe)
            .and_then(|result| result.indicators.as_ref())
    }

    pub fn scored_timeframes(&self) -> usize {
        self.timeframes
            .values()
            .filter(|result| result.indicators.is_some())
            .count()
    }
}

/// Output of one run, ranked by momentum score (highest first).
#[derive(Serialize, Debug, Clone)]
pub struct AnalysisBatch {
    pub generated_at: DateTime<Utc>,
    pub analyses: Vec<InstrumentAnalysis>,
}

impl AnalysisBatch {
    /// Ranks `analyses` descending by score. The sort is stable, so ties keep input order.
    pub fn ranked(generated_at: DateTime<Utc>, mut analyses: Vec<InstrumentAnalysis>) -> Self {
        analyses.sort_by(|a, b| b.momentum_score.total_cmp(&a.momentum_score));
        Self {
            generated_at,
            analyses,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    /// Open time of the newest candle seen in any timeframe of the batch.
    pub fn latest_candle_time(&self) -> Option<DateTime<Utc>> {
        self.analyses
            .iter()
            .flat_map(|a| a.timeframes.values())
            .filter_map(|result| result.series.last())
            .filter_map(Candle::timestamp)
            .max()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.analyses.iter().map(|a| a.momentum_score).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(symbol: &str, score: f64) -> InstrumentAnalysis {
        InstrumentAnalysis {
            instrument: Instrument::new(symbol),
            momentum_score: score,
            timeframes: BTreeMap::new(),
        }
    }

    #[test]
    fn timeframe_weights_sum_to_one() {
        let total: f64 = Timeframe::ALL.iter().map(|tf| tf.weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn timeframe_codes_match_provider_resolutions() {
        let codes: Vec<&str> = Timeframe::ALL.iter().map(|tf| tf.resolution()).collect();
        assert_eq!(codes, vec!["15", "30", "60", "240", "1D"]);
        assert_eq!(Timeframe::D1.label(), "1Day");
        assert_eq!(Timeframe::H4.label(), "240min");
    }

    #[test]
    fn display_pair_strips_exchange_markers() {
        assert_eq!(Instrument::new("B-BTC_USDT").display_pair(), "BTC/USDT");
        assert_eq!(Instrument::new("ETHUSDT").display_pair(), "ETHUSDT");
    }

    #[test]
    fn candle_fields_decode_leniently() {
        let json = r#"[
            {"time": 1700000000000, "open": 1, "high": "2.5", "low": 0.5, "close": "1.5", "volume": null},
            {"time": 1700000900000, "open": 1.5, "high": 2, "low": 1, "close": 1.75, "volume": ""}
        ]"#;
        let candles: Vec<Candle> = serde_json::from_str(json).unwrap();
        assert_eq!(candles[0].high, 2.5);
        assert_eq!(candles[0].close, 1.5);
        assert!(candles[0].volume.is_nan());
        assert!(candles[1].volume.is_nan());
        assert!(candles[0].timestamp().is_some());
    }

    #[test]
    fn missing_candle_fields_decode_as_nan() {
        let json = r#"{"time": 1700000000000, "open": 1, "high": 2, "low": 0.5, "close": 1.5}"#;
        let candle: Candle = serde_json::from_str(json).unwrap();
        assert_eq!(candle.close, 1.5);
        assert!(candle.volume.is_nan());
    }

    #[test]
    fn latest_candle_time_spans_all_timeframes() {
        let bar = |time: i64| Candle {
            time,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        };
        let mut timeframes = BTreeMap::new();
        timeframes.insert(Timeframe::M15, TimeframeResult::new(vec![bar(1_000), bar(5_000)], None));
        timeframes.insert(Timeframe::D1, TimeframeResult::new(vec![bar(9_000)], None));
        let batch = AnalysisBatch::ranked(
            Utc::now(),
            vec![
                InstrumentAnalysis {
                    instrument: Instrument::new("A"),
                    momentum_score: 0.5,
                    timeframes,
                },
                analysis("B", 0.4),
            ],
        );
        assert_eq!(batch.latest_candle_time(), DateTime::from_timestamp_millis(9_000));
        assert_eq!(AnalysisBatch::ranked(Utc::now(), vec![analysis("C", 0.1)]).latest_candle_time(), None);
    }

    #[test]
    fn candle_rejects_non_numeric_strings() {
        let json = r#"{"time": 1, "open": "abc", "high": 1, "low": 1, "close": 1, "volume": 1}"#;
        assert!(serde_json::from_str::<Candle>(json).is_err());
    }

    #[test]
    fn ranked_batch_is_descending_and_stable_on_ties() {
        let batch = AnalysisBatch::ranked(
            Utc::now(),
            vec![
                analysis("A", 0.5),
                analysis("B", 0.7),
                analysis("C", 0.5),
                analysis("D", 0.61),
            ],
        );
        let order: Vec<&str> = batch.analyses.iter().map(|a| a.instrument.as_str()).collect();
        assert_eq!(order, vec!["B", "D", "A", "C"]);
        assert!(batch.scores().windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn timeframe_map_serializes_with_resolution_keys() {
        let mut timeframes = BTreeMap::new();
        timeframes.insert(Timeframe::D1, TimeframeResult::new(Vec::new(), None));
        let value = serde_json::to_value(InstrumentAnalysis {
            instrument: Instrument::new("B-SOL_USDT"),
            momentum_score: 0.5,
            timeframes,
        })
        .unwrap();
        assert_eq!(value["instrument"], "B-SOL_USDT");
        assert_eq!(value["timeframes"]["1D"]["bars"], 0);
    }
}
