use reqwest::StatusCode;
use thiserror::Error;

/// Why a single market-data request produced no data.
///
/// These never abort a run: the orchestrator turns each of them into an
/// absent timeframe (or an empty instrument list for discovery).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("provider returned no candles")]
    NoData,
    #[error("request limiter closed")]
    LimiterClosed,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transport(e)
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("need at least {required} bars, got {bars}")]
    InsufficientHistory { bars: usize, required: usize },
    #[error("series contains non-finite values")]
    NonFinite,
}
