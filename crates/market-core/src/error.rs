use thiserror::Error;

use crate::Timeframe;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// Diagnostic only. `CandleSeries::upsert_tail` never returns it.
    #[error("Stale update: bar at {incoming} is older than tail at {tail}")]
    StaleUpdate { incoming: i64, tail: i64 },

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("No history returned for {symbol} ({timeframe})")]
    EmptyHistory { symbol: String, timeframe: Timeframe },

    #[error("Invalid replay speed: {0}x")]
    InvalidSpeed(f64),

    #[error("Date out of range: {requested} is past the last bar ({last:?})")]
    DateOutOfRange { requested: i64, last: Option<i64> },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
