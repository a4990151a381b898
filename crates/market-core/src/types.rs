use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::MarketError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Bars shown on a fresh chart even when 24h needs fewer.
pub const DEFAULT_CHART_BARS: usize = 200;

/// Upper bound the history service accepts for `limit`.
pub const MAX_HISTORY_BARS: usize = 1_500;

/// OHLCV bar keyed by its open time (seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

impl Candle {
    pub fn new(time: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high`
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high
    }

    /// Open time as a UTC timestamp, `None` if out of chrono's range
    pub fn open_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// Bucket width of a candle series. Serialized as the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1")]
    Min1,
    #[serde(rename = "3")]
    Min3,
    #[serde(rename = "5")]
    Min5,
    #[serde(rename = "15")]
    Min15,
    #[serde(rename = "30")]
    Min30,
    #[serde(rename = "60")]
    Hour1,
    #[serde(rename = "120")]
    Hour2,
    #[serde(rename = "240")]
    Hour4,
    #[serde(rename = "D")]
    Day1,
    #[serde(rename = "W")]
    Week1,
}

impl Timeframe {
    /// Code used by the history and streaming services
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1",
            Timeframe::Min3 => "3",
            Timeframe::Min5 => "5",
            Timeframe::Min15 => "15",
            Timeframe::Min30 => "30",
            Timeframe::Hour1 => "60",
            Timeframe::Hour2 => "120",
            Timeframe::Hour4 => "240",
            Timeframe::Day1 => "D",
            Timeframe::Week1 => "W",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1D",
            Timeframe::Week1 => "1W",
        }
    }

    /// Width of one bar in seconds
    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::Min1 => 60,
            Timeframe::Min3 => 3 * 60,
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Min30 => 30 * 60,
            Timeframe::Hour1 => 3_600,
            Timeframe::Hour2 => 2 * 3_600,
            Timeframe::Hour4 => 4 * 3_600,
            Timeframe::Day1 => SECONDS_PER_DAY,
            Timeframe::Week1 => 7 * SECONDS_PER_DAY,
        }
    }

    /// Bars to request so a fresh series covers the 24h stats window.
    ///
    /// Short timeframes need many more bars for the same wall-clock span; the
    /// result never drops below [`DEFAULT_CHART_BARS`] and never exceeds
    /// [`MAX_HISTORY_BARS`].
    pub fn lookback_bars(&self) -> usize {
        let per_day = (SECONDS_PER_DAY / self.duration_secs()).max(1) as usize;
        (per_day + 1).clamp(DEFAULT_CHART_BARS, MAX_HISTORY_BARS)
    }

    /// All available timeframes
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Min1,
            Timeframe::Min3,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Min30,
            Timeframe::Hour1,
            Timeframe::Hour2,
            Timeframe::Hour4,
            Timeframe::Day1,
            Timeframe::Week1,
        ]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Timeframe::all()
            .into_iter()
            .find(|tf| tf.code().eq_ignore_ascii_case(code) || tf.label().eq_ignore_ascii_case(code))
            .ok_or_else(|| MarketError::Config(format!("Unknown timeframe: {}", s)))
    }
}

/// The (symbol, timeframe) a series or subscription is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketPair {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl MarketPair {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            timeframe,
        }
    }
}

impl std::fmt::Display for MarketPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe.label())
    }
}

/// Lifecycle of a streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

impl ConnectionState {
    /// Text for the status badge
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Live",
            ConnectionState::Closed | ConnectionState::Reconnecting => "Offline",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Ephemeral view of the feed bound to one pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub pair: MarketPair,
    pub state: ConnectionState,
}
