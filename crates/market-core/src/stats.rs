use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Candle;

/// Width of the rolling stats window
pub const STATS_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Ticker numbers derived from a series. Never stored independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub last_price: Decimal,
    /// Close of the last bar minus open of the first bar in the window
    pub change: Decimal,
    /// `change` relative to the window open, in percent (2 dp)
    pub change_pct: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub window_start: i64,
    pub bars_in_window: usize,
}

impl SummaryStats {
    /// Stats over the trailing 24h ending at the last bar.
    pub fn compute(bars: &[Candle]) -> Option<Self> {
        Self::compute_window(bars, STATS_WINDOW_SECS)
    }

    /// Stats over bars whose open time lies within `window_secs` of the last bar.
    pub fn compute_window(bars: &[Candle], window_secs: i64) -> Option<Self> {
        let last = bars.last()?;
        let cutoff = last.time.saturating_sub(window_secs);
        let start = bars.partition_point(|bar| bar.time <= cutoff);
        let window = &bars[start..];
        let first = window.first()?;

        let high = window.iter().map(|b| b.high).max()?;
        let low = window.iter().map(|b| b.low).min()?;

        let change = last.close - first.open;
        let change_pct = if first.open.is_zero() {
            Decimal::ZERO
        } else {
            (change / first.open * Decimal::ONE_HUNDRED).round_dp(2)
        };

        Some(Self {
            last_price: last.close,
            change,
            change_pct,
            high,
            low,
            window_start: first.time,
            bars_in_window: window.len(),
        })
    }
}
