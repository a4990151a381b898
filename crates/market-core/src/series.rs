//! Ordered candle buffer shared by the live and replay modes.
//!
//! Times are strictly increasing. Only the last bar may change in place; a
//! bar older than the tail is dropped rather than reordering the series.

use crate::{Candle, MarketError, MarketPair};

/// What `upsert_tail` did with a bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Same time as the tail; the forming bar was replaced
    Replaced,
    /// Newer than the tail (or first bar); appended
    Appended,
    /// Older than the tail; dropped
    Stale,
    /// OHLC invariant violated; dropped
    Malformed,
}

impl UpsertOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpsertOutcome::Replaced | UpsertOutcome::Appended)
    }
}

#[derive(Debug, Clone)]
pub struct CandleSeries {
    pair: MarketPair,
    bars: Vec<Candle>,
}

impl CandleSeries {
    /// Empty series bound to `pair`
    pub fn new(pair: MarketPair) -> Self {
        Self {
            pair,
            bars: Vec::new(),
        }
    }

    /// Build a series from already-ordered bars
    pub fn from_bars(pair: MarketPair, bars: Vec<Candle>) -> Result<Self, MarketError> {
        let mut series = Self::new(pair);
        series.seed(bars)?;
        Ok(series)
    }

    pub fn pair(&self) -> &MarketPair {
        &self.pair
    }

    /// Replace every bar. On error the current contents are kept.
    pub fn seed(&mut self, bars: Vec<Candle>) -> Result<(), MarketError> {
        validate_seed(&bars)?;
        tracing::debug!(pair = %self.pair, bars = bars.len(), "Series seeded");
        self.bars = bars;
        Ok(())
    }

    /// Apply a live bar: replace the tail, append, or drop a stale one.
    pub fn upsert_tail(&mut self, bar: Candle) -> UpsertOutcome {
        if !bar.is_well_formed() {
            tracing::warn!(pair = %self.pair, time = bar.time, "Dropping malformed bar");
            return UpsertOutcome::Malformed;
        }

        match self.bars.last_mut() {
            Some(tail) if bar.time == tail.time => {
                *tail = bar;
                UpsertOutcome::Replaced
            }
            Some(tail) if bar.time < tail.time => {
                let diagnostic = MarketError::StaleUpdate {
                    incoming: bar.time,
                    tail: tail.time,
                };
                tracing::warn!(pair = %self.pair, "{}", diagnostic);
                UpsertOutcome::Stale
            }
            _ => {
                self.bars.push(bar);
                UpsertOutcome::Appended
            }
        }
    }

    /// First `n` bars; `n` is clamped to the series length.
    pub fn prefix(&self, n: usize) -> &[Candle] {
        &self.bars[..n.min(self.bars.len())]
    }

    pub fn snapshot(&self) -> &[Candle] {
        &self.bars
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.bars.clone()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Index of the first bar with `time >= ts`, or `len()` if none.
    pub fn position_at_or_after(&self, ts: i64) -> usize {
        self.bars.partition_point(|bar| bar.time < ts)
    }
}

fn validate_seed(bars: &[Candle]) -> Result<(), MarketError> {
    if let Some(bad) = bars.iter().find(|bar| !bar.is_well_formed()) {
        return Err(MarketError::InvalidSeed(format!(
            "bar at {} violates low <= open/close <= high",
            bad.time
        )));
    }

    if let Some(pair) = bars.windows(2).find(|w| w[1].time <= w[0].time) {
        return Err(MarketError::InvalidSeed(format!(
            "time {} does not follow {}",
            pair[1].time, pair[0].time
        )));
    }

    Ok(())
}
