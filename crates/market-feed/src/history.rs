use market_core::{Candle, HistorySource, MarketError, Timeframe, MAX_HISTORY_BARS};
use std::sync::Arc;

/// Bounded history fetch that always hands back a valid seed.
#[derive(Clone)]
pub struct HistoryLoader {
    source: Arc<dyn HistorySource>,
}

impl HistoryLoader {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self { source }
    }

    /// Load up to `count` most recent bars, ordered and deduplicated.
    pub async fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let limit = count.clamp(1, MAX_HISTORY_BARS);
        let raw = self.source.fetch_candles(symbol, timeframe, limit).await?;
        let fetched = raw.len();
        let bars = normalize(raw, limit);

        if bars.is_empty() {
            return Err(MarketError::EmptyHistory {
                symbol: symbol.to_string(),
                timeframe,
            });
        }

        if bars.len() != fetched {
            tracing::warn!(
                symbol,
                timeframe = timeframe.code(),
                "History normalized from {} to {} bars",
                fetched,
                bars.len()
            );
        }
        tracing::info!(symbol, timeframe = timeframe.code(), bars = bars.len(), "History loaded");

        Ok(bars)
    }

    /// Load with the timeframe's own lookback depth
    pub async fn load_default(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, MarketError> {
        self.load(symbol, timeframe, timeframe.lookback_bars()).await
    }
}

/// Drop malformed bars, sort by time, keep the last delivery per time and
/// the newest `limit` bars.
fn normalize(mut bars: Vec<Candle>, limit: usize) -> Vec<Candle> {
    bars.retain(Candle::is_well_formed);
    bars.sort_by_key(|bar| bar.time);

    let mut out: Vec<Candle> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(prev) if prev.time == bar.time => *prev = bar,
            _ => out.push(bar),
        }
    }

    if out.len() > limit {
        out.drain(..out.len() - limit);
    }
    out
}
