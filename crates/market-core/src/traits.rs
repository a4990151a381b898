use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Candle, MarketError, Timeframe};

/// Rendering surface the engine publishes to.
///
/// `set_all` replaces every bar (seed, replay prefix change); `update`
/// upserts the last bar (live tail).
pub trait CandleSink: Send + Sync {
    fn set_all(&self, candles: &[Candle]);
    fn update(&self, candle: &Candle);
}

/// Notified with the latest close whenever it changes.
pub trait PriceListener: Send + Sync {
    fn on_price(&self, symbol: &str, price: Decimal);
}

/// Raw bounded history fetch for one pair
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError>;
}
