use market_core::{Candle, CandleSink, PriceListener};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Headless rendering target: logs what a chart would draw.
#[derive(Default)]
pub struct LogSink {
    visible: AtomicUsize,
    updates: AtomicUsize,
}

impl LogSink {
    /// Bars in the last full redraw
    pub fn visible(&self) -> usize {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

impl CandleSink for LogSink {
    fn set_all(&self, candles: &[Candle]) {
        self.visible.store(candles.len(), Ordering::Relaxed);
        match candles.last() {
            Some(last) => tracing::debug!(
                bars = candles.len(),
                last_time = %format_time(last),
                close = %last.close,
                "Chart redraw"
            ),
            None => tracing::debug!("Chart cleared"),
        }
    }

    fn update(&self, candle: &Candle) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            time = %format_time(candle),
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            "Chart tail"
        );
    }
}

/// Logs the latest price whenever it moves
#[derive(Default)]
pub struct PriceTicker {
    last: Mutex<Option<(String, Decimal)>>,
}

impl PriceTicker {
    pub fn last(&self) -> Option<(String, Decimal)> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl PriceListener for PriceTicker {
    fn on_price(&self, symbol: &str, price: Decimal) {
        tracing::info!(symbol, price = %price, "Price");
        if let Ok(mut last) = self.last.lock() {
            *last = Some((symbol.to_string(), price));
        }
    }
}

fn format_time(candle: &Candle) -> String {
    candle
        .open_time()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| candle.time.to_string())
}
