use async_trait::async_trait;
use market_core::{
    Candle, CandleSeries, CandleSink, ConnectionState, FeedSubscription, MarketError, MarketPair,
    PriceListener, SummaryStats, Timeframe,
};
use market_feed::{FeedConnection, FeedHandler, HistoryLoader, SubscriptionId};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::StreamStatus;

/// Series and bookkeeping guarded by the single-writer lock
#[derive(Default)]
struct LiveState {
    series: Option<CandleSeries>,
    subscription: Option<SubscriptionId>,
    last_price: Option<Decimal>,
}

struct LiveShared {
    state: Mutex<LiveState>,
    status: watch::Sender<StreamStatus>,
    sink: Arc<dyn CandleSink>,
    listener: Option<Arc<dyn PriceListener>>,
}

impl LiveShared {
    fn set_status(&self, status: StreamStatus) {
        tracing::debug!(status = %status.label(), "Live status");
        self.status.send_replace(status);
    }

    fn notify_price(&self, state: &mut LiveState) {
        let Some(series) = state.series.as_ref() else {
            return;
        };
        let Some(close) = series.last().map(|bar| bar.close) else {
            return;
        };
        if state.last_price == Some(close) {
            return;
        }
        state.last_price = Some(close);
        if let Some(listener) = &self.listener {
            listener.on_price(&series.pair().symbol, close);
        }
    }
}

#[async_trait]
impl FeedHandler for LiveShared {
    async fn on_state(&self, id: SubscriptionId, state: ConnectionState, error: Option<MarketError>) {
        let guard = self.state.lock().await;
        if guard.subscription != Some(id) {
            return;
        }
        let next = self.status.borrow().advance(state, error.map(|e| e.to_string()));
        self.set_status(next);
    }

    async fn on_candle(&self, id: SubscriptionId, candle: Candle) {
        let mut guard = self.state.lock().await;
        if guard.subscription != Some(id) {
            tracing::debug!(subscription = %id, time = candle.time, "Dropping bar from replaced subscription");
            return;
        }
        let Some(series) = guard.series.as_mut() else {
            return;
        };

        if series.upsert_tail(candle.clone()).is_accepted() {
            self.sink.update(&candle);
            self.notify_price(&mut guard);
        }
    }
}

/// Seeds a series from history and keeps its tail current from the feed.
///
/// Each activation owns a fresh series; switching symbol or timeframe tears
/// the previous one down completely before loading the next.
pub struct LiveStreamController {
    loader: HistoryLoader,
    feed: FeedConnection,
    shared: Arc<LiveShared>,
    pair: Option<MarketPair>,
}

impl LiveStreamController {
    pub fn new(
        loader: HistoryLoader,
        feed: FeedConnection,
        sink: Arc<dyn CandleSink>,
        listener: Option<Arc<dyn PriceListener>>,
    ) -> Self {
        let (status, _) = watch::channel(StreamStatus::default());
        Self {
            loader,
            feed,
            shared: Arc::new(LiveShared {
                state: Mutex::new(LiveState::default()),
                status,
                sink,
                listener,
            }),
            pair: None,
        }
    }

    /// Load history for `pair`, publish it, then start streaming its tail.
    pub async fn activate(&mut self, pair: MarketPair) -> Result<(), MarketError> {
        self.teardown().await;
        self.pair = Some(pair.clone());
        tracing::info!(pair = %pair, "Activating live stream");

        let mut series = CandleSeries::new(pair.clone());
        let seeded = match self.loader.load_default(&pair.symbol, pair.timeframe).await {
            Ok(bars) => series.seed(bars),
            Err(e) => Err(e),
        };
        if let Err(e) = seeded {
            tracing::warn!(pair = %pair, "Live activation failed: {}", e);
            self.shared
                .set_status(StreamStatus::new(ConnectionState::Idle, Some(e.to_string())));
            return Err(e);
        }

        let mut guard = self.shared.state.lock().await;
        self.shared.sink.set_all(series.snapshot());
        guard.series = Some(series);
        self.shared.notify_price(&mut guard);

        let handler: Arc<dyn FeedHandler> = self.shared.clone();
        let id = self.feed.subscribe(pair.clone(), handler);
        guard.subscription = Some(id);
        self.shared
            .set_status(StreamStatus::new(ConnectionState::Connecting, None));

        tracing::info!(pair = %pair, subscription = %id, "Live stream active");
        Ok(())
    }

    /// Reload the current symbol on another timeframe
    pub async fn set_timeframe(&mut self, timeframe: Timeframe) -> Result<(), MarketError> {
        let pair = self.require_pair()?;
        self.activate(MarketPair::new(pair.symbol, timeframe)).await
    }

    /// Reload on another symbol, keeping the timeframe
    pub async fn set_symbol(&mut self, symbol: &str) -> Result<(), MarketError> {
        let pair = self.require_pair()?;
        self.activate(MarketPair::new(symbol, pair.timeframe)).await
    }

    /// Stop streaming and drop the series
    pub async fn deactivate(&mut self) {
        self.teardown().await;
        self.pair = None;
    }

    async fn teardown(&mut self) {
        // cancel first so nothing from the old pair lands after the reset
        self.feed.unsubscribe();
        let mut guard = self.shared.state.lock().await;
        *guard = LiveState::default();
        self.shared.set_status(StreamStatus::default());
    }

    fn require_pair(&self) -> Result<MarketPair, MarketError> {
        self.pair
            .clone()
            .ok_or_else(|| MarketError::Config("no active symbol".to_string()))
    }

    pub fn pair(&self) -> Option<&MarketPair> {
        self.pair.as_ref()
    }

    pub fn status(&self) -> StreamStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscription(&self) -> Option<FeedSubscription> {
        self.feed.subscription()
    }

    pub async fn snapshot(&self) -> Vec<Candle> {
        let guard = self.shared.state.lock().await;
        guard.series.as_ref().map(CandleSeries::to_vec).unwrap_or_default()
    }

    pub async fn summary(&self) -> Option<SummaryStats> {
        let guard = self.shared.state.lock().await;
        guard
            .series
            .as_ref()
            .and_then(|series| SummaryStats::compute(series.snapshot()))
    }
}
