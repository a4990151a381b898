//! Streaming connection for one (symbol, timeframe) pair.
//!
//! `subscribe` spawns a single task that walks
//! `Connecting -> Open -> Closed -> Reconnecting -> Connecting ...` until
//! `unsubscribe` aborts it. The task handle is the only reconnect timer, so
//! tearing down can never leave an orphaned retry behind.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use market_core::{Candle, ConnectionState, FeedSubscription, MarketError, MarketPair};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type CandleStream = Pin<Box<dyn Stream<Item = Result<Candle, MarketError>> + Send>>;

/// Opens the wire connection for a pair
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, pair: &MarketPair) -> Result<CandleStream, MarketError>;
}

/// Receives everything a subscription produces, tagged with its id so
/// late events from a replaced subscription can be told apart.
#[async_trait]
pub trait FeedHandler: Send + Sync + 'static {
    async fn on_state(&self, id: SubscriptionId, state: ConnectionState, error: Option<MarketError>);
    async fn on_candle(&self, id: SubscriptionId, candle: Candle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ActiveFeed {
    id: SubscriptionId,
    pair: MarketPair,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

pub struct FeedConnection {
    transport: Arc<dyn FeedTransport>,
    reconnect_delay: Duration,
    next_id: u64,
    active: Option<ActiveFeed>,
}

impl FeedConnection {
    pub fn new(transport: Arc<dyn FeedTransport>, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            reconnect_delay,
            next_id: 0,
            active: None,
        }
    }

    /// Start streaming `pair`, replacing any current subscription.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&mut self, pair: MarketPair, handler: Arc<dyn FeedHandler>) -> SubscriptionId {
        self.unsubscribe();

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tracing::info!(pair = %pair, subscription = %id, "Feed subscribed");
        let task = tokio::spawn(run_feed(
            id,
            pair.clone(),
            Arc::clone(&self.transport),
            handler,
            self.reconnect_delay,
            state_tx,
        ));

        self.active = Some(ActiveFeed {
            id,
            pair,
            state: state_rx,
            task,
        });
        id
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            tracing::info!(pair = %active.pair, subscription = %active.id, "Feed unsubscribed");
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &self.active {
            Some(active) => *active.state.borrow(),
            None => ConnectionState::Idle,
        }
    }

    pub fn subscription(&self) -> Option<FeedSubscription> {
        self.active.as_ref().map(|active| FeedSubscription {
            pair: active.pair.clone(),
            state: *active.state.borrow(),
        })
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_feed(
    id: SubscriptionId,
    pair: MarketPair,
    transport: Arc<dyn FeedTransport>,
    handler: Arc<dyn FeedHandler>,
    reconnect_delay: Duration,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt: u32 = 0;
    loop {
        publish_state(handler.as_ref(), &state_tx, id, ConnectionState::Connecting, None).await;

        let failure = match transport.connect(&pair).await {
            Ok(mut stream) => {
                attempt = 0;
                tracing::info!(pair = %pair, subscription = %id, "Feed open");
                publish_state(handler.as_ref(), &state_tx, id, ConnectionState::Open, None).await;

                let mut failure = None;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(candle) => handler.on_candle(id, candle).await,
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                drop(stream);

                publish_state(handler.as_ref(), &state_tx, id, ConnectionState::Closed, failure.clone()).await;
                failure.unwrap_or_else(|| MarketError::ConnectionError("stream closed by server".to_string()))
            }
            Err(e) => e,
        };

        attempt = attempt.saturating_add(1);
        tracing::warn!(
            pair = %pair,
            subscription = %id,
            attempt,
            "Feed dropped: {}, reconnecting in {}ms",
            failure,
            reconnect_delay.as_millis()
        );
        publish_state(handler.as_ref(), &state_tx, id, ConnectionState::Reconnecting, Some(failure)).await;
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn publish_state(
    handler: &dyn FeedHandler,
    state_tx: &watch::Sender<ConnectionState>,
    id: SubscriptionId,
    state: ConnectionState,
    error: Option<MarketError>,
) {
    state_tx.send_replace(state);
    handler.on_state(id, state, error).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::Timeframe;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn bar(time: i64, close: Decimal) -> Candle {
        Candle::new(time, close, close, close, close)
    }

    /// In-memory transport: every connect opens a channel the test can feed.
    #[derive(Default)]
    struct ChannelTransport {
        connections: Mutex<Vec<(MarketPair, mpsc::UnboundedSender<Result<Candle, MarketError>>)>>,
        refuse: Mutex<u32>,
    }

    impl ChannelTransport {
        fn sender(&self, index: usize) -> mpsc::UnboundedSender<Result<Candle, MarketError>> {
            self.connections.lock().unwrap()[index].1.clone()
        }

        fn connect_count(&self) -> usize {
            self.connections.lock().unwrap().len()
        }

        fn pairs(&self) -> Vec<MarketPair> {
            self.connections.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl FeedTransport for ChannelTransport {
        async fn connect(&self, pair: &MarketPair) -> Result<CandleStream, MarketError> {
            {
                let mut refuse = self.refuse.lock().unwrap();
                if *refuse > 0 {
                    *refuse -= 1;
                    return Err(MarketError::ConnectionError("refused".to_string()));
                }
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.connections.lock().unwrap().push((pair.clone(), tx));
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(Box::pin(stream))
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(SubscriptionId, ConnectionState)>>,
        candles: Mutex<Vec<(SubscriptionId, Candle)>>,
    }

    #[async_trait]
    impl FeedHandler for Recorder {
        async fn on_state(&self, id: SubscriptionId, state: ConnectionState, _error: Option<MarketError>) {
            self.states.lock().unwrap().push((id, state));
        }

        async fn on_candle(&self, id: SubscriptionId, candle: Candle) {
            self.candles.lock().unwrap().push((id, candle));
        }
    }

    /// Let spawned tasks run; the paused clock only moves once they are idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn pair(symbol: &str, timeframe: Timeframe) -> MarketPair {
        MarketPair::new(symbol, timeframe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_opens_and_forwards_bars() {
        let transport = Arc::new(ChannelTransport::default());
        let recorder = Arc::new(Recorder::default());
        let mut feed = FeedConnection::new(transport.clone(), Duration::from_secs(3));

        assert_eq!(feed.state(), ConnectionState::Idle);
        let id = feed.subscribe(pair("BTCUSDT", Timeframe::Min1), recorder.clone());
        settle().await;

        assert_eq!(feed.state(), ConnectionState::Open);
        assert_eq!(feed.subscription().unwrap().pair.symbol, "BTCUSDT");

        transport.sender(0).send(Ok(bar(60, dec!(1)))).unwrap();
        transport.sender(0).send(Ok(bar(120, dec!(2)))).unwrap();
        settle().await;

        let candles = recorder.candles.lock().unwrap().clone();
        assert_eq!(candles.len(), 2);
        assert!(candles.iter().all(|(cid, _)| *cid == id));
        assert_eq!(
            recorder.states.lock().unwrap().clone(),
            vec![(id, ConnectionState::Connecting), (id, ConnectionState::Open)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let transport = Arc::new(ChannelTransport::default());
        let recorder = Arc::new(Recorder::default());
        let mut feed = FeedConnection::new(transport.clone(), Duration::from_secs(3));
        feed.subscribe(pair("BTCUSDT", Timeframe::Min1), recorder.clone());
        settle().await;

        transport
            .sender(0)
            .send(Err(MarketError::ConnectionError("reset".to_string())))
            .unwrap();
        settle().await;
        assert_eq!(feed.state(), ConnectionState::Reconnecting);
        assert_eq!(transport.connect_count(), 1);

        // not before the delay
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(transport.connect_count(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(feed.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_indefinitely_when_refused() {
        let transport = Arc::new(ChannelTransport::default());
        *transport.refuse.lock().unwrap() = 5;
        let recorder = Arc::new(Recorder::default());
        let mut feed = FeedConnection::new(transport.clone(), Duration::from_secs(3));
        feed.subscribe(pair("BTCUSDT", Timeframe::Min1), recorder.clone());

        settle().await;
        assert_eq!(feed.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(feed.state(), ConnectionState::Open);
        assert_eq!(transport.connect_count(), 1);

        let connecting = recorder
            .states
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == ConnectionState::Connecting)
            .count();
        assert_eq!(connecting, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_cancels_pending_reconnect() {
        let transport = Arc::new(ChannelTransport::default());
        let recorder = Arc::new(Recorder::default());
        let mut feed = FeedConnection::new(transport.clone(), Duration::from_secs(3));
        feed.subscribe(pair("BTCUSDT", Timeframe::Min1), recorder.clone());
        settle().await;

        drop(transport.connections.lock().unwrap().remove(0));
        settle().await;
        assert_eq!(feed.state(), ConnectionState::Reconnecting);

        feed.unsubscribe();
        feed.unsubscribe();
        assert_eq!(feed.state(), ConnectionState::Idle);
        assert!(feed.subscription().is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_pair_replaces_connection() {
        let transport = Arc::new(ChannelTransport::default());
        let recorder = Arc::new(Recorder::default());
        let mut feed = FeedConnection::new(transport.clone(), Duration::from_secs(3));

        let old = feed.subscribe(pair("BTCUSDT", Timeframe::Min1), recorder.clone());
        settle().await;
        let old_sender = transport.sender(0);

        let new = feed.subscribe(pair("BTCUSDT", Timeframe::Min5), recorder.clone());
        settle().await;
        assert_ne!(old, new);

        // the old channel is closed with its task
        assert!(old_sender.send(Ok(bar(60, dec!(1)))).is_err());
        transport.sender(1).send(Ok(bar(300, dec!(2)))).unwrap();
        settle().await;

        assert_eq!(transport.pairs()[1].timeframe, Timeframe::Min5);
        let candles = recorder.candles.lock().unwrap().clone();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].0, new);

        let new_connecting = recorder
            .states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, s)| *id == new && *s == ConnectionState::Connecting)
            .count();
        assert_eq!(new_connecting, 1);
    }
}
