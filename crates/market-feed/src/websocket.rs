use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use market_core::{Candle, MarketError, MarketPair};
use reqwest::Url;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::FeedConfig;
use crate::connection::{CandleStream, FeedTransport};

/// Websocket transport: one connection per pair, one candle per text frame.
#[derive(Debug, Clone)]
pub struct WsTransport {
    stream_base_url: String,
}

impl WsTransport {
    pub fn new(stream_base_url: impl Into<String>) -> Self {
        Self {
            stream_base_url: stream_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.stream_base_url.clone())
    }

    pub fn url_for(&self, pair: &MarketPair) -> Result<Url, MarketError> {
        Url::parse_with_params(
            &format!("{}/ws/candles", self.stream_base_url),
            &[("symbol", pair.symbol.as_str()), ("timeframe", pair.timeframe.code())],
        )
        .map_err(|e| MarketError::Config(format!("bad stream url: {}", e)))
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, pair: &MarketPair) -> Result<CandleStream, MarketError> {
        let url = self.url_for(pair)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| MarketError::ConnectionError(e.to_string()))?;
        let (write, read) = ws_stream.split();
        tracing::info!(pair = %pair, "Connected to candle stream");

        Ok(frame_stream(write, read))
    }
}

/// Turn websocket frames into candles, answering pings on `write`.
///
/// A failed pong or socket error ends the connection with `ConnectionError`.
fn frame_stream<W, R, E>(write: W, read: R) -> CandleStream
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = futures_util::stream::unfold((write, read), |(mut write, mut read)| async move {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match decode_candle(&text) {
                    Ok(candle) => return Some((Ok(candle), (write, read))),
                    Err(e) => tracing::warn!("Skipping undecodable frame: {}", e),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        tracing::warn!("Pong failed: {}", e);
                        let err = MarketError::ConnectionError(format!("pong failed: {}", e));
                        return Some((Err(err), (write, read)));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Candle stream closed");
                    return None;
                }
                Some(Err(e)) => {
                    return Some((Err(MarketError::ConnectionError(e.to_string())), (write, read)));
                }
                _ => {}
            }
        }
    });

    Box::pin(stream)
}

/// Decode one text frame into the latest (possibly still open) bar.
pub fn decode_candle(text: &str) -> Result<Candle, MarketError> {
    serde_json::from_str::<Candle>(text).map_err(|e| MarketError::ConnectionError(format!("bad frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::Timeframe;
    use rust_decimal_macros::dec;

    #[test]
    fn test_url_carries_symbol_and_code() {
        let transport = WsTransport::new("wss://stream.example.com/");
        let pair = MarketPair::new("ethusdt", Timeframe::Hour4);
        assert_eq!(
            transport.url_for(&pair).unwrap().as_str(),
            "wss://stream.example.com/ws/candles?symbol=ETHUSDT&timeframe=240"
        );
    }

    #[test]
    fn test_url_encodes_symbol() {
        let transport = WsTransport::new("ws://localhost:8080");
        let pair = MarketPair::new("btc/usd&x=1", Timeframe::Day1);
        let url = transport.url_for(&pair).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/ws/candles?symbol=BTC%2FUSD%26X%3D1&timeframe=D"
        );
        let symbol = url.query_pairs().find(|(k, _)| k == "symbol").map(|(_, v)| v.into_owned());
        assert_eq!(symbol.as_deref(), Some("BTC/USD&X=1"));
    }

    #[test]
    fn test_decode_frame() {
        let candle = decode_candle(r#"{"time":1700000000,"open":10,"high":11,"low":9.5,"close":10.5,"volume":3}"#)
            .unwrap();
        assert_eq!(candle.time, 1_700_000_000);
        assert_eq!(candle.low, dec!(9.5));
        assert_eq!(candle.volume, Some(dec!(3)));
    }

    const FRAME: &str = r#"{"time":60,"open":1,"high":2,"low":1,"close":2}"#;

    #[tokio::test]
    async fn test_frames_skip_garbage_and_end_on_close() {
        let read = futures_util::stream::iter(vec![
            Ok::<_, String>(Message::Ping(vec![1])),
            Ok(Message::Text("not json".to_string())),
            Ok(Message::Text(FRAME.to_string())),
            Ok(Message::Close(None)),
            Ok(Message::Text(FRAME.to_string())),
        ]);
        let mut stream = frame_stream(futures_util::sink::drain(), read);

        let candle = stream.next().await.unwrap().unwrap();
        assert_eq!(candle.time, 60);
        assert_eq!(candle.close, dec!(2));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_pong_ends_connection() {
        let read = futures_util::stream::iter(vec![
            Ok::<_, String>(Message::Ping(vec![1])),
            Ok(Message::Text(FRAME.to_string())),
        ]);
        let write = Box::pin(futures_util::sink::unfold((), |(), _: Message| async {
            Err::<(), String>("broken pipe".to_string())
        }));
        let mut stream = frame_stream(write, read);

        match stream.next().await {
            Some(Err(MarketError::ConnectionError(msg))) => assert!(msg.contains("broken pipe")),
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_candle("pong").is_err());
        assert!(decode_candle(r#"{"time":1}"#).is_err());
    }
}
