pub mod config;
pub mod connection;
pub mod history;
pub mod websocket;

pub use config::FeedConfig;
pub use connection::{CandleStream, FeedConnection, FeedHandler, FeedTransport, SubscriptionId};
pub use history::HistoryLoader;
pub use websocket::WsTransport;

use async_trait::async_trait;
use market_core::{Candle, HistorySource, MarketError, Timeframe};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(2);

/// REST client for the historical candle service
#[derive(Clone)]
pub struct HistoryClient {
    base_url: String,
    client: Client,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.api_base_url.clone(), config.history_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying on 429.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, MarketError> {
        let request = builder.build().map_err(|e| MarketError::FetchError(e.to_string()))?;

        for attempt in 0..MAX_ATTEMPTS {
            let req_clone = request
                .try_clone()
                .ok_or_else(|| MarketError::FetchError("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| MarketError::FetchError(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            tracing::warn!(
                "History service rate limited, waiting {}s before retry {}/{}",
                RATE_LIMIT_WAIT.as_secs(),
                attempt + 1,
                MAX_ATTEMPTS
            );
            tokio::time::sleep(RATE_LIMIT_WAIT).await;
        }

        Err(MarketError::FetchError(format!(
            "Rate limited by history service after {} retries",
            MAX_ATTEMPTS
        )))
    }

    /// Get up to `limit` most recent candles, ascending by time
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let url = format!("{}/api/candles", self.base_url);

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.code().to_string()),
                ("limit", limit.to_string()),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::FetchError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let candles_response: CandlesResponse = response
            .json()
            .await
            .map_err(|e| MarketError::FetchError(e.to_string()))?;

        tracing::debug!(
            symbol,
            timeframe = timeframe.code(),
            bars = candles_response.candles.len(),
            "Fetched history"
        );

        Ok(candles_response.candles)
    }
}

#[async_trait]
impl HistorySource for HistoryClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        self.get_candles(symbol, timeframe, limit).await
    }
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<Candle>,
}
