use market_core::MarketError;
use std::env;
use std::time::Duration;

/// Same-origin fallback when no service URLs are configured
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";
pub const DEFAULT_RECONNECT_MS: u64 = 3_000;
pub const MIN_RECONNECT_MS: u64 = 250;
pub const MAX_RECONNECT_MS: u64 = 30_000;
pub const DEFAULT_HISTORY_TIMEOUT_SECS: u64 = 30;

/// Endpoints and timing for the history and streaming services
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub api_base_url: String,
    pub stream_base_url: String,
    pub reconnect_delay: Duration,
    pub history_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_ORIGIN.to_string(),
            stream_base_url: to_stream_scheme(DEFAULT_ORIGIN),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_MS),
            history_timeout: Duration::from_secs(DEFAULT_HISTORY_TIMEOUT_SECS),
        }
    }
}

impl FeedConfig {
    /// Resolve from the process environment
    pub fn from_env() -> Result<Self, MarketError> {
        Self::resolve_with(|key| env::var(key).ok())
    }

    /// Resolve using `lookup` for each variable. Empty values count as unset.
    pub fn resolve_with<F>(lookup: F) -> Result<Self, MarketError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let origin = get("APP_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let api_base_url = normalize_url(&get("MARKET_API_URL").unwrap_or(origin), "MARKET_API_URL")?;

        let stream_base_url = match get("MARKET_STREAM_URL") {
            Some(url) => normalize_url(&url, "MARKET_STREAM_URL")?,
            None => api_base_url.clone(),
        };
        let stream_base_url = to_stream_scheme(&stream_base_url);

        let reconnect_ms = match get("FEED_RECONNECT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| MarketError::Config(format!("FEED_RECONNECT_MS is not a number: {}", raw)))?,
            None => DEFAULT_RECONNECT_MS,
        };
        let reconnect_ms = reconnect_ms.clamp(MIN_RECONNECT_MS, MAX_RECONNECT_MS);

        let timeout_secs = match get("HISTORY_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| MarketError::Config(format!("HISTORY_TIMEOUT_SECS is not a number: {}", raw)))?,
            None => DEFAULT_HISTORY_TIMEOUT_SECS,
        };

        Ok(Self {
            api_base_url,
            stream_base_url,
            reconnect_delay: Duration::from_millis(reconnect_ms),
            history_timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }
}

fn normalize_url(raw: &str, key: &str) -> Result<String, MarketError> {
    let url = raw.trim_end_matches('/');
    let known_scheme = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !known_scheme {
        return Err(MarketError::Config(format!("{} has no http(s)/ws(s) scheme: {}", key, raw)));
    }
    Ok(url.to_string())
}

fn to_stream_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<FeedConfig, MarketError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FeedConfig::resolve_with(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_to_same_origin() {
        let config = resolve(&[]).unwrap();
        assert_eq!(config, FeedConfig::default());
        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.stream_base_url, "ws://localhost:8080");
    }

    #[test]
    fn test_stream_url_follows_api_url() {
        let config = resolve(&[("MARKET_API_URL", "https://api.example.com/")]).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.stream_base_url, "wss://api.example.com");
    }

    #[test]
    fn test_explicit_urls_and_origin() {
        let config = resolve(&[
            ("APP_ORIGIN", "https://app.example.com"),
            ("MARKET_STREAM_URL", "wss://stream.example.com"),
        ])
        .unwrap();
        assert_eq!(config.api_base_url, "https://app.example.com");
        assert_eq!(config.stream_base_url, "wss://stream.example.com");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = resolve(&[("MARKET_API_URL", "  "), ("FEED_RECONNECT_MS", "")]).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_ORIGIN);
        assert_eq!(config.reconnect_delay, Duration::from_millis(DEFAULT_RECONNECT_MS));
    }

    #[test]
    fn test_reconnect_delay_is_bounded() {
        let fast = resolve(&[("FEED_RECONNECT_MS", "0")]).unwrap();
        assert_eq!(fast.reconnect_delay, Duration::from_millis(MIN_RECONNECT_MS));
        let slow = resolve(&[("FEED_RECONNECT_MS", "600000")]).unwrap();
        assert_eq!(slow.reconnect_delay, Duration::from_millis(MAX_RECONNECT_MS));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        assert!(matches!(
            resolve(&[("FEED_RECONNECT_MS", "soon")]),
            Err(MarketError::Config(_))
        ));
        assert!(matches!(
            resolve(&[("MARKET_API_URL", "localhost:8080")]),
            Err(MarketError::Config(_))
        ));
    }
}
