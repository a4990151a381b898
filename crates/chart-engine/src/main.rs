//! chart-engine: headless candlestick engine.
//!
//! `live` seeds a chart from the history service and keeps its last bar
//! current from the candle stream; `replay` steps through a fixed history
//! window under play/pause/seek control.
//!
//! Usage:
//!   cargo run -p chart-engine -- live --symbol BTCUSDT --timeframe 5
//!   cargo run -p chart-engine -- replay --symbol BTCUSDT --timeframe D --speed 10 --seek 2024-03-01

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use live_stream::LiveStreamController;
use market_core::{CandleSink, MarketPair, PriceListener};
use market_feed::{FeedConfig, FeedConnection, HistoryClient, HistoryLoader, WsTransport};
use time_machine::ReplayController;
use tokio::signal::unix::SignalKind;

mod cli;
mod sink;

use cli::Command;
use sink::{LogSink, PriceTicker};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let args: Vec<String> = std::env::args().collect();
    let command = match cli::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e:#}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let config = FeedConfig::from_env().context("failed to load feed configuration")?;
    tracing::info!(
        api = %config.api_base_url,
        stream = %config.stream_base_url,
        reconnect_ms = config.reconnect_delay.as_millis() as u64,
        "Configuration loaded"
    );
    let loader = HistoryLoader::new(Arc::new(HistoryClient::from_config(&config)));

    match command {
        Command::Live { pair, duration } => run_live(&config, loader, pair, duration).await,
        Command::Replay {
            pair,
            speed,
            seed,
            count,
            seek,
        } => run_replay(loader, pair, speed, seed, count, seek).await,
    }
}

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "chart_engine=info,market_feed=info,live_stream=info,time_machine=info".into()
        })
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}

async fn run_live(
    config: &FeedConfig,
    loader: HistoryLoader,
    pair: MarketPair,
    duration: Option<Duration>,
) -> Result<()> {
    let sink = Arc::new(LogSink::default());
    let ticker = Arc::new(PriceTicker::default());
    let feed = FeedConnection::new(Arc::new(WsTransport::from_config(config)), config.reconnect_delay);
    let mut controller = LiveStreamController::new(
        loader,
        feed,
        Arc::clone(&sink) as Arc<dyn CandleSink>,
        Some(Arc::clone(&ticker) as Arc<dyn PriceListener>),
    );

    controller
        .activate(pair.clone())
        .await
        .with_context(|| format!("failed to activate {}", pair))?;
    tracing::info!(pair = %pair, bars = sink.visible(), "Live chart seeded");

    let mut status = controller.watch_status();
    let mut summary_tick = tokio::time::interval(SUMMARY_INTERVAL);
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.state.is_live() {
                    tracing::info!(pair = %pair, "Feed {}", current.label());
                } else {
                    tracing::warn!(pair = %pair, "Feed {}", current.label());
                }
            }
            _ = summary_tick.tick() => {
                if let Some(stats) = controller.summary().await {
                    tracing::info!(
                        pair = %pair,
                        last = %stats.last_price,
                        change = %stats.change,
                        change_pct = %stats.change_pct,
                        high = %stats.high,
                        low = %stats.low,
                        bars = stats.bars_in_window,
                        updates = sink.updates(),
                        "24h summary"
                    );
                }
            }
            _ = &mut deadline => {
                tracing::info!("Duration elapsed");
                break;
            }
            _ = &mut shutdown => break,
        }
    }

    controller.deactivate().await;
    tracing::info!(pair = %pair, updates = sink.updates(), "Live chart stopped");
    Ok(())
}

async fn run_replay(
    loader: HistoryLoader,
    pair: MarketPair,
    speed: f64,
    seed: usize,
    count: usize,
    seek: Option<chrono::NaiveDate>,
) -> Result<()> {
    let sink = Arc::new(LogSink::default());
    let ticker = Arc::new(PriceTicker::default());
    let mut replay = ReplayController::load(
        &loader,
        pair.clone(),
        count,
        seed,
        Arc::clone(&sink) as Arc<dyn CandleSink>,
        Some(Arc::clone(&ticker) as Arc<dyn PriceListener>),
    )
    .await
    .with_context(|| format!("failed to load replay history for {}", pair))?;

    replay.set_speed(speed).await?;
    if let Some(date) = seek {
        let cursor = replay
            .seek_to_date(date)
            .await
            .with_context(|| format!("cannot seek to {}", date))?;
        tracing::info!(date = %date, position = %cursor.label(), "Seeked");
    }

    let cursor = replay.play().await;
    tracing::info!(pair = %pair, position = %cursor.label(), speed, "Replay started");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let interrupted = tokio::select! {
        _ = replay.wait_stopped() => false,
        _ = &mut shutdown => true,
    };
    if interrupted {
        replay.pause().await;
    }

    let cursor = replay.cursor().await;
    tracing::info!(
        pair = %pair,
        position = %cursor.label(),
        progress = %format!("{:.0}%", cursor.progress() * 100.0),
        visible = sink.visible(),
        last_price = ?ticker.last().map(|(_, price)| price),
        "Replay stopped"
    );
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
}
