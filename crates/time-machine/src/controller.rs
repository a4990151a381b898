//! Deterministic playback over a fixed candle array.
//!
//! Only `prefix(index)` of the series is ever published. A single timer task
//! drives playback; pausing, seeking, resetting or dropping the controller
//! aborts it, and each start bumps an epoch so a tick that races the abort
//! finds itself stale and does nothing.

use chrono::{NaiveDate, NaiveTime};
use market_core::{Candle, CandleSeries, CandleSink, MarketError, MarketPair, PriceListener};
use market_feed::HistoryLoader;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::replay::{ReplayCursor, ReplayPhase, ReplaySpeed};

struct ReplayState {
    series: CandleSeries,
    seed: usize,
    index: usize,
    phase: ReplayPhase,
    speed: ReplaySpeed,
    epoch: u64,
    last_price: Option<Decimal>,
}

impl ReplayState {
    fn total(&self) -> usize {
        self.series.len()
    }

    fn cursor(&self) -> ReplayCursor {
        ReplayCursor {
            index: self.index,
            total: self.total(),
            playing: self.phase == ReplayPhase::Playing,
            speed_multiplier: self.speed.multiplier(),
        }
    }
}

struct Outputs {
    sink: Arc<dyn CandleSink>,
    listener: Option<Arc<dyn PriceListener>>,
}

impl Outputs {
    /// Push the visible prefix and report the price if it moved
    fn publish(&self, state: &mut ReplayState) {
        let visible = state.series.prefix(state.index);
        self.sink.set_all(visible);

        let Some(close) = visible.last().map(|bar| bar.close) else {
            return;
        };
        if state.last_price == Some(close) {
            return;
        }
        state.last_price = Some(close);
        if let Some(listener) = &self.listener {
            listener.on_price(&state.series.pair().symbol, close);
        }
    }

    /// Reveal one more bar. Returns true once the last bar is visible.
    fn advance(&self, state: &mut ReplayState) -> bool {
        if state.index < state.total() {
            state.index += 1;
            tracing::debug!(index = state.index, total = state.total(), "Replay step");
            self.publish(state);
        }
        let done = state.index >= state.total();
        if done {
            state.phase = ReplayPhase::AtEnd;
        }
        done
    }
}

struct Shared {
    state: Mutex<ReplayState>,
    outputs: Outputs,
}

pub struct ReplayController {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl ReplayController {
    /// Wrap a loaded series, revealing the first `seed` bars.
    ///
    /// `seed` is clamped to the series length.
    pub fn new(
        series: CandleSeries,
        seed: usize,
        sink: Arc<dyn CandleSink>,
        listener: Option<Arc<dyn PriceListener>>,
    ) -> Self {
        let seed = seed.min(series.len());
        let mut state = ReplayState {
            series,
            seed,
            index: seed,
            phase: ReplayPhase::Seeded,
            speed: ReplaySpeed::default(),
            epoch: 0,
            last_price: None,
        };
        let outputs = Outputs { sink, listener };
        outputs.publish(&mut state);

        tracing::info!(
            pair = %state.series.pair(),
            seed,
            total = state.total(),
            "Replay ready"
        );

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                outputs,
            }),
            timer: None,
        }
    }

    /// Fetch `count` bars for `pair` and build a controller over them
    pub async fn load(
        loader: &HistoryLoader,
        pair: MarketPair,
        count: usize,
        seed: usize,
        sink: Arc<dyn CandleSink>,
        listener: Option<Arc<dyn PriceListener>>,
    ) -> Result<Self, MarketError> {
        let bars = loader.load(&pair.symbol, pair.timeframe, count).await?;
        let series = CandleSeries::from_bars(pair, bars)?;
        Ok(Self::new(series, seed, sink, listener))
    }

    pub async fn step_forward(&mut self) -> ReplayCursor {
        let mut state = self.shared.state.lock().await;
        if state.index >= state.total() {
            return state.cursor();
        }
        if self.shared.outputs.advance(&mut state) {
            cancel_timer(&mut self.timer, &mut state);
            tracing::info!(total = state.total(), "Replay finished");
        } else if state.phase != ReplayPhase::Playing {
            state.phase = ReplayPhase::Paused;
        }
        state.cursor()
    }

    /// Hide the newest visible bar; never goes below the seed
    pub async fn step_back(&mut self) -> ReplayCursor {
        let mut state = self.shared.state.lock().await;
        if state.index > state.seed {
            state.index -= 1;
            self.shared.outputs.publish(&mut state);
        }
        if state.phase == ReplayPhase::AtEnd && state.index < state.total() {
            state.phase = ReplayPhase::Paused;
        }
        state.cursor()
    }

    /// Start automatic stepping. From the end, playback restarts at the seed.
    pub async fn play(&mut self) -> ReplayCursor {
        let mut state = self.shared.state.lock().await;
        if state.phase == ReplayPhase::Playing {
            return state.cursor();
        }

        if state.index >= state.total() {
            state.index = state.seed;
            self.shared.outputs.publish(&mut state);
        }
        if state.index >= state.total() {
            state.phase = ReplayPhase::AtEnd;
            return state.cursor();
        }

        cancel_timer(&mut self.timer, &mut state);
        state.phase = ReplayPhase::Playing;
        let epoch = state.epoch;
        self.timer = Some(tokio::spawn(run_timer(Arc::clone(&self.shared), epoch)));

        tracing::info!(index = state.index, speed = %state.speed, "Replay playing");
        state.cursor()
    }

    pub async fn pause(&mut self) -> ReplayCursor {
        let mut state = self.shared.state.lock().await;
        cancel_timer(&mut self.timer, &mut state);
        if state.phase == ReplayPhase::Playing {
            state.phase = ReplayPhase::Paused;
            tracing::info!(index = state.index, "Replay paused");
        }
        state.cursor()
    }

    /// Change the playback rate. Takes effect from the next tick and never
    /// starts playback on its own.
    pub async fn set_speed(&mut self, multiplier: f64) -> Result<ReplayCursor, MarketError> {
        let speed = ReplaySpeed::try_from(multiplier)?;
        let mut state = self.shared.state.lock().await;
        state.speed = speed;
        tracing::debug!(speed = %speed, "Replay speed changed");
        Ok(state.cursor())
    }

    /// Jump to the first bar at or after `ts` and pause there.
    pub async fn seek_to_time(&mut self, ts: i64) -> Result<ReplayCursor, MarketError> {
        let mut state = self.shared.state.lock().await;
        let position = state.series.position_at_or_after(ts);
        if position >= state.total() {
            return Err(MarketError::DateOutOfRange {
                requested: ts,
                last: state.series.last().map(|bar| bar.time),
            });
        }

        cancel_timer(&mut self.timer, &mut state);
        state.index = position.max(state.seed);
        state.phase = ReplayPhase::Paused;
        self.shared.outputs.publish(&mut state);

        tracing::info!(requested = ts, index = state.index, "Replay seek");
        Ok(state.cursor())
    }

    /// Seek to midnight UTC of `date`
    pub async fn seek_to_date(&mut self, date: NaiveDate) -> Result<ReplayCursor, MarketError> {
        let ts = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        self.seek_to_time(ts).await
    }

    /// Back to the seed with playback stopped
    pub async fn reset(&mut self) -> ReplayCursor {
        let mut state = self.shared.state.lock().await;
        cancel_timer(&mut self.timer, &mut state);
        state.index = state.seed;
        state.phase = ReplayPhase::Seeded;
        self.shared.outputs.publish(&mut state);
        state.cursor()
    }

    pub async fn cursor(&self) -> ReplayCursor {
        self.shared.state.lock().await.cursor()
    }

    pub async fn phase(&self) -> ReplayPhase {
        self.shared.state.lock().await.phase
    }

    pub async fn speed(&self) -> ReplaySpeed {
        self.shared.state.lock().await.speed
    }

    /// Bars currently revealed
    pub async fn visible(&self) -> Vec<Candle> {
        let state = self.shared.state.lock().await;
        state.series.prefix(state.index).to_vec()
    }

    /// Resolves once playback is no longer running
    pub async fn wait_stopped(&mut self) {
        if let Some(timer) = self.timer.take() {
            let _ = timer.await;
        }
    }
}

fn cancel_timer(timer: &mut Option<JoinHandle<()>>, state: &mut ReplayState) {
    state.epoch += 1;
    if let Some(timer) = timer.take() {
        timer.abort();
    }
}

impl Drop for ReplayController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(shared: Arc<Shared>, epoch: u64) {
    loop {
        // re-read every tick so a speed change applies to the next interval
        let interval = {
            let state = shared.state.lock().await;
            if state.epoch != epoch || state.phase != ReplayPhase::Playing {
                return;
            }
            state.speed.tick_interval()
        };
        tokio::time::sleep(interval).await;

        let mut state = shared.state.lock().await;
        if state.epoch != epoch || state.phase != ReplayPhase::Playing {
            return;
        }
        if shared.outputs.advance(&mut state) {
            tracing::info!(total = state.total(), "Replay finished");
            return;
        }
    }
}
