//! Time Machine
//!
//! Historical replay: reveal a fixed candle array bar by bar under
//! play/pause/step/seek control, hiding everything after the cursor.

pub mod controller;
pub mod replay;

pub use controller::ReplayController;
pub use replay::{ReplayCursor, ReplayPhase, ReplaySpeed, DEFAULT_REPLAY_BARS, DEFAULT_REPLAY_SEED};
