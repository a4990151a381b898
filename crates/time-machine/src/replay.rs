//! Replay cursor and playback settings.

use market_core::MarketError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bars revealed before playback starts
pub const DEFAULT_REPLAY_SEED: usize = 50;

/// Bars fetched for a replay session unless asked otherwise
pub const DEFAULT_REPLAY_BARS: usize = 1_000;

/// Playback multipliers offered by the speed selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplaySpeed {
    Half,
    #[default]
    Normal,
    Fast,
    Turbo,
}

impl ReplaySpeed {
    pub fn all() -> [ReplaySpeed; 4] {
        [
            ReplaySpeed::Half,
            ReplaySpeed::Normal,
            ReplaySpeed::Fast,
            ReplaySpeed::Turbo,
        ]
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            ReplaySpeed::Half => 0.5,
            ReplaySpeed::Normal => 1.0,
            ReplaySpeed::Fast => 5.0,
            ReplaySpeed::Turbo => 10.0,
        }
    }

    /// Time between two automatic steps: one second at 1x
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis((1_000.0 / self.multiplier()) as u64)
    }
}

impl TryFrom<f64> for ReplaySpeed {
    type Error = MarketError;

    fn try_from(multiplier: f64) -> Result<Self, Self::Error> {
        ReplaySpeed::all()
            .into_iter()
            .find(|speed| speed.multiplier() == multiplier)
            .ok_or(MarketError::InvalidSpeed(multiplier))
    }
}

impl std::fmt::Display for ReplaySpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.multiplier())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayPhase {
    /// Fresh or reset; only the seed is visible
    Seeded,
    Playing,
    Paused,
    /// Every bar revealed; playback stopped itself
    AtEnd,
}

impl std::fmt::Display for ReplayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayPhase::Seeded => write!(f, "seeded"),
            ReplayPhase::Playing => write!(f, "playing"),
            ReplayPhase::Paused => write!(f, "paused"),
            ReplayPhase::AtEnd => write!(f, "at end"),
        }
    }
}

/// Position within a replay. Bars `[0, index)` are visible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayCursor {
    pub index: usize,
    pub total: usize,
    pub playing: bool,
    pub speed_multiplier: f64,
}

impl ReplayCursor {
    /// Fraction of the dataset revealed, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.index as f64 / self.total as f64
    }

    /// Counter text, e.g. `"600 / 1000"`
    pub fn label(&self) -> String {
        format!("{} / {}", self.index, self.total)
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_accepts_only_offered_multipliers() {
        assert_eq!(ReplaySpeed::try_from(5.0).unwrap(), ReplaySpeed::Fast);
        assert_eq!(ReplaySpeed::try_from(0.5).unwrap(), ReplaySpeed::Half);
        assert_eq!(ReplaySpeed::try_from(2.0), Err(MarketError::InvalidSpeed(2.0)));
        assert!(ReplaySpeed::try_from(0.0).is_err());
    }

    #[test]
    fn test_tick_interval_scales_with_speed() {
        assert_eq!(ReplaySpeed::Half.tick_interval(), Duration::from_millis(2_000));
        assert_eq!(ReplaySpeed::Normal.tick_interval(), Duration::from_millis(1_000));
        assert_eq!(ReplaySpeed::Fast.tick_interval(), Duration::from_millis(200));
        assert_eq!(ReplaySpeed::Turbo.tick_interval(), Duration::from_millis(100));
        assert_eq!(ReplaySpeed::Turbo.to_string(), "10x");
    }

    #[test]
    fn test_cursor_progress_and_label() {
        let cursor = ReplayCursor {
            index: 250,
            total: 1_000,
            playing: false,
            speed_multiplier: 1.0,
        };
        assert_eq!(cursor.label(), "250 / 1000");
        assert!((cursor.progress() - 0.25).abs() < f64::EPSILON);
        assert!(!cursor.at_end());

        let empty = ReplayCursor { total: 0, index: 0, ..cursor };
        assert_eq!(empty.progress(), 0.0);
    }
}
