use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use market_core::{MarketPair, Timeframe};
use std::time::Duration;
use time_machine::{DEFAULT_REPLAY_BARS, DEFAULT_REPLAY_SEED};

pub const USAGE: &str = "\
Usage:
  chart-engine live   --symbol BTCUSDT --timeframe 5 [--duration-secs N]
  chart-engine replay --symbol BTCUSDT --timeframe D [--speed 5] [--seed 50] [--count 1000] [--seek YYYY-MM-DD]

Timeframes: 1 3 5 15 30 60 120 240 D W (or 1m, 4h, 1D, ...)
Speeds:     0.5 1 5 10";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Live {
        pair: MarketPair,
        /// Stop after this long instead of waiting for Ctrl-C
        duration: Option<Duration>,
    },
    Replay {
        pair: MarketPair,
        speed: f64,
        seed: usize,
        count: usize,
        seek: Option<NaiveDate>,
    },
}

/// Parse `args` as returned by `std::env::args()`, program name included.
pub fn parse(args: &[String]) -> Result<Command> {
    let mode = args.get(1).map(String::as_str);
    let symbol = value(args, "--symbol").ok_or_else(|| anyhow!("--symbol is required"))?;
    let timeframe: Timeframe = value(args, "--timeframe")
        .unwrap_or("5")
        .parse()
        .context("invalid --timeframe")?;
    let pair = MarketPair::new(symbol, timeframe);

    match mode {
        Some("live") => {
            let duration = value(args, "--duration-secs")
                .map(|v| v.parse::<u64>().context("invalid --duration-secs"))
                .transpose()?
                .map(Duration::from_secs);
            Ok(Command::Live { pair, duration })
        }
        Some("replay") => {
            let speed = parsed(args, "--speed", 1.0)?;
            let seed = parsed(args, "--seed", DEFAULT_REPLAY_SEED)?;
            let count = parsed(args, "--count", DEFAULT_REPLAY_BARS)?;
            let seek = value(args, "--seek")
                .map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").context("invalid --seek, expected YYYY-MM-DD"))
                .transpose()?;
            Ok(Command::Replay {
                pair,
                speed,
                seed,
                count,
                seek,
            })
        }
        Some(other) => bail!("unknown command: {}", other),
        None => bail!("missing command"),
    }
}

fn value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parsed<T>(args: &[String], flag: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value(args, flag) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {} {}", flag, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("chart-engine")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_live() {
        let cmd = parse(&args("live --symbol btcusdt --timeframe 15 --duration-secs 60")).unwrap();
        assert_eq!(
            cmd,
            Command::Live {
                pair: MarketPair::new("BTCUSDT", Timeframe::Min15),
                duration: Some(Duration::from_secs(60)),
            }
        );
    }

    #[test]
    fn test_parse_replay_defaults() {
        let cmd = parse(&args("replay --symbol ETHUSDT --timeframe D")).unwrap();
        assert_eq!(
            cmd,
            Command::Replay {
                pair: MarketPair::new("ETHUSDT", Timeframe::Day1),
                speed: 1.0,
                seed: DEFAULT_REPLAY_SEED,
                count: DEFAULT_REPLAY_BARS,
                seek: None,
            }
        );
    }

    #[test]
    fn test_parse_replay_options() {
        let cmd = parse(&args(
            "replay --symbol ETHUSDT --timeframe 1D --speed 5 --seed 20 --count 300 --seek 2024-03-01",
        ))
        .unwrap();
        match cmd {
            Command::Replay {
                speed,
                seed,
                count,
                seek,
                ..
            } => {
                assert_eq!(speed, 5.0);
                assert_eq!(seed, 20);
                assert_eq!(count, 300);
                assert_eq!(seek, NaiveDate::from_ymd_opt(2024, 3, 1));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&args("live --timeframe 5")).is_err());
        assert!(parse(&args("live --symbol BTCUSDT --timeframe 7")).is_err());
        assert!(parse(&args("replay --symbol BTCUSDT --seek 01/03/2024")).is_err());
        assert!(parse(&args("rewind --symbol BTCUSDT")).is_err());
        assert!(parse(&args("")).is_err());
    }
}
