use crate::error::{CoinflipError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for any phase countdown, in seconds.
pub const MAX_PHASE_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Seconds the betting window stays open.
    pub betting_time: i64,
    /// Seconds the revealed outcome is shown before settlement.
    pub time_till_result: i64,
    /// Seconds the settled round is shown before the next one opens.
    pub next_game_delay: i64,
    /// Ticks between `online` broadcasts, 0 disables them.
    pub online_interval: u64,
    pub house_edge: f64,
    pub prices_file: Option<PathBuf>,
    pub start_balance: f64,
    pub history_limit: usize,
    pub tick_interval: Duration,
    pub pause_when_empty: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            betting_time: 3,
            time_till_result: 3,
            next_game_delay: 3,
            online_interval: 3,
            house_edge: 0.05,
            prices_file: None,
            start_balance: 100.0,
            history_limit: 10,
            tick_interval: Duration::from_secs(1),
            pause_when_empty: true,
        }
    }
}

impl GameConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Unset or empty keys keep
    /// their default; set keys must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            betting_time: parse_or(&get, "BETTING_TIME", defaults.betting_time)?,
            time_till_result: parse_or(&get, "TIME_TILL_RESULT", defaults.time_till_result)?,
            next_game_delay: parse_or(&get, "NEXT_GAME_DELAY", defaults.next_game_delay)?,
            online_interval: parse_or(&get, "ONLINE_INTERVAL", defaults.online_interval)?,
            house_edge: parse_or(&get, "HOUSE_EDGE", defaults.house_edge)?,
            prices_file: get("PRICES_FILE").map(PathBuf::from),
            start_balance: parse_or(&get, "START_BALANCE", defaults.start_balance)?,
            history_limit: parse_or(&get, "HISTORY_LIMIT", defaults.history_limit)?,
            tick_interval: Duration::from_millis(parse_or(
                &get,
                "TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?),
            pause_when_empty: parse_or(&get, "PAUSE_WHEN_EMPTY", defaults.pause_when_empty)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("BETTING_TIME", self.betting_time),
            ("TIME_TILL_RESULT", self.time_till_result),
            ("NEXT_GAME_DELAY", self.next_game_delay),
        ] {
            if !(1..=MAX_PHASE_SECONDS).contains(&value) {
                return Err(CoinflipError::config(format!(
                    "{} must be between 1 and {}, got {}",
                    key, MAX_PHASE_SECONDS, value
                )));
            }
        }

        if !(0.0..1.0).contains(&self.house_edge) {
            return Err(CoinflipError::config(format!(
                "HOUSE_EDGE must be in [0, 1), got {}",
                self.house_edge
            )));
        }

        if !self.start_balance.is_finite() || self.start_balance < 0.0 {
            return Err(CoinflipError::config("START_BALANCE must be a non-negative number"));
        }

        if self.history_limit == 0 {
            return Err(CoinflipError::config("HISTORY_LIMIT must be greater than 0"));
        }

        if self.tick_interval.is_zero() {
            return Err(CoinflipError::config("TICK_INTERVAL_MS must be greater than 0"));
        }

        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoinflipError::config(format!("{}={:?}: {}", key, raw, e))),
    }
}
