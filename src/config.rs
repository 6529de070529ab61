use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;
use crate::types::Sport;

pub const KALSHI_API_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
pub const ODDS_API_URL: &str = "https://api.the-odds-api.com/v4";

/// Max page size accepted by the markets endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Closing lines are sampled this many minutes before the estimated start.
pub const DEFAULT_MINUTES_BEFORE: i64 = 5;

/// Assumed gap between game start and contract expiration (2h30m).
/// An approximation: overtime or a late settlement pushes the real start earlier
/// than the estimate, with no upper bound on the error.
pub const DEFAULT_GAME_DURATION_MINUTES: i64 = 150;

/// Upper bound for the game duration and minutes-before settings (24h).
pub const MAX_OFFSET_MINUTES: i64 = 24 * 60;

/// Half-width of the candlestick query window around the target time.
pub const CANDLESTICK_WINDOW_SECS: i64 = 300;

/// Candlestick bucket width in minutes.
pub const CANDLESTICK_PERIOD_MINUTES: u32 = 1;

/// A quote further than this from the target time is recorded as `nearest`, not `exact`.
pub const PRECISION_TOLERANCE_SECS: i64 = 300;

/// Delay between successive prediction-market calls.
pub const KALSHI_REQUEST_DELAY_MS: u64 = 100;

/// Delay between successive odds-provider calls.
pub const ODDS_REQUEST_DELAY_MS: u64 = 500;

/// How often the live scheduler polls for upcoming games (seconds).
pub const LIVE_POLL_INTERVAL_SECS: u64 = 600;

/// Channel capacity between fired live jobs and the writer task.
pub const CHANNEL_CAPACITY: usize = 1024;

pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Odds markets requested for closing-line snapshots.
pub mod odds_markets {
    pub const FULL: &[&str] = &["h2h", "spreads", "totals"];
    pub const MONEYLINE: &[&str] = &["h2h"];
    pub const REGIONS: &[&str] = &["us"];
    pub const LIVE_REGIONS: &[&str] = &["us", "us2"];
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Root for all input and output JSON files (DATA_DIR)
    pub data_dir: PathBuf,
    /// League to collect (SPORT = nfl | nba)
    pub sport: Sport,
    pub kalshi_api_url: String,
    pub odds_api_url: String,
    /// Only required by the odds stages; see [`Config::require_odds_api_key`].
    pub odds_api_key: Option<String>,
    pub minutes_before: i64,
    pub nfl_game_duration_minutes: i64,
    pub nba_game_duration_minutes: i64,
    pub kalshi_request_delay_ms: u64,
    pub odds_request_delay_ms: u64,
    pub page_size: u32,
    pub http_timeout_secs: u64,
    /// JSON object of code → full team name replacing the built-in table (TEAM_TABLE_PATH)
    pub team_table_path: Option<PathBuf>,
    pub live_poll_interval_secs: u64,
    pub retry: RetryPolicy,
    /// Event looked up by the `kalshi-event` binary (EVENT_TICKER)
    pub event_ticker: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sport = match std::env::var("SPORT") {
            Ok(s) => s.parse::<Sport>()?,
            Err(_) => Sport::Nfl,
        };

        let page_size: u32 = env_parse("MARKETS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 || page_size > DEFAULT_PAGE_SIZE {
            return Err(AppError::Config(format!(
                "MARKETS_PAGE_SIZE must be between 1 and {DEFAULT_PAGE_SIZE}"
            )));
        }

        let minutes_before = check_range(
            "MINUTES_BEFORE",
            env_parse("MINUTES_BEFORE", DEFAULT_MINUTES_BEFORE)?,
            0,
            MAX_OFFSET_MINUTES,
        )?;
        let nfl_game_duration_minutes = check_range(
            "NFL_GAME_DURATION_MINUTES",
            env_parse("NFL_GAME_DURATION_MINUTES", DEFAULT_GAME_DURATION_MINUTES)?,
            1,
            MAX_OFFSET_MINUTES,
        )?;
        let nba_game_duration_minutes = check_range(
            "NBA_GAME_DURATION_MINUTES",
            env_parse("NBA_GAME_DURATION_MINUTES", DEFAULT_GAME_DURATION_MINUTES)?,
            1,
            MAX_OFFSET_MINUTES,
        )?;

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            sport,
            kalshi_api_url: std::env::var("KALSHI_API_URL")
                .unwrap_or_else(|_| KALSHI_API_URL.to_string()),
            odds_api_url: std::env::var("ODDS_API_URL")
                .unwrap_or_else(|_| ODDS_API_URL.to_string()),
            odds_api_key: non_empty_var("ODDS_API_KEY"),
            minutes_before,
            nfl_game_duration_minutes,
            nba_game_duration_minutes,
            kalshi_request_delay_ms: env_parse("KALSHI_REQUEST_DELAY_MS", KALSHI_REQUEST_DELAY_MS)?,
            odds_request_delay_ms: env_parse("ODDS_REQUEST_DELAY_MS", ODDS_REQUEST_DELAY_MS)?,
            page_size,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS)?,
            team_table_path: non_empty_var("TEAM_TABLE_PATH").map(PathBuf::from),
            live_poll_interval_secs: env_parse("LIVE_POLL_INTERVAL_SECS", LIVE_POLL_INTERVAL_SECS)?
                .max(1),
            retry: RetryPolicy::from_env()?,
            event_ticker: non_empty_var("EVENT_TICKER"),
        })
    }

    /// Key for the odds stages; unset is a config error.
    pub fn require_odds_api_key(&self) -> Result<&str> {
        self.odds_api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("ODDS_API_KEY is not set".to_string()))
    }

    /// Expiration-to-start offset for a sport.
    pub fn game_duration(&self, sport: Sport) -> Duration {
        match sport {
            Sport::Nfl => Duration::minutes(self.nfl_game_duration_minutes),
            Sport::Nba => Duration::minutes(self.nba_game_duration_minutes),
        }
    }

    pub fn minutes_before(&self) -> Duration {
        Duration::minutes(self.minutes_before)
    }

    pub fn game_series_file(&self) -> PathBuf {
        self.data_dir.join("game_series.json")
    }

    pub fn series_markets_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}_series_markets.json", self.sport))
    }

    pub fn closing_lines_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}_closing_lines.json", self.sport))
    }

    pub fn sportsbook_odds_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}_sportsbook_odds.json", self.sport))
    }

    pub fn live_odds_dir(&self) -> PathBuf {
        self.data_dir.join("live_odds")
    }

    pub fn live_master_file(&self) -> PathBuf {
        self.data_dir.join(format!("live_{}_odds.json", self.sport))
    }

    pub fn pending_jobs_file(&self) -> PathBuf {
        self.live_odds_dir().join("pending_jobs.json")
    }

    pub fn odds_sample_file(&self) -> PathBuf {
        self.data_dir.join("test_live_odds_sample.json")
    }
}

/// Read an env var, falling back to `default` when unset. A set-but-invalid value is an error.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// `value` when it lies in `min..=max`, a config error naming `key` otherwise.
fn check_range(key: &str, value: i64, min: i64, max: i64) -> Result<i64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::Config(format!(
            "{key} must be between {min} and {max}, got {value}"
        )))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
