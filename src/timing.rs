//! Event-time estimation.
//!
//! Contracts only carry an expected expiration time. The game start is
//! estimated by subtracting a fixed per-sport duration, and the sampling
//! target sits a few minutes before that estimate.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::config::Config;
use crate::types::Sport;

/// Estimated start and sampling target for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimes {
    /// Expected expiration as reported by the provider.
    pub game_end: DateTime<Utc>,
    pub game_start: DateTime<Utc>,
    pub target: DateTime<Utc>,
}

/// Per-sport offsets, copied out of [`Config`] once per run.
#[derive(Debug, Clone, Copy)]
pub struct EventClock {
    nfl_duration: Duration,
    nba_duration: Duration,
    minutes_before: Duration,
}

impl EventClock {
    pub fn new(nfl_duration: Duration, nba_duration: Duration, minutes_before: Duration) -> Self {
        Self { nfl_duration, nba_duration, minutes_before }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.game_duration(Sport::Nfl),
            cfg.game_duration(Sport::Nba),
            cfg.minutes_before(),
        )
    }

    pub fn duration(&self, sport: Sport) -> Duration {
        match sport {
            Sport::Nfl => self.nfl_duration,
            Sport::Nba => self.nba_duration,
        }
    }

    /// `None` when the expiration is not a valid RFC 3339 timestamp.
    pub fn estimate_start(&self, expiration_iso: &str, sport: Sport) -> Option<DateTime<Utc>> {
        estimate_start(expiration_iso, self.duration(sport))
    }

    /// `None` when the expiration does not parse or an offset leaves chrono's range.
    pub fn event_times(&self, expiration_iso: &str, sport: Sport) -> Option<EventTimes> {
        let game_end = parse_timestamp(expiration_iso)?;
        let game_start = game_end.checked_sub_signed(self.duration(sport))?;
        let target = game_start.checked_sub_signed(self.minutes_before)?;
        Some(EventTimes { game_end, game_start, target })
    }
}

pub fn estimate_start(expiration_iso: &str, game_duration: Duration) -> Option<DateTime<Utc>> {
    parse_timestamp(expiration_iso)?.checked_sub_signed(game_duration)
}

/// Parse an RFC 3339 timestamp (`Z` or numeric offset) to UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Second-precision RFC 3339 with a `Z` suffix, the form the odds provider expects.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> EventClock {
        EventClock::new(Duration::minutes(150), Duration::minutes(150), Duration::minutes(5))
    }

    #[test]
    fn start_is_expiration_minus_offset() {
        let start = estimate_start("2025-11-26T07:00:00Z", Duration::minutes(150)).unwrap();
        assert_eq!(format_timestamp(start), "2025-11-26T04:30:00Z");
    }

    #[test]
    fn target_is_minutes_before_start() {
        let times = clock().event_times("2025-11-26T07:00:00Z", Sport::Nba).unwrap();
        assert_eq!(format_timestamp(times.game_end), "2025-11-26T07:00:00Z");
        assert_eq!(format_timestamp(times.game_start), "2025-11-26T04:30:00Z");
        assert_eq!(format_timestamp(times.target), "2025-11-26T04:25:00Z");
    }

    #[test]
    fn offsets_are_configurable_per_sport() {
        let clock = EventClock::new(Duration::hours(3), Duration::minutes(150), Duration::minutes(5));
        let nfl = clock.estimate_start("2025-10-26T20:00:00Z", Sport::Nfl).unwrap();
        let nba = clock.estimate_start("2025-10-26T20:00:00Z", Sport::Nba).unwrap();
        assert_eq!(format_timestamp(nfl), "2025-10-26T17:00:00Z");
        assert_eq!(format_timestamp(nba), "2025-10-26T17:30:00Z");
    }

    #[test]
    fn numeric_offsets_are_normalized_to_utc() {
        let start = estimate_start("2025-11-26T02:00:00-05:00", Duration::minutes(150)).unwrap();
        assert_eq!(format_timestamp(start), "2025-11-26T04:30:00Z");
    }

    #[test]
    fn oversized_offset_yields_none() {
        let clock = EventClock::new(
            Duration::minutes(1_000_000_000_000),
            Duration::minutes(150),
            Duration::minutes(5),
        );
        assert!(clock.event_times("2025-11-26T07:00:00Z", Sport::Nfl).is_none());
        assert!(clock.estimate_start("2025-11-26T07:00:00Z", Sport::Nfl).is_none());
        assert!(clock.event_times("2025-11-26T07:00:00Z", Sport::Nba).is_some());
    }

    #[test]
    fn garbage_expiration_yields_none() {
        assert!(clock().estimate_start("next tuesday", Sport::Nfl).is_none());
        assert!(clock().event_times("", Sport::Nfl).is_none());
    }
}
