//! Point-in-time lookups against both providers.
//!
//! Both lookups fail closed: transport errors, empty payloads and misses come
//! back as a [`FailureKind`] for the caller to count.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{CANDLESTICK_PERIOD_MINUTES, CANDLESTICK_WINDOW_SECS};
use crate::error::FailureKind;
use crate::fetcher::MarketSource;
use crate::odds::OddsSource;
use crate::timing::{format_timestamp, from_unix, EventTimes};
use crate::types::{
    CandlestickSample, ClosingLine, Contract, OddsGame, OddsSnapshot, Precision, Sport,
};

// ---------------------------------------------------------------------------
// Candlestick backend
// ---------------------------------------------------------------------------

/// Sample whose close is nearest `target_ts`. Equal distances go to the earlier sample.
pub fn nearest_sample(samples: &[CandlestickSample], target_ts: i64) -> Option<&CandlestickSample> {
    samples
        .iter()
        .min_by_key(|s| (s.end_period_ts.abs_diff(target_ts), s.end_period_ts))
}

/// Closing line for one contract: the one-minute bucket nearest `times.target`
/// inside a ±5 minute window.
pub async fn lookup_closing_line(
    source: &dyn MarketSource,
    series_ticker: &str,
    contract: &Contract,
    times: &EventTimes,
) -> Result<ClosingLine, FailureKind> {
    let target_ts = times.target.timestamp();
    let samples = source
        .candlesticks(
            series_ticker,
            &contract.ticker,
            target_ts - CANDLESTICK_WINDOW_SECS,
            target_ts + CANDLESTICK_WINDOW_SECS,
            CANDLESTICK_PERIOD_MINUTES,
        )
        .await?;

    let Some(best) = nearest_sample(&samples, target_ts) else {
        return Err(FailureKind::LookupMiss(format!(
            "no candlesticks within {CANDLESTICK_WINDOW_SECS}s of {}",
            format_timestamp(times.target)
        )));
    };
    let price_time = from_unix(best.end_period_ts).ok_or_else(|| {
        FailureKind::InvalidContract(format!("candlestick ts {} out of range", best.end_period_ts))
    })?;

    debug!(
        ticker = %contract.ticker,
        samples = samples.len(),
        drift_secs = best.end_period_ts - target_ts,
        "[CLOSING] nearest candlestick"
    );

    Ok(ClosingLine {
        ticker: contract.ticker.clone(),
        game_start: format_timestamp(times.game_start),
        game_end: format_timestamp(times.game_end),
        target_time: Some(format_timestamp(times.target)),
        price_time: format_timestamp(price_time),
        price_time_unix: best.end_period_ts,
        price: best.price,
        yes_bid: best.yes_bid,
        yes_ask: best.yes_ask,
        volume: best.volume,
        open_interest: best.open_interest,
        precision: Precision::from_drift_secs(best.end_period_ts - target_ts),
        event_ticker: contract.event_ticker.clone(),
        subtitle: contract.subtitle.clone(),
        no_sub_title: contract.no_sub_title.clone(),
        yes_sub_title: contract.yes_sub_title.clone(),
        market_type: contract.market_type.clone(),
    })
}

// ---------------------------------------------------------------------------
// Historical odds backend
// ---------------------------------------------------------------------------

/// Case-insensitive containment in either direction. Empty names never match.
fn names_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// First game listing both teams, in either home/away order.
pub fn find_game_by_teams<'a>(
    games: &'a [OddsGame],
    team1: &str,
    team2: &str,
) -> Option<&'a OddsGame> {
    games.iter().find(|g| {
        (names_match(team1, &g.home_team) && names_match(team2, &g.away_team))
            || (names_match(team2, &g.home_team) && names_match(team1, &g.away_team))
    })
}

/// Snapshot of one game plus the instant the provider actually captured it.
#[derive(Debug, Clone)]
pub struct SnapshotMatch {
    pub snapshot: OddsSnapshot,
    pub snapshot_time: Option<String>,
}

impl SnapshotMatch {
    /// Distance between the provider's snapshot and the requested instant.
    /// Treated as exact when the provider does not report one.
    pub fn precision(&self, target: DateTime<Utc>) -> Precision {
        self.snapshot_time
            .as_deref()
            .and_then(crate::timing::parse_timestamp)
            .map(|t| Precision::from_drift_secs((t - target).num_seconds()))
            .unwrap_or_default()
    }
}

/// One historical request at `target`, then a fuzzy team match over the returned games.
pub async fn find_snapshot(
    source: &dyn OddsSource,
    sport: Sport,
    target: DateTime<Utc>,
    home_team: &str,
    away_team: &str,
    markets: &[&str],
    regions: &[&str],
) -> Result<SnapshotMatch, FailureKind> {
    let historical = source.historical_odds(sport, target, markets, regions).await?;

    if historical.games.is_empty() {
        return Err(FailureKind::LookupMiss(format!(
            "no games in snapshot at {}",
            format_timestamp(target)
        )));
    }

    let game = find_game_by_teams(&historical.games, home_team, away_team).ok_or_else(|| {
        FailureKind::LookupMiss(format!(
            "{away_team} @ {home_team} not among {} games at {}",
            historical.games.len(),
            format_timestamp(target)
        ))
    })?;

    Ok(SnapshotMatch {
        snapshot: OddsSnapshot::from_game(game),
        snapshot_time: historical.snapshot_time,
    })
}
