//! Cross-source team resolution.
//!
//! Turns a contract's subtitle or ticker into a `(home, away)` pair of full
//! team names that can be compared against the odds provider's naming.
//!
//! Rules, first one that yields two distinct names wins:
//!
//! 1. subtitle `"Away @ Home"`
//! 2. subtitle `"Home vs Away"` (opposite order to `@`, kept as the provider writes it)
//! 3. ticker `SERIES-{YYMMMDD}{CODE1}{CODE2}-{WINNER}`

pub mod teams;

pub use teams::TeamTable;

use serde::Serialize;
use thiserror::Error;

/// Length of the `25NOV02` date prefix in the ticker's second segment.
const TICKER_DATE_PREFIX_LEN: usize = 7;

/// Shortest team code in any table.
const MIN_CODE_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchupSource {
    AtSeparator,
    VsSeparator,
    Ticker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matchup {
    pub home: String,
    pub away: String,
    pub source: MatchupSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("ticker {0:?} is not SERIES-DATETEAMS-WINNER")]
    MalformedTicker(String),

    #[error("no two table codes make up {codes:?} in ticker {ticker:?}")]
    UnknownCodes { ticker: String, codes: String },

    #[error("both sides resolve to {0:?}")]
    SameTeam(String),
}

/// Resolve home/away for one contract.
pub fn resolve_teams(
    subtitle: Option<&str>,
    ticker: &str,
    table: &TeamTable,
) -> Result<Matchup, ResolutionFailure> {
    if let Some(matchup) = subtitle.and_then(parse_subtitle) {
        return Ok(matchup);
    }
    parse_ticker(ticker, table)
}

fn parse_subtitle(subtitle: &str) -> Option<Matchup> {
    let subtitle = subtitle.trim();
    if subtitle.contains(" @ ") {
        let (away, home) = split_pair(subtitle, " @ ")?;
        return distinct(home, away, MatchupSource::AtSeparator);
    }
    if subtitle.contains(" vs ") {
        let (home, away) = split_pair(subtitle, " vs ")?;
        return distinct(home, away, MatchupSource::VsSeparator);
    }
    None
}

/// Exactly one separator with a non-empty name on each side.
fn split_pair<'a>(s: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let (left, right) = s.split_once(sep)?;
    if right.contains(sep) {
        return None;
    }
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left, right))
}

fn distinct(home: &str, away: &str, source: MatchupSource) -> Option<Matchup> {
    if home.eq_ignore_ascii_case(away) {
        return None;
    }
    Some(Matchup {
        home: home.to_string(),
        away: away.to_string(),
        source,
    })
}

fn parse_ticker(ticker: &str, table: &TeamTable) -> Result<Matchup, ResolutionFailure> {
    let malformed = || ResolutionFailure::MalformedTicker(ticker.to_string());

    let parts: Vec<&str> = ticker.split('-').collect();
    if parts.len() < 3 {
        return Err(malformed());
    }
    let codes = parts[1]
        .get(TICKER_DATE_PREFIX_LEN..)
        .filter(|c| c.len() >= 2 * MIN_CODE_LEN)
        .ok_or_else(malformed)?;
    let winner = parts[2];

    let (first, second) = split_codes(codes, table).ok_or_else(|| ResolutionFailure::UnknownCodes {
        ticker: ticker.to_string(),
        codes: codes.to_string(),
    })?;

    // Winner code names the home side. A winner matching neither half leaves
    // the first code as away.
    let (home_code, away_code) = if winner == first {
        (first, second)
    } else {
        (second, first)
    };

    if home_code == away_code {
        return Err(ResolutionFailure::SameTeam(home_code.to_string()));
    }

    match (table.full_name(home_code), table.full_name(away_code)) {
        (Some(home), Some(away)) => Ok(Matchup {
            home: home.to_string(),
            away: away.to_string(),
            source: MatchupSource::Ticker,
        }),
        _ => Err(ResolutionFailure::UnknownCodes {
            ticker: ticker.to_string(),
            codes: codes.to_string(),
        }),
    }
}

/// First split point where both halves are known codes.
fn split_codes<'a>(codes: &'a str, table: &TeamTable) -> Option<(&'a str, &'a str)> {
    (MIN_CODE_LEN..codes.len()).find_map(|i| {
        let first = codes.get(..i)?;
        let second = codes.get(i..)?;
        (table.contains(first) && table.contains(second)).then_some((first, second))
    })
}
