use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PRECISION_TOLERANCE_SECS;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Sport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Nfl,
    Nba,
}

impl Sport {
    /// Key of this league's series list inside `game_series.json`.
    pub fn series_key(&self) -> &'static str {
        match self {
            Sport::Nfl => "nfl_series",
            Sport::Nba => "nba_series",
        }
    }

    /// Sport key used by the odds provider.
    pub fn odds_key(&self) -> &'static str {
        match self {
            Sport::Nfl => "americanfootball_nfl",
            Sport::Nba => "basketball_nba",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sport::Nfl => "NFL",
            Sport::Nba => "NBA",
        }
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sport::Nfl => "nfl",
            Sport::Nba => "nba",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Sport {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nfl" => Ok(Sport::Nfl),
            "nba" => Ok(Sport::Nba),
            other => Err(AppError::Config(format!(
                "SPORT must be nfl or nba, got {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction-market contracts
// ---------------------------------------------------------------------------

/// Contract lifecycle as reported by the provider. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MarketStatus {
    Initialized,
    Active,
    Closed,
    Determined,
    Finalized,
    Settled,
    Other(String),
}

impl From<String> for MarketStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "initialized" => MarketStatus::Initialized,
            "active" => MarketStatus::Active,
            "closed" => MarketStatus::Closed,
            "determined" => MarketStatus::Determined,
            "finalized" => MarketStatus::Finalized,
            "settled" => MarketStatus::Settled,
            _ => MarketStatus::Other(s),
        }
    }
}

impl From<MarketStatus> for String {
    fn from(s: MarketStatus) -> Self {
        s.to_string()
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketStatus::Initialized => "initialized",
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Determined => "determined",
            MarketStatus::Finalized => "finalized",
            MarketStatus::Settled => "settled",
            MarketStatus::Other(s) => s,
        };
        write!(f, "{s}")
    }
}

/// One tradable yes/no contract. Fields the pipeline does not read are kept in
/// `extra` so the persisted listing matches what the provider returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub event_ticker: Option<String>,
    #[serde(default)]
    pub status: Option<MarketStatus>,
    #[serde(default)]
    pub expected_expiration_time: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub yes_sub_title: Option<String>,
    #[serde(default)]
    pub no_sub_title: Option<String>,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of `GET /markets`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketsPage {
    #[serde(default)]
    pub markets: Vec<Contract>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Entry of `game_series.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Candlesticks
// ---------------------------------------------------------------------------

/// Trade-price OHLC in cents. Null when nothing traded in the bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceOhlc {
    #[serde(default)]
    pub close: Option<i64>,
    #[serde(default)]
    pub open: Option<i64>,
    #[serde(default)]
    pub high: Option<i64>,
    #[serde(default)]
    pub low: Option<i64>,
    #[serde(default)]
    pub mean: Option<i64>,
}

/// Bid or ask OHLC in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteOhlc {
    #[serde(default)]
    pub close: Option<i64>,
    #[serde(default)]
    pub open: Option<i64>,
    #[serde(default)]
    pub high: Option<i64>,
    #[serde(default)]
    pub low: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandlestickSample {
    /// Unix seconds at which the bucket closed.
    pub end_period_ts: i64,
    #[serde(default)]
    pub price: PriceOhlc,
    #[serde(default)]
    pub yes_bid: QuoteOhlc,
    #[serde(default)]
    pub yes_ask: QuoteOhlc,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub open_interest: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandlesticksResponse {
    #[serde(default)]
    pub candlesticks: Vec<CandlestickSample>,
}

// ---------------------------------------------------------------------------
// Odds provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsOutcome {
    #[serde(default)]
    pub name: String,
    /// American odds.
    pub price: i32,
    /// Line for spreads and totals.
    #[serde(default)]
    pub point: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmakerMarket {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<OddsOutcome>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmaker {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub markets: Vec<BookmakerMarket>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One game as listed by the odds provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsGame {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub commence_time: Option<String>,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Historical endpoint body: usually wrapped with the snapshot timestamp, bare list on older plans.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoricalPayload {
    Wrapped {
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        data: Vec<OddsGame>,
    },
    Bare(Vec<OddsGame>),
}

/// Provider state of the whole market at one instant.
#[derive(Debug, Clone, Default)]
pub struct HistoricalOdds {
    /// Instant the provider actually snapshotted, when reported.
    pub snapshot_time: Option<String>,
    pub games: Vec<OddsGame>,
}

impl From<HistoricalPayload> for HistoricalOdds {
    fn from(p: HistoricalPayload) -> Self {
        match p {
            HistoricalPayload::Wrapped { timestamp, data } => Self {
                snapshot_time: timestamp,
                games: data,
            },
            HistoricalPayload::Bare(games) => Self {
                snapshot_time: None,
                games,
            },
        }
    }
}

/// Usage counters read from `x-requests-used` / `x-requests-remaining`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub requests_used: Option<String>,
    pub requests_remaining: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeQuote {
    pub price: i32,
    pub point: Option<f64>,
}

/// bookmaker → market key → outcome name → quote
pub type BookmakerOdds = BTreeMap<String, BTreeMap<String, BTreeMap<String, OutcomeQuote>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: Option<String>,
    pub bookmaker_odds: BookmakerOdds,
    pub total_bookmakers: usize,
    pub markets_collected: Vec<String>,
}

impl OddsSnapshot {
    pub fn from_game(game: &OddsGame) -> Self {
        let mut bookmaker_odds: BookmakerOdds = BTreeMap::new();
        for bookmaker in &game.bookmakers {
            let name = bookmaker
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .or_else(|| Some(bookmaker.key.clone()).filter(|k| !k.is_empty()))
                .unwrap_or_else(|| "unknown".to_string());
            let markets = bookmaker_odds.entry(name).or_default();
            for market in &bookmaker.markets {
                let outcomes = markets.entry(market.key.clone()).or_default();
                for outcome in &market.outcomes {
                    outcomes.insert(
                        outcome.name.clone(),
                        OutcomeQuote { price: outcome.price, point: outcome.point },
                    );
                }
            }
        }

        let mut markets_collected: Vec<String> = bookmaker_odds
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        markets_collected.sort();
        markets_collected.dedup();

        Self {
            game_id: game.id.clone(),
            home_team: game.home_team.clone(),
            away_team: game.away_team.clone(),
            commence_time: game.commence_time.clone(),
            total_bookmakers: bookmaker_odds.len(),
            bookmaker_odds,
            markets_collected,
        }
    }
}

// ---------------------------------------------------------------------------
// Output records
// ---------------------------------------------------------------------------

/// Whether the quote used lies within tolerance of the target time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Exact,
    Nearest,
}

impl Precision {
    pub fn from_drift_secs(drift: i64) -> Self {
        if drift.abs() <= PRECISION_TOLERANCE_SECS {
            Precision::Exact
        } else {
            Precision::Nearest
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Exact => write!(f, "exact"),
            Precision::Nearest => write!(f, "nearest"),
        }
    }
}

/// Contract price a few minutes before the estimated start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingLine {
    pub ticker: String,
    pub game_start: String,
    pub game_end: String,
    #[serde(default)]
    pub target_time: Option<String>,
    pub price_time: String,
    pub price_time_unix: i64,
    pub price: PriceOhlc,
    pub yes_bid: QuoteOhlc,
    pub yes_ask: QuoteOhlc,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub open_interest: i64,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub event_ticker: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub no_sub_title: Option<String>,
    #[serde(default)]
    pub yes_sub_title: Option<String>,
    #[serde(default)]
    pub market_type: Option<String>,
}

/// A contract paired with the sportsbook snapshot taken at its target time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    #[serde(flatten)]
    pub snapshot: OddsSnapshot,
    pub game_start: String,
    pub collection_time: String,
    pub collection_time_actual: Option<String>,
    pub precision: Precision,
    pub kalshi_ticker: String,
    pub kalshi_price: Option<i64>,
    pub kalshi_yes_bid: Option<i64>,
    pub kalshi_yes_ask: Option<i64>,
}

impl GameRecord {
    /// `(home, away, estimated start)` joined with `-`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.snapshot.home_team, self.snapshot.away_team, self.game_start
        )
    }
}

/// Odds captured by the live scheduler just before a game starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOddsRecord {
    #[serde(flatten)]
    pub snapshot: OddsSnapshot,
    pub collection_time: String,
    pub raw_data: OddsGame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_round_trips_verbatim() {
        let c: Contract = serde_json::from_str(
            r#"{"ticker":"T-1","status":"paused","last_price":42}"#,
        )
        .unwrap();
        assert_eq!(c.status, Some(MarketStatus::Other("paused".to_string())));
        assert_eq!(c.extra.get("last_price"), Some(&serde_json::json!(42)));

        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["status"], "paused");
        assert_eq!(v["last_price"], 42);
    }

    #[test]
    fn historical_payload_accepts_both_shapes() {
        let wrapped: HistoricalPayload = serde_json::from_str(
            r#"{"timestamp":"2025-11-02T17:55:00Z","data":[{"id":"g1","home_team":"A","away_team":"B"}]}"#,
        )
        .unwrap();
        let wrapped = HistoricalOdds::from(wrapped);
        assert_eq!(wrapped.snapshot_time.as_deref(), Some("2025-11-02T17:55:00Z"));
        assert_eq!(wrapped.games.len(), 1);

        let bare: HistoricalPayload =
            serde_json::from_str(r#"[{"id":"g1","home_team":"A","away_team":"B"}]"#).unwrap();
        let bare = HistoricalOdds::from(bare);
        assert!(bare.snapshot_time.is_none());
        assert_eq!(bare.games[0].id, "g1");
    }

    #[test]
    fn snapshot_groups_quotes_by_bookmaker_and_market() {
        let game: OddsGame = serde_json::from_str(
            r#"{
                "id": "abc",
                "commence_time": "2025-11-02T18:00:00Z",
                "home_team": "Washington Commanders",
                "away_team": "Seattle Seahawks",
                "bookmakers": [
                    {"key": "draftkings", "title": "DraftKings", "markets": [
                        {"key": "h2h", "outcomes": [
                            {"name": "Washington Commanders", "price": 120},
                            {"name": "Seattle Seahawks", "price": -140}
                        ]},
                        {"key": "spreads", "outcomes": [
                            {"name": "Washington Commanders", "price": -110, "point": 2.5}
                        ]}
                    ]},
                    {"key": "fanduel", "markets": [
                        {"key": "totals", "outcomes": [{"name": "Over", "price": -105, "point": 47.5}]}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        let snap = OddsSnapshot::from_game(&game);
        assert_eq!(snap.total_bookmakers, 2);
        assert_eq!(snap.markets_collected, vec!["h2h", "spreads", "totals"]);
        let dk = &snap.bookmaker_odds["DraftKings"];
        assert_eq!(dk["h2h"]["Seattle Seahawks"], OutcomeQuote { price: -140, point: None });
        assert_eq!(dk["spreads"]["Washington Commanders"].point, Some(2.5));
        // No title: falls back to the key
        assert!(snap.bookmaker_odds.contains_key("fanduel"));
    }

    #[test]
    fn precision_tolerance_is_five_minutes() {
        assert_eq!(Precision::from_drift_secs(0), Precision::Exact);
        assert_eq!(Precision::from_drift_secs(-300), Precision::Exact);
        assert_eq!(Precision::from_drift_secs(301), Precision::Nearest);
    }

    #[test]
    fn sport_parses_case_insensitively() {
        assert_eq!("NBA".parse::<Sport>().unwrap(), Sport::Nba);
        assert!("mlb".parse::<Sport>().is_err());
    }
}
