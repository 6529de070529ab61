use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::timing::format_timestamp;
use crate::types::{
    ClosingLine, Contract, GameRecord, LiveOddsRecord, OddsGame, QuotaUsage, SeriesInfo, Sport,
};

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Pretty-print `value` to `path`, creating parent directories. Written to a
/// sibling temp file first and renamed into place.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON input file. A missing file is [`AppError::MissingInput`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(AppError::MissingInput(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

// ---------------------------------------------------------------------------
// Series markets
// ---------------------------------------------------------------------------

/// `game_series.json`: series lists per league.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameSeriesFile {
    #[serde(default)]
    pub nfl_series: Vec<SeriesInfo>,
    #[serde(default)]
    pub nba_series: Vec<SeriesInfo>,
}

impl GameSeriesFile {
    pub fn series(&self, sport: Sport) -> &[SeriesInfo] {
        match sport {
            Sport::Nfl => &self.nfl_series,
            Sport::Nba => &self.nba_series,
        }
    }
}

/// status → count
pub type StatusCounts = BTreeMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusStatistics {
    pub by_series: BTreeMap<String, StatusCounts>,
    pub overall: StatusCounts,
}

impl StatusStatistics {
    pub fn from_series(series: &BTreeMap<String, SeriesMarkets>) -> Self {
        let mut stats = Self::default();
        for (ticker, entry) in series {
            let per_series = stats.by_series.entry(ticker.clone()).or_default();
            for contract in &entry.markets {
                let status = contract
                    .status
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                *per_series.entry(status.clone()).or_default() += 1;
                *stats.overall.entry(status).or_default() += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMarkets {
    pub series_info: SeriesInfo,
    pub total_markets: usize,
    pub markets: Vec<Contract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMarketsFile {
    pub fetch_date: String,
    pub total_series: usize,
    pub total_markets: usize,
    pub statistics: StatusStatistics,
    pub series_markets: BTreeMap<String, SeriesMarkets>,
}

impl SeriesMarketsFile {
    pub fn new(fetched_at: DateTime<Utc>, series_markets: BTreeMap<String, SeriesMarkets>) -> Self {
        Self {
            fetch_date: format_timestamp(fetched_at),
            total_series: series_markets.len(),
            total_markets: series_markets.values().map(|s| s.total_markets).sum(),
            statistics: StatusStatistics::from_series(&series_markets),
            series_markets,
        }
    }
}

// ---------------------------------------------------------------------------
// Closing lines / sportsbook odds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingLinesFile {
    pub collection_date: String,
    pub description: String,
    pub total_markets_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub closing_lines: Vec<ClosingLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SportsbookOddsFile {
    pub collection_date: String,
    pub description: String,
    pub source: String,
    pub total_games_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub sportsbook_odds: Vec<GameRecord>,
}

// ---------------------------------------------------------------------------
// Live odds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMasterFile {
    pub description: String,
    pub games: Vec<LiveOddsRecord>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub total_games: usize,
}

impl LiveMasterFile {
    pub fn empty(sport: Sport, minutes_before: i64) -> Self {
        Self {
            description: format!(
                "Live {} sportsbook odds collected {minutes_before} minutes before game start",
                sport.label()
            ),
            games: Vec::new(),
            last_updated: None,
            total_games: 0,
        }
    }

    pub fn push(&mut self, record: LiveOddsRecord, now: DateTime<Utc>) {
        self.games.push(record);
        self.total_games = self.games.len();
        self.last_updated = Some(format_timestamp(now));
    }
}

/// `odds_{home}_{away}_{YYYYmmdd_HHMM}.json`, spaces replaced so the name is shell-safe.
pub fn live_game_file_name(home: &str, away: &str, commence: DateTime<Utc>) -> String {
    let clean = |s: &str| s.trim().replace([' ', '/'], "_");
    format!(
        "odds_{}_{}_{}.json",
        clean(home),
        clean(away),
        commence.format("%Y%m%d_%H%M")
    )
}

/// `test_live_odds_sample.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsSampleFile {
    pub timestamp: String,
    pub total_games: usize,
    pub sample_games: Vec<OddsGame>,
    pub api_usage: QuotaUsage,
}

/// One record handed from a fired live job to the writer.
#[derive(Debug, Clone)]
pub struct LiveWrite {
    pub record: LiveOddsRecord,
    pub commence: DateTime<Utc>,
}

/// Sole writer of the live master file. Fired jobs send records over the
/// channel; each one lands in its own per-game file and is appended to the master.
///
/// The master is read from disk once, on the first record, and kept in memory
/// after that. Each record still rewrites the whole file, so one write costs
/// time proportional to the games collected so far in this run.
pub struct LiveWriter {
    game_dir: PathBuf,
    master_path: PathBuf,
    sport: Sport,
    minutes_before: i64,
    master: Option<LiveMasterFile>,
    rx: mpsc::Receiver<LiveWrite>,
}

impl LiveWriter {
    pub fn new(
        game_dir: PathBuf,
        master_path: PathBuf,
        sport: Sport,
        minutes_before: i64,
        rx: mpsc::Receiver<LiveWrite>,
    ) -> Self {
        Self { game_dir, master_path, sport, minutes_before, master: None, rx }
    }

    pub async fn run(mut self) {
        while let Some(write) = self.rx.recv().await {
            if let Err(e) = self.write(&write) {
                error!(
                    game_id = %write.record.snapshot.game_id,
                    "[LIVE] write error: {e}"
                );
            }
        }
    }

    fn load_master(&self) -> Result<LiveMasterFile> {
        if self.master_path.exists() {
            read_json(&self.master_path)
        } else {
            Ok(LiveMasterFile::empty(self.sport, self.minutes_before))
        }
    }

    fn write(&mut self, w: &LiveWrite) -> Result<()> {
        let snap = &w.record.snapshot;
        let path = self
            .game_dir
            .join(live_game_file_name(&snap.home_team, &snap.away_team, w.commence));
        write_json(&path, &w.record)?;

        let master = match self.master.take() {
            Some(m) => m,
            None => self.load_master()?,
        };
        let master = self.master.insert(master);
        master.push(w.record.clone(), Utc::now());
        write_json(&self.master_path, &*master)?;

        info!(
            game_id = %snap.game_id,
            bookmakers = snap.total_bookmakers,
            total_games = master.total_games,
            "[LIVE] saved {} @ {} to {}",
            snap.away_team,
            snap.home_team,
            path.display()
        );
        Ok(())
    }
}
