//! Batch stages: series listing, closing lines, sportsbook odds, plus the
//! odds connectivity check and the single-event lookup.
//!
//! Each `collect_*` function is pure pipeline logic over a source trait and
//! returns the records plus a [`RunReport`]. The `*_stage` functions wire in
//! the HTTP clients and files from [`Config`] and are what the binaries call.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{odds_markets, Config};
use crate::error::{AppError, FailureKind, Result};
use crate::fetcher::{fetch_all, KalshiClient, MarketSource};
use crate::latency::LatencyStats;
use crate::matcher::{find_snapshot, lookup_closing_line};
use crate::odds::{OddsApiClient, OddsSource};
use crate::output::{
    read_json, write_json, ClosingLinesFile, GameSeriesFile, OddsSampleFile, SeriesMarkets,
    SeriesMarketsFile, SportsbookOddsFile,
};
use crate::resolver::{resolve_teams, TeamTable};
use crate::timing::{format_timestamp, parse_timestamp, EventClock};
use crate::types::{ClosingLine, GameRecord, MarketStatus, SeriesInfo, Sport};

pub const ODDS_SOURCE_NAME: &str = "The Odds API";

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Ticker, series or game the failure belongs to
    pub item: String,
    #[serde(flatten)]
    pub kind: FailureKind,
}

/// Outcome of one batch stage. Item failures are recorded here and never abort the stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stage: &'static str,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    pub fn new(stage: &'static str) -> Self {
        Self { stage, ..Default::default() }
    }

    pub fn success(&mut self) {
        self.successful += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn fail(&mut self, item: impl Into<String>, kind: FailureKind) {
        self.failed += 1;
        self.failures.push(ItemFailure { item: item.into(), kind });
    }

    /// successful / (successful + failed); skipped items are left out.
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.successful + self.failed;
        (attempted > 0).then(|| self.successful as f64 * 100.0 / attempted as f64)
    }

    pub fn log_summary(&self, latency: &LatencyStats) {
        let rate = self
            .success_rate()
            .map(|r| format!("{r:.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            stage = self.stage,
            processed = self.processed,
            successful = self.successful,
            failed = self.failed,
            skipped = self.skipped,
            "[SUMMARY] {}: {} processed, {} ok, {} failed, {} skipped, success rate {rate} | latency {}",
            self.stage,
            self.processed,
            self.successful,
            self.failed,
            self.skipped,
            latency.summary(),
        );
        for f in self.failures.iter().take(20) {
            debug!(stage = self.stage, item = %f.item, "[SUMMARY] failed: {}", f.kind);
        }
        if self.failures.len() > 20 {
            debug!(stage = self.stage, "[SUMMARY] ... {} more failures", self.failures.len() - 20);
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Series markets
// ---------------------------------------------------------------------------

/// Fetch every contract of every series. A series whose walk stopped early
/// keeps its partial listing and is counted as failed.
pub async fn collect_series_markets(
    source: &dyn MarketSource,
    series: &[SeriesInfo],
    page_size: u32,
    delay: Duration,
) -> (BTreeMap<String, SeriesMarkets>, RunReport) {
    let mut report = RunReport::new("series-markets");
    let mut out = BTreeMap::new();

    for (i, info) in series.iter().enumerate() {
        report.processed += 1;
        info!(
            "[FETCH] [{}/{}] {} ({})",
            i + 1,
            series.len(),
            info.title,
            info.ticker
        );

        let fetched = fetch_all(source, &info.ticker, page_size, delay).await;
        match &fetched.error {
            Some(e) => report.fail(info.ticker.clone(), FailureKind::Transport(e.clone())),
            None => report.success(),
        }

        out.insert(
            info.ticker.clone(),
            SeriesMarkets {
                series_info: info.clone(),
                total_markets: fetched.contracts.len(),
                markets: fetched.contracts,
            },
        );
        pause(delay).await;
    }

    (out, report)
}

pub async fn run_series_markets(
    cfg: &Config,
    source: &dyn MarketSource,
    now: DateTime<Utc>,
) -> Result<(SeriesMarketsFile, RunReport)> {
    let series_file: GameSeriesFile = read_json(&cfg.game_series_file())?;
    let series = series_file.series(cfg.sport);
    if series.is_empty() {
        warn!(
            "[FETCH] {} lists no {} series",
            cfg.game_series_file().display(),
            cfg.sport.label()
        );
    }

    let (series_markets, report) = collect_series_markets(
        source,
        series,
        cfg.page_size,
        Duration::from_millis(cfg.kalshi_request_delay_ms),
    )
    .await;

    let file = SeriesMarketsFile::new(now, series_markets);
    write_json(&cfg.series_markets_file(), &file)?;

    for (status, count) in &file.statistics.overall {
        info!("[FETCH] {status}: {count}");
    }
    info!(
        series = file.total_series,
        markets = file.total_markets,
        "[FETCH] saved {}",
        cfg.series_markets_file().display()
    );
    Ok((file, report))
}

pub async fn series_markets_stage(cfg: &Config) -> Result<RunReport> {
    let client = KalshiClient::new(cfg)?;
    let (_, report) = run_series_markets(cfg, &client, Utc::now()).await?;
    report.log_summary(client.latency());
    Ok(report)
}

// ---------------------------------------------------------------------------
// Closing lines
// ---------------------------------------------------------------------------

/// Closing line for every finalized contract. Contracts in any other state are
/// skipped; those without a ticker or a parseable expiration count as failed.
pub async fn collect_closing_lines(
    source: &dyn MarketSource,
    clock: &EventClock,
    sport: Sport,
    markets: &SeriesMarketsFile,
    delay: Duration,
) -> (Vec<ClosingLine>, RunReport) {
    let mut report = RunReport::new("closing-lines");
    let mut lines = Vec::new();
    let total: usize = markets.series_markets.values().map(|s| s.markets.len()).sum();

    for (series_ticker, entry) in &markets.series_markets {
        for contract in &entry.markets {
            report.processed += 1;
            let progress = format!("[{}/{total}]", report.processed);

            if contract.status != Some(MarketStatus::Finalized) {
                let status = contract
                    .status
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                debug!(ticker = %contract.ticker, %status, "[CLOSING] {progress} skipped, not finalized");
                report.skip();
                continue;
            }

            let expiration = contract.expected_expiration_time.as_deref().unwrap_or("");
            if contract.ticker.is_empty() || expiration.is_empty() {
                warn!(ticker = %contract.ticker, "[CLOSING] {progress} missing ticker or expiration");
                report.fail(
                    contract.ticker.clone(),
                    FailureKind::InvalidContract("missing ticker or expected_expiration_time".to_string()),
                );
                continue;
            }

            let Some(times) = clock.event_times(expiration, sport) else {
                warn!(ticker = %contract.ticker, expiration, "[CLOSING] {progress} unusable expiration");
                report.fail(
                    contract.ticker.clone(),
                    FailureKind::InvalidContract(format!("unparseable or out-of-range expiration {expiration:?}")),
                );
                continue;
            };

            match lookup_closing_line(source, series_ticker, contract, &times).await {
                Ok(line) => {
                    info!(
                        ticker = %line.ticker,
                        close = ?line.price.close,
                        precision = %line.precision,
                        "[CLOSING] {progress} close price {}",
                        line.price.close.map(|c| format!("{c}c")).unwrap_or_else(|| "none".to_string())
                    );
                    lines.push(line);
                    report.success();
                }
                Err(kind) => {
                    warn!(ticker = %contract.ticker, "[CLOSING] {progress} {kind}");
                    report.fail(contract.ticker.clone(), kind);
                }
            }
            pause(delay).await;
        }
    }

    (lines, report)
}

pub async fn run_closing_lines(
    cfg: &Config,
    source: &dyn MarketSource,
    now: DateTime<Utc>,
) -> Result<(ClosingLinesFile, RunReport)> {
    let markets: SeriesMarketsFile = read_json(&cfg.series_markets_file())?;
    let clock = EventClock::from_config(cfg);

    let (closing_lines, report) = collect_closing_lines(
        source,
        &clock,
        cfg.sport,
        &markets,
        Duration::from_millis(cfg.kalshi_request_delay_ms),
    )
    .await;

    let file = ClosingLinesFile {
        collection_date: format_timestamp(now),
        description: format!(
            "Market prices {} minutes before game start (closing lines)",
            cfg.minutes_before
        ),
        total_markets_processed: report.processed,
        successful: report.successful,
        failed: report.failed,
        skipped: report.skipped,
        closing_lines,
    };
    write_json(&cfg.closing_lines_file(), &file)?;
    info!("[CLOSING] saved {}", cfg.closing_lines_file().display());
    Ok((file, report))
}

pub async fn closing_lines_stage(cfg: &Config) -> Result<RunReport> {
    let client = KalshiClient::new(cfg)?;
    let (_, report) = run_closing_lines(cfg, &client, Utc::now()).await?;
    report.log_summary(client.latency());
    Ok(report)
}

// ---------------------------------------------------------------------------
// Sportsbook odds
// ---------------------------------------------------------------------------

/// Settings for one sportsbook pass.
#[derive(Debug, Clone)]
pub struct SportsbookParams<'a> {
    pub sport: Sport,
    pub table: &'a TeamTable,
    pub minutes_before: chrono::Duration,
    pub delay: Duration,
    /// Targets after this instant cannot be served from history yet and are skipped.
    pub now: DateTime<Utc>,
}

/// Pair each closing line with the sportsbook snapshot at its target time.
pub async fn collect_sportsbook_odds(
    source: &dyn OddsSource,
    params: &SportsbookParams<'_>,
    lines: &[ClosingLine],
) -> (Vec<GameRecord>, RunReport) {
    let mut report = RunReport::new("sportsbook-odds");
    let mut records = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (i, line) in lines.iter().enumerate() {
        report.processed += 1;
        let progress = format!("[{}/{}]", i + 1, lines.len());

        if !seen.insert(line.ticker.as_str()) {
            debug!(ticker = %line.ticker, "[ODDS] {progress} duplicate ticker, skipped");
            report.skip();
            continue;
        }

        let matchup = match resolve_teams(line.subtitle.as_deref(), &line.ticker, params.table) {
            Ok(m) => m,
            Err(e) => {
                warn!(ticker = %line.ticker, "[ODDS] {progress} cannot resolve teams: {e}");
                report.fail(line.ticker.clone(), FailureKind::Resolution(e.to_string()));
                continue;
            }
        };

        let Some(game_start) = parse_timestamp(&line.game_start) else {
            warn!(ticker = %line.ticker, game_start = %line.game_start, "[ODDS] {progress} bad game start");
            report.fail(
                line.ticker.clone(),
                FailureKind::InvalidContract(format!("unparseable game_start {:?}", line.game_start)),
            );
            continue;
        };
        let target = game_start - params.minutes_before;
        if target > params.now {
            debug!(ticker = %line.ticker, "[ODDS] {progress} target in the future, skipped");
            report.skip();
            continue;
        }

        info!(
            ticker = %line.ticker,
            source = ?matchup.source,
            "[ODDS] {progress} {} @ {} at {}",
            matchup.away,
            matchup.home,
            format_timestamp(target)
        );

        let found = find_snapshot(
            source,
            params.sport,
            target,
            &matchup.home,
            &matchup.away,
            odds_markets::FULL,
            odds_markets::REGIONS,
        )
        .await;

        match found {
            Ok(m) => {
                let precision = m.precision(target);
                let record = GameRecord {
                    game_start: format_timestamp(game_start),
                    collection_time: format_timestamp(target),
                    collection_time_actual: m.snapshot_time.clone(),
                    precision,
                    kalshi_ticker: line.ticker.clone(),
                    kalshi_price: line.price.close,
                    kalshi_yes_bid: line.yes_bid.close,
                    kalshi_yes_ask: line.yes_ask.close,
                    snapshot: m.snapshot,
                };
                info!(
                    ticker = %line.ticker,
                    key = %record.key(),
                    bookmakers = record.snapshot.total_bookmakers,
                    %precision,
                    "[ODDS] {progress} collected"
                );
                records.push(record);
                report.success();
            }
            Err(kind) => {
                warn!(ticker = %line.ticker, "[ODDS] {progress} {kind}");
                report.fail(line.ticker.clone(), kind);
            }
        }
        pause(params.delay).await;
    }

    (records, report)
}

pub async fn run_sportsbook_odds(
    cfg: &Config,
    source: &dyn OddsSource,
    now: DateTime<Utc>,
) -> Result<(SportsbookOddsFile, RunReport)> {
    let closing: ClosingLinesFile = read_json(&cfg.closing_lines_file())?;
    let table = TeamTable::load(cfg.team_table_path.as_deref(), cfg.sport)?;

    log_quota(source, "before").await;

    let params = SportsbookParams {
        sport: cfg.sport,
        table: &table,
        minutes_before: cfg.minutes_before(),
        delay: Duration::from_millis(cfg.odds_request_delay_ms),
        now,
    };
    let (sportsbook_odds, report) =
        collect_sportsbook_odds(source, &params, &closing.closing_lines).await;

    let file = SportsbookOddsFile {
        collection_date: format_timestamp(now),
        description: format!(
            "Sportsbook odds {} minutes before {} game start",
            cfg.minutes_before,
            cfg.sport.label()
        ),
        source: ODDS_SOURCE_NAME.to_string(),
        total_games_processed: report.processed,
        successful: report.successful,
        failed: report.failed,
        skipped: report.skipped,
        sportsbook_odds,
    };
    write_json(&cfg.sportsbook_odds_file(), &file)?;
    info!("[ODDS] saved {}", cfg.sportsbook_odds_file().display());

    log_quota(source, "after").await;
    Ok((file, report))
}

pub async fn sportsbook_odds_stage(cfg: &Config) -> Result<RunReport> {
    let client = OddsApiClient::new(cfg)?;
    let (_, report) = run_sportsbook_odds(cfg, &client, Utc::now()).await?;
    report.log_summary(client.latency());
    Ok(report)
}

pub(crate) async fn log_quota(source: &dyn OddsSource, when: &str) {
    match source.usage().await {
        Ok(q) => info!(
            used = q.requests_used.as_deref().unwrap_or("?"),
            remaining = q.requests_remaining.as_deref().unwrap_or("?"),
            "[ODDS] quota {when}"
        ),
        Err(e) => warn!("[ODDS] quota check failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Connectivity check and event lookup
// ---------------------------------------------------------------------------

const SAMPLE_GAMES: usize = 3;
const SAMPLE_BOOKMAKERS: usize = 2;

/// Quota, current moneyline odds and a small sample written to disk.
pub async fn run_odds_check(
    cfg: &Config,
    source: &dyn OddsSource,
    now: DateTime<Utc>,
) -> Result<OddsSampleFile> {
    let usage = source.usage().await?;
    info!(
        used = usage.requests_used.as_deref().unwrap_or("?"),
        remaining = usage.requests_remaining.as_deref().unwrap_or("?"),
        "[ODDS] quota"
    );

    let games = source
        .current_odds(cfg.sport, odds_markets::MONEYLINE, odds_markets::REGIONS)
        .await?;
    info!(sport = %cfg.sport, games = games.len(), "[ODDS] current odds fetched");

    for g in games.iter().take(SAMPLE_GAMES) {
        info!(
            game_id = %g.id,
            commence = g.commence_time.as_deref().unwrap_or("?"),
            bookmakers = g.bookmakers.len(),
            "[ODDS] {} @ {}",
            g.away_team,
            g.home_team
        );
        for b in g.bookmakers.iter().take(SAMPLE_BOOKMAKERS) {
            let prices = b
                .markets
                .iter()
                .find(|m| m.key == "h2h")
                .map(|m| {
                    m.outcomes
                        .iter()
                        .map(|o| format!("{} {:+}", o.name, o.price))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            info!("[ODDS]   {}: {prices}", b.title.as_deref().unwrap_or(&b.key));
        }
    }

    let file = OddsSampleFile {
        timestamp: format_timestamp(now),
        total_games: games.len(),
        sample_games: games.into_iter().take(SAMPLE_GAMES).collect(),
        api_usage: usage,
    };
    write_json(&cfg.odds_sample_file(), &file)?;
    info!("[ODDS] sample saved to {}", cfg.odds_sample_file().display());
    Ok(file)
}

pub async fn odds_check_stage(cfg: &Config) -> Result<OddsSampleFile> {
    let client = OddsApiClient::new(cfg)?;
    let file = run_odds_check(cfg, &client, Utc::now()).await?;
    info!(latency = %client.latency().summary(), "[SUMMARY] odds-check");
    Ok(file)
}

/// Raw event document for `EVENT_TICKER`.
pub async fn event_details(cfg: &Config, source: &dyn MarketSource) -> Result<serde_json::Value> {
    let ticker = cfg
        .event_ticker
        .as_deref()
        .ok_or_else(|| AppError::Config("EVENT_TICKER is not set".to_string()))?;
    let event = source.event(ticker).await?;
    info!(event_ticker = ticker, "[FETCH] event loaded");
    Ok(event)
}
