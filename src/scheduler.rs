use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{odds_markets, Config, CHANNEL_CAPACITY};
use crate::error::{FailureKind, Result};
use crate::odds::{OddsApiClient, OddsSource};
use crate::output::{read_json, write_json, LiveWrite, LiveWriter};
use crate::pipeline::log_quota;
use crate::timing::{format_timestamp, parse_timestamp};
use crate::types::{LiveOddsRecord, OddsGame, OddsSnapshot, Sport};

/// One scheduled pre-game collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveJob {
    /// `{home}-{away}-{commence}`
    pub key: String,
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub collect_at: DateTime<Utc>,
}

pub fn job_key(home: &str, away: &str, commence: DateTime<Utc>) -> String {
    format!("{home}-{away}-{}", format_timestamp(commence))
}

/// Jobs for every game that has not started yet. Games without a parseable
/// commence time are ignored.
pub fn plan(games: &[OddsGame], now: DateTime<Utc>, minutes_before: chrono::Duration) -> Vec<LiveJob> {
    games
        .iter()
        .filter_map(|g| {
            let commence = g.commence_time.as_deref().and_then(parse_timestamp)?;
            if commence <= now {
                return None;
            }
            Some(LiveJob {
                key: job_key(&g.home_team, &g.away_team, commence),
                game_id: g.id.clone(),
                home_team: g.home_team.clone(),
                away_team: g.away_team.clone(),
                commence_time: commence,
                collect_at: commence.checked_sub_signed(minutes_before)?,
            })
        })
        .collect()
}

/// Fetch full current odds and pick this job's game out by provider id.
pub async fn collect_game(
    source: &dyn OddsSource,
    sport: Sport,
    job: &LiveJob,
    now: DateTime<Utc>,
) -> std::result::Result<LiveWrite, FailureKind> {
    let games = source
        .current_odds(sport, odds_markets::FULL, odds_markets::LIVE_REGIONS)
        .await?;
    let game = games
        .into_iter()
        .find(|g| g.id == job.game_id)
        .ok_or_else(|| FailureKind::LookupMiss(format!("game {} not in current odds", job.game_id)))?;

    Ok(LiveWrite {
        record: LiveOddsRecord {
            snapshot: OddsSnapshot::from_game(&game),
            collection_time: format_timestamp(now),
            raw_data: game,
        },
        commence: job.commence_time,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingJobsFile {
    saved_at: String,
    jobs: Vec<LiveJob>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub upcoming: usize,
    pub scheduled: usize,
    pub already_known: usize,
    pub passed: usize,
    /// Keys dropped from the registry because their game has started.
    pub expired: usize,
}

// ---------------------------------------------------------------------------
// LiveScheduler
// ---------------------------------------------------------------------------

/// Polls the provider for upcoming games and arms a one-shot timer per game at
/// `commence - minutes_before`. Fired jobs hand their record to [`LiveWriter`].
pub struct LiveScheduler {
    sport: Sport,
    minutes_before: chrono::Duration,
    poll_interval: Duration,
    pending_path: PathBuf,
    source: Arc<dyn OddsSource>,
    writer_tx: mpsc::Sender<LiveWrite>,
    /// key → commence time for every game scheduled by this process. A key is
    /// never scheduled twice; it is forgotten once its game has started.
    seen: DashMap<String, DateTime<Utc>>,
    /// Jobs whose timer has not fired yet.
    pending: Arc<DashMap<String, LiveJob>>,
}

impl LiveScheduler {
    pub fn new(cfg: &Config, source: Arc<dyn OddsSource>, writer_tx: mpsc::Sender<LiveWrite>) -> Self {
        Self {
            sport: cfg.sport,
            minutes_before: cfg.minutes_before(),
            poll_interval: Duration::from_secs(cfg.live_poll_interval_secs),
            pending_path: cfg.pending_jobs_file(),
            source,
            writer_tx,
            seen: DashMap::new(),
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.seen.contains_key(key)
    }

    /// Re-arm jobs left in the pending file by a previous process. Jobs whose
    /// collection time passed while nothing was running are logged and dropped.
    pub fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        if !self.pending_path.exists() {
            return Ok(0);
        }
        let saved: PendingJobsFile = read_json(&self.pending_path)?;
        let mut restored = 0;
        for job in saved.jobs {
            if job.collect_at <= now {
                warn!(
                    key = %job.key,
                    collect_at = %format_timestamp(job.collect_at),
                    "[LIVE] missed while stopped, dropping"
                );
                continue;
            }
            if self.register(job) {
                restored += 1;
            }
        }
        info!(restored, saved_at = %saved.saved_at, "[LIVE] pending jobs restored");
        self.persist(now)?;
        Ok(restored)
    }

    pub async fn run(self) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.poll(Utc::now()).await {
                Ok(s) => info!(
                    upcoming = s.upcoming,
                    scheduled = s.scheduled,
                    known = s.already_known,
                    passed = s.passed,
                    expired = s.expired,
                    pending = self.pending_count(),
                    "[LIVE] poll complete"
                ),
                Err(e) => error!("[LIVE] poll failed: {e}"),
            }
        }
    }

    pub async fn poll(&self, now: DateTime<Utc>) -> Result<PollSummary> {
        let games = self
            .source
            .current_odds(self.sport, odds_markets::MONEYLINE, odds_markets::REGIONS)
            .await?;
        let jobs = plan(&games, now, self.minutes_before);

        let before = self.seen.len();
        self.seen.retain(|_, commence| *commence > now);
        let mut summary = PollSummary {
            upcoming: jobs.len(),
            expired: before - self.seen.len(),
            ..Default::default()
        };
        for job in jobs {
            if self.seen.contains_key(&job.key) {
                summary.already_known += 1;
                continue;
            }
            if job.collect_at <= now {
                info!(key = %job.key, "[LIVE] collection time has passed for {} vs {}", job.home_team, job.away_team);
                summary.passed += 1;
                continue;
            }
            if self.register(job) {
                summary.scheduled += 1;
            }
        }

        self.persist(now)?;
        Ok(summary)
    }

    /// Record the job and spawn its timer. False if the key was already taken.
    fn register(&self, job: LiveJob) -> bool {
        if self.seen.contains_key(&job.key) {
            return false;
        }
        self.seen.insert(job.key.clone(), job.commence_time);
        info!(
            key = %job.key,
            collect_at = %format_timestamp(job.collect_at),
            "[LIVE] scheduled {} vs {}",
            job.home_team,
            job.away_team
        );
        self.pending.insert(job.key.clone(), job.clone());

        let source = Arc::clone(&self.source);
        let pending = Arc::clone(&self.pending);
        let writer_tx = self.writer_tx.clone();
        let sport = self.sport;
        tokio::spawn(async move {
            let wait = (job.collect_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            fire(source.as_ref(), sport, &job, &writer_tx).await;
            pending.remove(&job.key);
        });
        true
    }

    fn persist(&self, now: DateTime<Utc>) -> Result<()> {
        let mut jobs: Vec<LiveJob> = self.pending.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.collect_at.cmp(&b.collect_at).then_with(|| a.key.cmp(&b.key)));
        write_json(
            &self.pending_path,
            &PendingJobsFile { saved_at: format_timestamp(now), jobs },
        )
    }
}

async fn fire(
    source: &dyn OddsSource,
    sport: Sport,
    job: &LiveJob,
    writer_tx: &mpsc::Sender<LiveWrite>,
) {
    info!(key = %job.key, "[LIVE] collecting odds for {} vs {}", job.home_team, job.away_team);
    match collect_game(source, sport, job, Utc::now()).await {
        Ok(write) => {
            if let Err(e) = writer_tx.send(write).await {
                warn!(key = %job.key, "[LIVE] writer channel closed: {e}");
            }
        }
        Err(kind) => warn!(key = %job.key, "[LIVE] failed to collect odds: {kind}"),
    }
}

/// `live-odds` entry: writer task, restored timers, then the poll loop.
pub async fn live_odds_stage(cfg: &Config) -> Result<()> {
    let client = Arc::new(OddsApiClient::new(cfg)?);
    log_quota(client.as_ref(), "at start").await;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = LiveWriter::new(
        cfg.live_odds_dir(),
        cfg.live_master_file(),
        cfg.sport,
        cfg.minutes_before,
        rx,
    );
    tokio::spawn(writer.run());

    let scheduler = LiveScheduler::new(cfg, client, tx);
    scheduler.restore(Utc::now())?;
    info!(
        sport = %cfg.sport,
        interval_secs = cfg.live_poll_interval_secs,
        "[LIVE] scheduler started"
    );
    scheduler.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::odds::tests::{game, FakeOdds};

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn scheduler(dir: &std::path::Path, odds: FakeOdds) -> (LiveScheduler, mpsc::Receiver<LiveWrite>) {
        let cfg = test_config(dir.to_str().unwrap());
        let (tx, rx) = mpsc::channel(8);
        (LiveScheduler::new(&cfg, Arc::new(odds), tx), rx)
    }

    #[test]
    fn plan_keeps_only_future_games() {
        let games = vec![
            game("past", "A", "B", "2025-11-02T17:00:00Z"),
            game("soon", "C", "D", "2025-11-02T18:00:00Z"),
            game("nodate", "E", "F", "tbd"),
        ];
        let jobs = plan(&games, at("2025-11-02T17:30:00Z"), chrono::Duration::minutes(5));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].game_id, "soon");
        assert_eq!(jobs[0].key, "C-D-2025-11-02T18:00:00Z");
        assert_eq!(jobs[0].collect_at, at("2025-11-02T17:55:00Z"));
    }

    #[tokio::test]
    async fn poll_schedules_each_game_once() {
        let dir = tempfile::tempdir().unwrap();
        let odds = FakeOdds {
            current: vec![
                game("g1", "Dallas Cowboys", "Detroit Lions", "2099-01-01T18:00:00Z"),
                game("g2", "Chicago Bears", "Green Bay Packers", "2025-11-02T17:58:00Z"),
            ],
            ..Default::default()
        };
        let (s, _rx) = scheduler(dir.path(), odds);
        let now = at("2025-11-02T17:56:00Z");

        let first = s.poll(now).await.unwrap();
        assert_eq!(first, PollSummary { upcoming: 2, scheduled: 1, already_known: 0, passed: 1, expired: 0 });
        assert!(s.is_scheduled("Dallas Cowboys-Detroit Lions-2099-01-01T18:00:00Z"));

        let second = s.poll(now).await.unwrap();
        assert_eq!(second.scheduled, 0);
        assert_eq!(second.already_known, 1);
        assert_eq!(s.pending_count(), 1);

        let saved: PendingJobsFile = read_json(&dir.path().join("live_odds/pending_jobs.json")).unwrap();
        assert_eq!(saved.jobs.len(), 1);
        assert_eq!(saved.jobs[0].game_id, "g1");
    }

    #[tokio::test]
    async fn started_games_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let odds = FakeOdds {
            current: vec![game("g1", "Boston Celtics", "Miami Heat", "2025-11-02T18:00:00Z")],
            ..Default::default()
        };
        let (s, _rx) = scheduler(dir.path(), odds);
        let key = job_key("Boston Celtics", "Miami Heat", at("2025-11-02T18:00:00Z"));

        let first = s.poll(at("2025-11-02T17:00:00Z")).await.unwrap();
        assert_eq!(first.scheduled, 1);
        assert!(s.is_scheduled(&key));

        let later = s.poll(at("2025-11-02T18:30:00Z")).await.unwrap();
        assert_eq!(later.expired, 1);
        assert_eq!(later.upcoming, 0);
        assert!(!s.is_scheduled(&key));

        let again = s.poll(at("2025-11-02T19:00:00Z")).await.unwrap();
        assert_eq!(again.expired, 0);
    }

    #[tokio::test]
    async fn poll_failure_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let odds = FakeOdds { fail_current: true, ..Default::default() };
        let (s, _rx) = scheduler(dir.path(), odds);
        assert!(s.poll(at("2025-11-02T17:00:00Z")).await.is_err());
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test]
    async fn restore_rearms_future_jobs_and_drops_missed() {
        let dir = tempfile::tempdir().unwrap();
        let now = at("2025-11-02T12:00:00Z");
        let job = |id: &str, commence: &str| {
            let c = at(commence);
            LiveJob {
                key: job_key(id, "X", c),
                game_id: id.to_string(),
                home_team: id.to_string(),
                away_team: "X".to_string(),
                commence_time: c,
                collect_at: c - chrono::Duration::minutes(5),
            }
        };
        write_json(
            &dir.path().join("live_odds/pending_jobs.json"),
            &PendingJobsFile {
                saved_at: "2025-11-01T00:00:00Z".to_string(),
                jobs: vec![job("missed", "2025-11-02T11:00:00Z"), job("later", "2099-11-02T18:00:00Z")],
            },
        )
        .unwrap();

        let (s, _rx) = scheduler(dir.path(), FakeOdds::default());
        assert_eq!(s.restore(now).unwrap(), 1);
        assert_eq!(s.pending_count(), 1);
        assert!(s.is_scheduled(&job_key("later", "X", at("2099-11-02T18:00:00Z"))));

        let saved: PendingJobsFile = read_json(&dir.path().join("live_odds/pending_jobs.json")).unwrap();
        assert_eq!(saved.jobs.len(), 1);
    }

    #[tokio::test]
    async fn collect_game_matches_by_provider_id() {
        let odds = FakeOdds {
            current: vec![
                game("other", "Dallas Cowboys", "Detroit Lions", "2025-11-02T18:00:00Z"),
                game("g1", "Dallas Cowboys", "Detroit Lions", "2025-11-02T18:00:00Z"),
            ],
            ..Default::default()
        };
        let commence = at("2025-11-02T18:00:00Z");
        let job = LiveJob {
            key: job_key("Dallas Cowboys", "Detroit Lions", commence),
            game_id: "g1".to_string(),
            home_team: "Dallas Cowboys".to_string(),
            away_team: "Detroit Lions".to_string(),
            commence_time: commence,
            collect_at: commence - chrono::Duration::minutes(5),
        };

        let write = collect_game(&odds, Sport::Nfl, &job, at("2025-11-02T17:55:00Z")).await.unwrap();
        assert_eq!(write.record.snapshot.game_id, "g1");
        assert_eq!(write.record.raw_data.id, "g1");
        assert_eq!(write.record.collection_time, "2025-11-02T17:55:00Z");
        assert_eq!(*odds.requested.lock().unwrap(), vec!["current:h2h,spreads,totals".to_string()]);

        let gone = LiveJob { game_id: "g9".to_string(), ..job };
        let err = collect_game(&odds, Sport::Nfl, &gone, Utc::now()).await.unwrap_err();
        assert!(matches!(err, FailureKind::LookupMiss(_)));
    }

    #[tokio::test]
    async fn fired_job_reaches_the_writer() {
        let odds = FakeOdds {
            current: vec![game("g1", "Dallas Cowboys", "Detroit Lions", "2025-11-02T18:00:00Z")],
            ..Default::default()
        };
        let commence = at("2025-11-02T18:00:00Z");
        let job = LiveJob {
            key: "k".to_string(),
            game_id: "g1".to_string(),
            home_team: "Dallas Cowboys".to_string(),
            away_team: "Detroit Lions".to_string(),
            commence_time: commence,
            collect_at: commence,
        };
        let (tx, mut rx) = mpsc::channel(1);
        fire(&odds, Sport::Nfl, &job, &tx).await;
        let write = rx.recv().await.unwrap();
        assert_eq!(write.commence, commence);
        assert_eq!(write.record.snapshot.home_team, "Dallas Cowboys");
    }
}
