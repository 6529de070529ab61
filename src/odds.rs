//! Sportsbook odds provider client.
//!
//! Every response carries `x-requests-used` / `x-requests-remaining`; the
//! client logs them at debug level and hands them back with the body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::error::{check_status, AppError, Result};
use crate::latency::LatencyStats;
use crate::retry::RetryPolicy;
use crate::timing::format_timestamp;
use crate::types::{HistoricalOdds, HistoricalPayload, OddsGame, QuotaUsage, Sport};

const HEADER_REQUESTS_USED: &str = "x-requests-used";
const HEADER_REQUESTS_REMAINING: &str = "x-requests-remaining";

#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Market-wide snapshot as the provider saw it at `at`.
    async fn historical_odds(
        &self,
        sport: Sport,
        at: DateTime<Utc>,
        markets: &[&str],
        regions: &[&str],
    ) -> Result<HistoricalOdds>;

    /// Current pre-game odds for every listed game.
    async fn current_odds(
        &self,
        sport: Sport,
        markets: &[&str],
        regions: &[&str],
    ) -> Result<Vec<OddsGame>>;

    /// Quota counters, read from a cheap `GET /sports` call.
    async fn usage(&self) -> Result<QuotaUsage>;
}

pub struct OddsApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    latency: LatencyStats,
}

impl OddsApiClient {
    /// Fails with a config error when `ODDS_API_KEY` is unset.
    pub fn new(cfg: &Config) -> Result<Self> {
        let api_key = cfg.require_odds_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.odds_api_url.trim_end_matches('/').to_string(),
            api_key,
            retry: cfg.retry.clone(),
            latency: LatencyStats::new(),
        })
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    fn quota_seen(&self, headers: &HeaderMap) -> QuotaUsage {
        let quota = quota_from_headers(headers);
        if quota.requests_remaining.is_some() || quota.requests_used.is_some() {
            debug!(
                used = quota.requests_used.as_deref().unwrap_or("?"),
                remaining = quota.requests_remaining.as_deref().unwrap_or("?"),
                "[ODDS] quota"
            );
        }
        quota
    }

    /// GET with the api key attached. Returns the decoded body and the quota headers.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(T, QuotaUsage)> {
        let mut query: Vec<(&str, String)> = vec![("apiKey", self.api_key.clone())];
        query.extend(params.iter().cloned());
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), &query)
            .map_err(|e| AppError::Config(format!("invalid odds URL for {path}: {e}")))?;
        let shown = redacted(&url);

        let url = &url;
        let shown = shown.as_str();
        self.retry
            .run(shown, move || async move {
                let started = Instant::now();
                let resp = self.http.get(url.clone()).send().await?;
                self.latency.record(started.elapsed());

                let quota = self.quota_seen(resp.headers());
                check_status(resp.status(), shown)?;
                Ok((resp.json::<T>().await?, quota))
            })
            .await
    }
}

/// Request URL as it may appear in errors and logs: the path only, so the
/// `apiKey` query parameter never leaves the client.
fn redacted(url: &Url) -> String {
    url.path().to_string()
}

fn odds_params(markets: &[&str], regions: &[&str]) -> Vec<(&'static str, String)> {
    vec![
        ("markets", markets.join(",")),
        ("regions", regions.join(",")),
        ("oddsFormat", "american".to_string()),
        ("dateFormat", "iso".to_string()),
    ]
}

pub fn quota_from_headers(headers: &HeaderMap) -> QuotaUsage {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    QuotaUsage {
        requests_used: read(HEADER_REQUESTS_USED),
        requests_remaining: read(HEADER_REQUESTS_REMAINING),
    }
}

#[async_trait]
impl OddsSource for OddsApiClient {
    async fn historical_odds(
        &self,
        sport: Sport,
        at: DateTime<Utc>,
        markets: &[&str],
        regions: &[&str],
    ) -> Result<HistoricalOdds> {
        let mut params = vec![("date", format_timestamp(at))];
        params.extend(odds_params(markets, regions));
        let path = format!("/historical/sports/{}/odds", sport.odds_key());
        let (payload, _): (HistoricalPayload, _) = self.get_json(&path, &params).await?;
        Ok(payload.into())
    }

    async fn current_odds(
        &self,
        sport: Sport,
        markets: &[&str],
        regions: &[&str],
    ) -> Result<Vec<OddsGame>> {
        let path = format!("/sports/{}/odds", sport.odds_key());
        let (games, _) = self.get_json(&path, &odds_params(markets, regions)).await?;
        Ok(games)
    }

    async fn usage(&self) -> Result<QuotaUsage> {
        let (_, quota): (serde_json::Value, _) = self.get_json("/sports", &[]).await?;
        Ok(quota)
    }
}
