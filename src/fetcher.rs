use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{check_status, Result};
use crate::latency::LatencyStats;
use crate::retry::RetryPolicy;
use crate::types::{CandlestickSample, CandlesticksResponse, Contract, MarketsPage};

/// Read side of the prediction-market API. The HTTP client implements it;
/// tests substitute in-memory fakes.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// One page of `GET /markets?series_ticker=..`.
    async fn markets_page(
        &self,
        series_ticker: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MarketsPage>;

    /// `GET /series/{series}/markets/{ticker}/candlesticks` over `[start_ts, end_ts]`.
    async fn candlesticks(
        &self,
        series_ticker: &str,
        market_ticker: &str,
        start_ts: i64,
        end_ts: i64,
        period_minutes: u32,
    ) -> Result<Vec<CandlestickSample>>;

    /// Raw `GET /events/{event_ticker}` document.
    async fn event(&self, event_ticker: &str) -> Result<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// KalshiClient
// ---------------------------------------------------------------------------

pub struct KalshiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    latency: LatencyStats,
}

impl KalshiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.kalshi_api_url.trim_end_matches('/').to_string(),
            retry: cfg.retry.clone(),
            latency: LatencyStats::new(),
        })
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let http = &self.http;
        let latency = &self.latency;
        let url_ref = url.as_str();

        self.retry
            .run(path, move || async move {
                let started = Instant::now();
                let resp = http.get(url_ref).query(query).send().await?;
                latency.record(started.elapsed());

                check_status(resp.status(), url_ref)?;
                Ok(resp.json::<T>().await?)
            })
            .await
    }
}

#[async_trait]
impl MarketSource for KalshiClient {
    async fn markets_page(
        &self,
        series_ticker: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MarketsPage> {
        let mut query = vec![
            ("series_ticker", series_ticker.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        self.get_json("/markets", &query).await
    }

    async fn candlesticks(
        &self,
        series_ticker: &str,
        market_ticker: &str,
        start_ts: i64,
        end_ts: i64,
        period_minutes: u32,
    ) -> Result<Vec<CandlestickSample>> {
        let path = format!("/series/{series_ticker}/markets/{market_ticker}/candlesticks");
        let query = [
            ("start_ts", start_ts.to_string()),
            ("end_ts", end_ts.to_string()),
            ("period_interval", period_minutes.to_string()),
        ];
        let resp: CandlesticksResponse = self.get_json(&path, &query).await?;
        Ok(resp.candlesticks)
    }

    async fn event(&self, event_ticker: &str) -> Result<serde_json::Value> {
        self.get_json(&format!("/events/{event_ticker}"), &[]).await
    }
}

// ---------------------------------------------------------------------------
// Cursor pagination
// ---------------------------------------------------------------------------

/// Contracts of one series plus how the walk ended.
#[derive(Debug, Default)]
pub struct SeriesFetch {
    pub contracts: Vec<Contract>,
    pub pages: u32,
    /// Set when a page failed and the listing stops short.
    pub error: Option<String>,
}

impl SeriesFetch {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Walk every page of a series, following the provider cursor until it is absent or empty.
/// A cursor that comes back a second time ends the walk. So does a failed page;
/// contracts gathered so far are kept.
pub async fn fetch_all(
    source: &dyn MarketSource,
    series_ticker: &str,
    page_size: u32,
    page_delay: Duration,
) -> SeriesFetch {
    let mut out = SeriesFetch::default();
    let mut cursor: Option<String> = None;
    let mut visited: HashSet<String> = HashSet::new();

    loop {
        if out.pages > 0 && !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }

        let page = match source
            .markets_page(series_ticker, page_size, cursor.as_deref())
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    series = %series_ticker,
                    page = out.pages + 1,
                    "[FETCH] page failed, keeping {} contracts: {e}",
                    out.contracts.len()
                );
                out.error = Some(e.to_string());
                break;
            }
        };

        out.pages += 1;
        let received = page.markets.len();
        out.contracts.extend(page.markets);
        debug!(
            series = %series_ticker,
            page = out.pages,
            received,
            total = out.contracts.len(),
            "[FETCH] page received"
        );

        let next = page.cursor.filter(|c| !c.is_empty());
        match next {
            None => break,
            Some(c) if !visited.insert(c.clone()) => {
                warn!(series = %series_ticker, cursor = %c, "[FETCH] cursor seen before, stopping");
                break;
            }
            Some(c) => cursor = Some(c),
        }
    }

    info!(
        series = %series_ticker,
        pages = out.pages,
        contracts = out.contracts.len(),
        partial = out.is_partial(),
        "[FETCH] series complete"
    );
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory prediction market. Pages are served by cursor; a cursor listed
    /// in `fail_at` returns a 503.
    #[derive(Default)]
    pub(crate) struct FakeMarkets {
        pub pages: HashMap<String, Vec<MarketsPage>>,
        pub candles: HashMap<String, Vec<CandlestickSample>>,
        pub fail_candles: Vec<String>,
        pub fail_at: Option<(String, usize)>,
        pub calls: Mutex<Vec<String>>,
    }

    pub(crate) fn contract(ticker: &str, status: &str, expiration: Option<&str>) -> Contract {
        let mut v = serde_json::json!({ "ticker": ticker, "status": status });
        if let Some(exp) = expiration {
            v["expected_expiration_time"] = serde_json::json!(exp);
        }
        serde_json::from_value(v).unwrap()
    }

    pub(crate) fn page(tickers: &[&str], cursor: Option<&str>) -> MarketsPage {
        MarketsPage {
            markets: tickers.iter().map(|t| contract(t, "finalized", None)).collect(),
            cursor: cursor.map(str::to_string),
        }
    }

    #[async_trait]
    impl MarketSource for FakeMarkets {
        async fn markets_page(
            &self,
            series_ticker: &str,
            _limit: u32,
            cursor: Option<&str>,
        ) -> Result<MarketsPage> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{series_ticker}:{}", cursor.unwrap_or("")));
            let idx = cursor.map(|c| c.parse::<usize>().unwrap()).unwrap_or(0);
            if let Some((series, at)) = &self.fail_at {
                if series == series_ticker && *at == idx {
                    return Err(AppError::HttpStatus { status: 503, url: "fake".to_string() });
                }
            }
            Ok(self
                .pages
                .get(series_ticker)
                .and_then(|p| p.get(idx))
                .cloned()
                .unwrap_or_default())
        }

        async fn candlesticks(
            &self,
            series_ticker: &str,
            market_ticker: &str,
            start_ts: i64,
            end_ts: i64,
            _period_minutes: u32,
        ) -> Result<Vec<CandlestickSample>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("candles:{series_ticker}:{market_ticker}:{start_ts}:{end_ts}"));
            if self.fail_candles.iter().any(|t| t == market_ticker) {
                return Err(AppError::HttpStatus { status: 500, url: "fake".to_string() });
            }
            Ok(self
                .candles
                .get(market_ticker)
                .map(|c| {
                    c.iter()
                        .filter(|s| s.end_period_ts >= start_ts && s.end_period_ts <= end_ts)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn event(&self, event_ticker: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "event": { "event_ticker": event_ticker } }))
        }
    }

    #[tokio::test]
    async fn follows_cursor_until_absent() {
        let mut fake = FakeMarkets::default();
        fake.pages.insert(
            "KXNFLGAME".to_string(),
            vec![
                page(&["A", "B"], Some("1")),
                page(&["C"], Some("2")),
                page(&["D"], Some("")),
            ],
        );

        let fetched = fetch_all(&fake, "KXNFLGAME", 200, Duration::ZERO).await;
        let tickers: Vec<_> = fetched.contracts.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["A", "B", "C", "D"]);
        assert_eq!(fetched.pages, 3);
        assert!(!fetched.is_partial());
    }

    #[tokio::test]
    async fn failed_page_keeps_partial_results() {
        let mut fake = FakeMarkets::default();
        fake.pages.insert(
            "KXNBAGAME".to_string(),
            vec![page(&["A", "B"], Some("1")), page(&["C"], None)],
        );
        fake.fail_at = Some(("KXNBAGAME".to_string(), 1));

        let fetched = fetch_all(&fake, "KXNBAGAME", 200, Duration::ZERO).await;
        assert_eq!(fetched.contracts.len(), 2);
        assert!(fetched.is_partial());
    }

    #[tokio::test]
    async fn repeated_cursor_stops_the_walk() {
        let mut fake = FakeMarkets::default();
        fake.pages.insert(
            "S".to_string(),
            vec![page(&["A"], Some("1")), page(&["B"], Some("1"))],
        );

        let fetched = fetch_all(&fake, "S", 200, Duration::ZERO).await;
        assert_eq!(fetched.pages, 2);
        assert_eq!(fetched.contracts.len(), 2);
        assert_eq!(fake.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cursor_cycle_stops_the_walk() {
        let mut fake = FakeMarkets::default();
        fake.pages.insert(
            "S".to_string(),
            vec![
                page(&["A"], Some("1")),
                page(&["B"], Some("2")),
                page(&["C"], Some("1")),
            ],
        );

        let fetched = fetch_all(&fake, "S", 200, Duration::ZERO).await;
        assert_eq!(fetched.pages, 3);
        assert_eq!(fetched.contracts.len(), 3);
        assert!(!fetched.is_partial());
        assert_eq!(*fake.calls.lock().unwrap(), vec!["S:", "S:1", "S:2"]);
    }
}
