//! Yahoo Finance client for daily OHLCV bars.
//!
//! Uses the unofficial chart API. Requests are bounded by `period1`/`period2`
//! so one call returns exactly one chunk of history.

use crate::error::{AppError, Result};
use crate::sources::MarketDataSource;
use crate::types::DataRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const PROVIDER_ID: &str = "yahoo";

/// Yahoo Finance chart response.
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
struct YahooAdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

/// Normalize symbol for Yahoo Finance API.
/// Yahoo uses hyphens instead of dots for share classes (e.g., BRK-B not BRK.B)
fn normalize_yahoo_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace('.', "-")
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn value_at(series: &[Option<f64>], i: usize) -> f64 {
    series.get(i).copied().flatten().unwrap_or(0.0)
}

/// Parse a chart payload into records for `[from, to]`, newest first.
///
/// Rows outside the range or with a non-positive price are dropped. A result
/// without timestamps means the provider has no bars for the range.
pub fn parse_chart_response(
    symbol: &str,
    body: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DataRecord>> {
    let data: YahooChartResponse = serde_json::from_str(body)?;

    if let Some(error) = data.chart.error {
        return Err(AppError::Upstream(format!(
            "Yahoo API error: {} - {}",
            error.code, error.description
        )));
    }

    let result = data
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| AppError::Upstream("No results in response".to_string()))?;

    let timestamps = match result.timestamp {
        Some(ts) => ts,
        None => return Ok(Vec::new()),
    };

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Upstream("No quote data in response".to_string()))?;

    let opens = quote.open.unwrap_or_default();
    let highs = quote.high.unwrap_or_default();
    let lows = quote.low.unwrap_or_default();
    let closes = quote.close.unwrap_or_default();
    let volumes = quote.volume.unwrap_or_default();
    let adj_closes = result
        .indicators
        .adjclose
        .and_then(|a| a.into_iter().next())
        .and_then(|a| a.adjclose)
        .unwrap_or_default();

    let symbol = symbol.trim().to_uppercase();
    let mut records = Vec::with_capacity(timestamps.len());
    for (i, &timestamp) in timestamps.iter().enumerate() {
        let date = match DateTime::from_timestamp(timestamp, 0) {
            Some(dt) => dt.date_naive(),
            None => continue,
        };
        if date < from || date > to {
            continue;
        }

        let close = round4(value_at(&closes, i));
        let adjusted_close = match adj_closes.get(i).copied().flatten() {
            Some(adj) => round4(adj),
            None => close,
        };

        let record = DataRecord {
            symbol: symbol.clone(),
            date,
            open: round4(value_at(&opens, i)),
            high: round4(value_at(&highs, i)),
            low: round4(value_at(&lows, i)),
            close,
            adjusted_close,
            volume: volumes.get(i).copied().flatten().unwrap_or(0),
        };

        // Skip invalid data points
        if record.is_valid() {
            records.push(record);
        }
    }

    records.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(records)
}

/// Yahoo Finance API client.
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
}

impl YahooFinanceClient {
    /// Create a new Yahoo Finance client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| AppError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Candidate URLs, tried in order until one answers.
    fn endpoints(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Vec<String> {
        let period1 = from.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or(0);
        // period2 is exclusive, so end at the start of the day after `to`.
        let period2 = (to + ChronoDuration::days(1))
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(period1);

        vec![
            format!(
                "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&includePrePost=true&events=div%7Csplit",
                self.base_url, symbol, period1, period2
            ),
            format!(
                "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
                self.base_url, symbol, period1, period2
            ),
            format!(
                "{}/v7/finance/chart/{}?period1={}&period2={}&interval=1d",
                self.base_url, symbol, period1, period2
            ),
        ]
    }

    async fn fetch_endpoint(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Upstream(format!("rate limited: HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(AppError::Upstream(format!("HTTP {}", status)));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        let yahoo_symbol = normalize_yahoo_symbol(symbol);
        let mut last_error = AppError::Upstream("no endpoint attempted".to_string());

        for url in self.endpoints(&yahoo_symbol, from, to) {
            debug!("Fetching Yahoo Finance data: {}", url);

            let body = match self.fetch_endpoint(&url).await {
                Ok(body) => body,
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => {
                    warn!("Yahoo endpoint failed for {}: {}", yahoo_symbol, e);
                    last_error = e;
                    continue;
                }
            };

            match parse_chart_response(symbol, &body, from, to) {
                Ok(records) => return Ok(records),
                Err(e) => {
                    warn!("Yahoo response unusable for {}: {}", yahoo_symbol, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
