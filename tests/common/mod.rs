//! Shared fakes and builders for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use gapsync::config::SyncConfig;
use gapsync::error::{AppError, Result};
use gapsync::services::{
    GapDetector, ProviderLimits, RateLimitGovernor, RecordStore, SqliteStore, SyncOrchestrator,
    TradingCalendar,
};
use gapsync::sources::MarketDataSource;
use gapsync::types::{DataRecord, SyncState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn record(symbol: &str, date: NaiveDate) -> DataRecord {
    DataRecord {
        symbol: symbol.to_string(),
        date,
        open: 100.0,
        high: 101.0,
        low: 99.0,
        close: 100.5,
        adjusted_close: 100.5,
        volume: 1_000_000,
    }
}

/// One record per trading day in `[from, to]`.
pub fn records_for(symbol: &str, calendar: &TradingCalendar, from: NaiveDate, to: NaiveDate) -> Vec<DataRecord> {
    calendar
        .generate(from, to)
        .into_iter()
        .map(|date| record(symbol, date))
        .collect()
}

/// Market-data source that returns a bar for every weekday requested.
pub struct FakeSource {
    calls: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
    failing: Vec<String>,
    failure_message: String,
    delay: Duration,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
            failure_message: "HTTP 500 Internal Server Error".to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Fail every request for `symbol`.
    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.push(symbol.to_string());
        self
    }

    pub fn with_failure_message(mut self, message: &str) -> Self {
        self.failure_message = message.to_string();
        self
    }

    /// Hold each request for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(String, NaiveDate, NaiveDate)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    fn provider_id(&self) -> &str {
        "fake"
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), from, to));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.iter().any(|s| s == symbol) {
            return Err(AppError::Upstream(self.failure_message.clone()));
        }

        Ok(records_for(symbol, &TradingCalendar::weekdays_only(), from, to))
    }
}

/// Record store whose every call fails.
pub struct BrokenStore;

#[async_trait]
impl RecordStore for BrokenStore {
    async fn read_records(
        &self,
        _symbol: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        Err(AppError::Persistence("database is locked".to_string()))
    }

    async fn upsert_records(&self, _records: &[DataRecord]) -> Result<usize> {
        Err(AppError::Persistence("database is locked".to_string()))
    }

    async fn read_oldest_record(&self, _symbol: &str) -> Result<Option<DataRecord>> {
        Err(AppError::Persistence("database is locked".to_string()))
    }
}

/// SQLite-backed store whose first `failures` upserts fail.
pub struct FlakyStore {
    pub inner: Arc<SqliteStore>,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn read_records(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        self.inner.read_records(symbol, from, to).await
    }

    async fn upsert_records(&self, records: &[DataRecord]) -> Result<usize> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Persistence("disk I/O error".to_string()));
        }
        self.inner.upsert_records(records).await
    }

    async fn read_oldest_record(&self, symbol: &str) -> Result<Option<DataRecord>> {
        self.inner.read_oldest_record(symbol).await
    }
}

/// Sync settings with every delay removed and a one-year window.
pub fn fast_sync_config(symbols: &[&str]) -> SyncConfig {
    SyncConfig {
        target_years: 1,
        monitored_symbols: symbols.iter().map(|s| s.to_string()).collect(),
        quick_symbols: Vec::new(),
        full_cycle_interval: Duration::from_secs(3600),
        quick_cycle_interval: Duration::from_secs(3600),
        analysis_delay: Duration::ZERO,
        inter_chunk_delay: Duration::ZERO,
        inter_symbol_delay: Duration::ZERO,
        chunk_error_delay: Duration::ZERO,
        rate_limit_error_delay: Duration::ZERO,
        admission_margin: Duration::ZERO,
        ..SyncConfig::default()
    }
}

pub fn open_limits() -> ProviderLimits {
    ProviderLimits {
        max_calls_per_hour: 10_000,
        max_calls_per_day: 10_000,
        min_delay_between_calls: Duration::ZERO,
    }
}

pub struct Harness {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub store: Arc<SqliteStore>,
    pub source: Arc<FakeSource>,
    pub governor: Arc<RateLimitGovernor>,
}

pub fn harness(config: SyncConfig, source: FakeSource) -> Harness {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let source = Arc::new(source);
    let governor = Arc::new(RateLimitGovernor::new(open_limits()));
    let detector = Arc::new(GapDetector::new(store.clone(), TradingCalendar::new()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        config,
        detector,
        source.clone(),
        store.clone(),
        governor.clone(),
    ));
    Harness {
        orchestrator,
        store,
        source,
        governor,
    }
}

/// Poll until the orchestrator reaches `state`, panicking after a few seconds.
pub async fn wait_for_state(orchestrator: &SyncOrchestrator, state: SyncState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.state().await != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "orchestrator never reached {}", state);
}

pub fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    date - ChronoDuration::days(days)
}
