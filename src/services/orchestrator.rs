//! Sync orchestrator.
//!
//! Owns the sync session: analyzes every monitored symbol, fills the largest
//! gaps first, then keeps data fresh with two recurring cycles. All fetches
//! run one at a time behind a worker lock and the rate limit governor.
//!
//! State flow: IDLE -> ANALYZING -> PRIORITY_SYNC -> MONITORING -> STOPPED,
//! with ERROR when the session cannot be initialized.

use crate::config::SyncConfig;
use crate::error::{AppError, Result};
use crate::services::gap_detector::GapDetector;
use crate::services::rate_limiter::RateLimitGovernor;
use crate::services::store::RecordStore;
use crate::sources::MarketDataSource;
use crate::types::{
    AnalysisReport, GapPeriod, PassKind, PassReport, SymbolError, SymbolPriority,
    SymbolSyncResult, SyncState, SyncStatusReport,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Symbols between progress log lines during the priority pass.
const PROGRESS_EVERY: usize = 5;

/// Priorities listed in the analysis log.
const TOP_PRIORITIES_LOGGED: usize = 10;

/// One run of the orchestrator, from start to stop.
struct SyncSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    Full,
    Quick,
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Normalize a symbol list: trimmed, uppercase, no blanks, no duplicates.
pub fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let s = symbol.trim().to_uppercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// Drives analysis, the priority pass and monitoring cycles.
pub struct SyncOrchestrator {
    config: SyncConfig,
    detector: Arc<GapDetector>,
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn RecordStore>,
    governor: Arc<RateLimitGovernor>,
    state: RwLock<SyncState>,
    session: Mutex<Option<SyncSession>>,
    /// Serializes sync passes.
    worker: Mutex<()>,
    monitored: RwLock<Vec<String>>,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    records_added: AtomicUsize,
    last_analysis: RwLock<Option<AnalysisReport>>,
    last_pass: RwLock<Option<PassReport>>,
    last_error: RwLock<Option<String>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        detector: Arc<GapDetector>,
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn RecordStore>,
        governor: Arc<RateLimitGovernor>,
    ) -> Self {
        let monitored = normalize_symbols(&config.monitored_symbols);
        Self {
            config,
            detector,
            source,
            store,
            governor,
            state: RwLock::new(SyncState::Idle),
            session: Mutex::new(None),
            worker: Mutex::new(()),
            monitored: RwLock::new(monitored),
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            records_added: AtomicUsize::new(0),
            last_analysis: RwLock::new(None),
            last_pass: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn detector(&self) -> &Arc<GapDetector> {
        &self.detector
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    async fn set_state(&self, next: SyncState) {
        let mut state = self.state.write().await;
        if *state != next {
            info!("Sync state: {} -> {}", *state, next);
            *state = next;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn monitored_symbols(&self) -> Vec<String> {
        self.monitored.read().await.clone()
    }

    // ========== Lifecycle ==========

    /// Start a session. Fails with `AlreadyRunning` if one is active.
    pub async fn start(self: &Arc<Self>) -> Result<Uuid> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(AppError::AlreadyRunning);
        }

        if let Err(e) = self.config.validate() {
            error!("Sync cannot start: {}", e);
            *self.last_error.write().await = Some(e.to_string());
            self.set_state(SyncState::Error).await;
            return Err(e);
        }

        self.processed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.records_added.store(0, Ordering::Relaxed);
        *self.last_error.write().await = None;

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.set_state(SyncState::Analyzing).await;

        let this = Arc::clone(self);
        let task_token = token.clone();
        let handle = tokio::spawn(async move { this.run_session(task_token).await });

        *session = Some(SyncSession {
            id,
            started_at: Utc::now(),
            token,
            handle,
        });
        info!("Sync session {} started", id);
        Ok(id)
    }

    /// Stop the active session and wait for its tasks to finish.
    pub async fn stop(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        let session = session.ok_or(AppError::NotRunning)?;

        session.token.cancel();
        if let Err(e) = session.handle.await {
            warn!("Sync session {} ended abnormally: {}", session.id, e);
        }

        self.set_state(SyncState::Stopped).await;
        info!("Sync session {} stopped", session.id);
        Ok(())
    }

    /// Stop (if running) and start a fresh session.
    pub async fn restart(self: &Arc<Self>) -> Result<Uuid> {
        match self.stop().await {
            Ok(()) | Err(AppError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start().await
    }

    /// Replace the monitored symbol set. Takes effect on the next pass.
    pub async fn update_symbols(&self, symbols: &[String]) -> Result<Vec<String>> {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return Err(AppError::BadRequest(
                "symbol list must not be empty".to_string(),
            ));
        }
        info!("Monitored symbols updated: {}", symbols.join(","));
        *self.monitored.write().await = symbols.clone();
        Ok(symbols)
    }

    pub async fn status(&self) -> SyncStatusReport {
        let (session_id, started_at) = match self.session.lock().await.as_ref() {
            Some(s) => (Some(s.id), Some(s.started_at)),
            None => (None, None),
        };

        SyncStatusReport {
            state: self.state().await,
            session_id,
            started_at,
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            records_added: self.records_added.load(Ordering::Relaxed),
            monitored_symbols: self.monitored_symbols().await,
            last_analysis: self
                .last_analysis
                .read()
                .await
                .as_ref()
                .map(|a| a.summary.clone()),
            last_pass: self.last_pass.read().await.clone(),
            last_error: self.last_error.read().await.clone(),
            rate_limit: self.governor.status(self.source.provider_id()),
        }
    }

    pub async fn last_analysis(&self) -> Option<AnalysisReport> {
        self.last_analysis.read().await.clone()
    }

    async fn run_session(self: Arc<Self>, token: CancellationToken) {
        let analysis = self.perform_full_analysis(&token).await;
        if token.is_cancelled() {
            self.set_state(SyncState::Stopped).await;
            return;
        }

        self.set_state(SyncState::PrioritySync).await;
        self.priority_sync(&analysis, &token).await;
        if token.is_cancelled() {
            self.set_state(SyncState::Stopped).await;
            return;
        }

        self.set_state(SyncState::Monitoring).await;
        let full = self.spawn_cycle(Cycle::Full, self.config.full_cycle_interval, token.clone());
        let quick = self.spawn_cycle(Cycle::Quick, self.config.quick_cycle_interval, token.clone());

        token.cancelled().await;
        for handle in [full, quick] {
            if let Err(e) = handle.await {
                warn!("Monitoring cycle ended abnormally: {}", e);
            }
        }
    }

    fn spawn_cycle(
        self: &Arc<Self>,
        cycle: Cycle,
        period: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("{:?} cycle armed every {:?}", cycle, period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match cycle {
                    Cycle::Full => {
                        this.incremental_cycle(&token).await;
                    }
                    Cycle::Quick => {
                        this.quick_cycle(&token).await;
                    }
                }
            }
        })
    }

    // ========== Analysis ==========

    /// Gap analysis across all monitored symbols, with the priority list.
    pub async fn perform_full_analysis(&self, token: &CancellationToken) -> AnalysisReport {
        let symbols = self.monitored_symbols().await;
        let mut report = AnalysisReport {
            total_symbols: symbols.len(),
            ..Default::default()
        };

        info!("Analyzing {} symbols", symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }

            match self
                .detector
                .analyze_gaps(symbol, self.config.target_years)
                .await
            {
                Ok(analysis) => {
                    let summary = &mut report.summary;
                    if analysis.has_no_data() {
                        summary.missing += 1;
                    } else if analysis.completion_percentage >= self.config.complete_threshold_pct {
                        summary.complete += 1;
                    } else {
                        summary.partial += 1;
                    }
                    summary.total_gap_days += analysis.total_gap_days;

                    if analysis.completion_percentage < self.config.priority_threshold_pct {
                        summary.priority_symbols.push(SymbolPriority {
                            symbol: symbol.clone(),
                            completion_percentage: analysis.completion_percentage,
                            gap_day_count: analysis.total_gap_days,
                            score: self.detector.priority_score(&analysis),
                        });
                    }
                    report.analyzed += 1;
                    report.symbols.insert(symbol.clone(), analysis);
                }
                Err(e) => {
                    warn!("Analysis failed for {}: {}", symbol, e);
                    report.errors.push(SymbolError {
                        symbol: symbol.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if i + 1 < symbols.len() && !pause(self.config.analysis_delay, token).await {
                break;
            }
        }

        report.summary.priority_symbols.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(CmpOrdering::Equal)
        });

        let summary = &report.summary;
        info!(
            "Analysis complete: {} analyzed, {} complete, {} partial, {} missing, {} gap days",
            report.analyzed, summary.complete, summary.partial, summary.missing, summary.total_gap_days
        );
        for (rank, p) in summary.priority_symbols.iter().take(TOP_PRIORITIES_LOGGED).enumerate() {
            info!(
                "  #{} {}: {:.1}% complete, {} days missing",
                rank + 1,
                p.symbol,
                p.completion_percentage,
                p.gap_day_count
            );
        }

        *self.last_analysis.write().await = Some(report.clone());
        report
    }

    // ========== Sync passes ==========

    /// Fill gaps for the symbols below the priority threshold, highest score first.
    pub async fn priority_sync(
        &self,
        analysis: &AnalysisReport,
        token: &CancellationToken,
    ) -> PassReport {
        let _worker = self.worker.lock().await;
        let mut pass = PassReport::new(PassKind::Priority);
        let queue = &analysis.summary.priority_symbols;
        info!("Priority sync: {} symbols queued", queue.len());

        for (i, priority) in queue.iter().enumerate() {
            if token.is_cancelled() {
                pass.cancelled = true;
                break;
            }

            let result = match analysis.symbols.get(&priority.symbol) {
                Some(a) => self.sync_gaps(&priority.symbol, &a.gap_periods, token).await,
                None => self.sync_symbol(&priority.symbol, token).await,
            };
            let cancelled = result.cancelled;
            self.tally(&result);
            pass.push(result);

            if pass.processed % PROGRESS_EVERY == 0 {
                info!(
                    "Priority sync progress: {}/{} symbols, {} succeeded, {} records",
                    pass.processed,
                    queue.len(),
                    pass.succeeded,
                    pass.records_added
                );
            }

            if cancelled
                || (i + 1 < queue.len() && !pause(self.config.inter_symbol_delay, token).await)
            {
                pass.cancelled = true;
                break;
            }
        }

        self.finish_pass(pass).await
    }

    /// Re-analyze and sync the leading monitored symbols.
    pub async fn incremental_cycle(&self, token: &CancellationToken) -> PassReport {
        let _worker = self.worker.lock().await;
        let mut pass = PassReport::new(PassKind::Incremental);
        let symbols: Vec<String> = self
            .monitored_symbols()
            .await
            .into_iter()
            .take(self.config.incremental_symbol_limit)
            .collect();
        info!("Incremental cycle: {} symbols", symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            if token.is_cancelled() {
                pass.cancelled = true;
                break;
            }
            let result = self.sync_symbol(symbol, token).await;
            let cancelled = result.cancelled;
            self.tally(&result);
            pass.push(result);

            if cancelled
                || (i + 1 < symbols.len() && !pause(self.config.inter_symbol_delay, token).await)
            {
                pass.cancelled = true;
                break;
            }
        }

        self.finish_pass(pass).await
    }

    /// Check the quick symbols' recent window; a symbol with missing days gets
    /// a full gap fill over its target window.
    pub async fn quick_cycle(&self, token: &CancellationToken) -> PassReport {
        let _worker = self.worker.lock().await;
        let mut pass = PassReport::new(PassKind::Quick);
        let days = self.config.recent_window_days;
        debug!("Quick cycle: {} symbols", self.config.quick_symbols.len());

        for symbol in &self.config.quick_symbols {
            if token.is_cancelled() {
                pass.cancelled = true;
                break;
            }

            let check = match self.detector.check_recent_gaps(symbol, days).await {
                Ok(check) => check,
                Err(e) => {
                    warn!("Recent gap check failed for {}: {}", symbol, e);
                    let mut result = SymbolSyncResult::new(symbol);
                    result.error = Some(e.to_string());
                    self.tally(&result);
                    pass.push(result);
                    continue;
                }
            };
            if !check.has_gaps {
                continue;
            }

            info!("{}: {} recent days missing", symbol, check.missing_days);
            let result = self.sync_symbol(symbol, token).await;
            let cancelled = result.cancelled;
            self.tally(&result);
            pass.push(result);

            if cancelled || !pause(self.config.inter_chunk_delay, token).await {
                pass.cancelled = true;
                break;
            }
        }

        self.finish_pass(pass).await
    }

    /// Analyze one symbol and fill its gaps. Never fails; errors land in the result.
    pub async fn sync_symbol(&self, symbol: &str, token: &CancellationToken) -> SymbolSyncResult {
        match self
            .detector
            .analyze_gaps(symbol, self.config.target_years)
            .await
        {
            Ok(analysis) => self.sync_gaps(symbol, &analysis.gap_periods, token).await,
            Err(e) => {
                warn!("Cannot sync {}: {}", symbol, e);
                let mut result = SymbolSyncResult::new(symbol);
                result.error = Some(e.to_string());
                result
            }
        }
    }

    /// Fetch and persist every chunk of `gaps`, in the order given.
    ///
    /// Chunk failures are logged and skipped after an extra delay. A failed
    /// chunk is not retried in this pass.
    pub async fn sync_gaps(
        &self,
        symbol: &str,
        gaps: &[GapPeriod],
        token: &CancellationToken,
    ) -> SymbolSyncResult {
        let provider = self.source.provider_id();
        let mut result = SymbolSyncResult::new(symbol);
        result.gaps_found = gaps.len();

        'gaps: for gap in gaps {
            let chunks = self.config.chunk_policy.plan_gap(gap);
            debug!(
                "{}: gap {} to {} ({} days) in {} chunks",
                symbol,
                gap.start_date,
                gap.end_date,
                gap.day_count,
                chunks.len()
            );

            for chunk in chunks {
                if token.is_cancelled()
                    || !self
                        .governor
                        .acquire(provider, self.config.admission_margin, token)
                        .await
                {
                    result.cancelled = true;
                    break 'gaps;
                }

                let fetched = self
                    .source
                    .fetch_daily_bars(symbol, chunk.start_date, chunk.end_date)
                    .await;
                self.governor.record_api_call(provider);

                let delay = match fetched {
                    Ok(records) => {
                        result.chunks_processed += 1;
                        if !records.is_empty() {
                            match self.store.upsert_records(&records).await {
                                Ok(written) => result.new_records += written,
                                Err(e) => {
                                    warn!(
                                        "{}: persisting {} to {} failed: {}",
                                        symbol, chunk.start_date, chunk.end_date, e
                                    );
                                    result.persist_failures += 1;
                                }
                            }
                        }
                        self.config.inter_chunk_delay
                    }
                    Err(e) => {
                        result.chunks_failed += 1;
                        warn!(
                            "{}: chunk {} to {} failed: {}",
                            symbol, chunk.start_date, chunk.end_date, e
                        );
                        if e.is_rate_limited() {
                            self.config.rate_limit_error_delay
                        } else {
                            self.config.chunk_error_delay
                        }
                    }
                };

                if !pause(delay, token).await {
                    result.cancelled = true;
                    break 'gaps;
                }
            }
        }

        result.success = !result.cancelled
            && result.error.is_none()
            && result.chunks_failed == 0
            && result.persist_failures == 0;
        if result.new_records > 0 {
            info!("{}: {} records written", symbol, result.new_records);
        }
        result
    }

    fn tally(&self, result: &SymbolSyncResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        self.records_added
            .fetch_add(result.new_records, Ordering::Relaxed);
    }

    async fn finish_pass(&self, mut pass: PassReport) -> PassReport {
        pass.finished_at = Some(Utc::now());
        info!(
            "{:?} pass finished: {} processed, {} succeeded, {} records{}",
            pass.kind,
            pass.processed,
            pass.succeeded,
            pass.records_added,
            if pass.cancelled { " (stopped early)" } else { "" }
        );
        *self.last_pass.write().await = Some(pass.clone());
        pass
    }
}
