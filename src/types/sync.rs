//! Orchestrator state and reporting types.

use super::gap::{GapAnalysis, SymbolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Analyzing,
    PrioritySync,
    Monitoring,
    Stopped,
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "IDLE",
            SyncState::Analyzing => "ANALYZING",
            SyncState::PrioritySync => "PRIORITY_SYNC",
            SyncState::Monitoring => "MONITORING",
            SyncState::Stopped => "STOPPED",
            SyncState::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Ranking input for the priority pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPriority {
    pub symbol: String,
    pub completion_percentage: f64,
    pub gap_day_count: usize,
    pub score: f64,
}

/// Counts of symbols by completeness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub complete: usize,
    pub partial: usize,
    pub missing: usize,
    pub total_gap_days: usize,
    /// Highest score first.
    pub priority_symbols: Vec<SymbolPriority>,
}

/// Output of a full analysis across monitored symbols.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub total_symbols: usize,
    pub analyzed: usize,
    pub symbols: BTreeMap<String, GapAnalysis>,
    pub errors: Vec<SymbolError>,
    pub summary: AnalysisSummary,
}

/// Outcome of syncing one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSyncResult {
    pub symbol: String,
    pub success: bool,
    pub new_records: usize,
    pub gaps_found: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub persist_failures: usize,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl SymbolSyncResult {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }
}

/// Which pass produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Priority,
    Incremental,
    Quick,
}

/// Aggregated results of one sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub kind: PassKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: usize,
    pub succeeded: usize,
    pub records_added: usize,
    pub cancelled: bool,
    pub results: Vec<SymbolSyncResult>,
}

impl PassReport {
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            started_at: Utc::now(),
            finished_at: None,
            processed: 0,
            succeeded: 0,
            records_added: 0,
            cancelled: false,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: SymbolSyncResult) {
        self.processed += 1;
        if result.success {
            self.succeeded += 1;
        }
        self.records_added += result.new_records;
        self.results.push(result);
    }
}

/// Governor ledger snapshot for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub provider: String,
    pub calls_last_hour: usize,
    pub calls_last_day: usize,
    pub max_calls_per_hour: u32,
    pub max_calls_per_day: u32,
    pub can_make_request: bool,
    pub wait_time_ms: u64,
    pub time_since_last_call_ms: Option<u64>,
    pub min_delay_ms: u64,
}

/// Snapshot of the orchestrator for status requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub state: SyncState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub processed: usize,
    pub succeeded: usize,
    pub records_added: usize,
    pub monitored_symbols: Vec<String>,
    pub last_analysis: Option<AnalysisSummary>,
    pub last_pass: Option<PassReport>,
    pub last_error: Option<String>,
    pub rate_limit: RateLimitStatus,
}
