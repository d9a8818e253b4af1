//! Gap analysis types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A maximal run of missing trading days for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Missing trading days, both endpoints included.
    pub day_count: usize,
}

impl GapPeriod {
    /// Calendar days covered by the gap, both endpoints included.
    pub fn calendar_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// A bounded date sub-range of a gap, fetched with a single upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Calendar days covered, both endpoints included.
    pub day_count: i64,
}

/// The analyzed target window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_trading_days: usize,
}

/// Result of diffing the trading calendar against persisted records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysis {
    pub symbol: String,
    pub target_period: TargetPeriod,
    /// Trading days in the window that have a persisted record.
    pub persisted_days: usize,
    pub first_persisted: Option<NaiveDate>,
    pub last_persisted: Option<NaiveDate>,
    pub total_gap_days: usize,
    /// Longest first; ties keep chronological order.
    pub gap_periods: Vec<GapPeriod>,
    pub completion_percentage: f64,
}

impl GapAnalysis {
    pub fn has_no_data(&self) -> bool {
        self.persisted_days == 0
    }
}

/// Lightweight trailing-window check used by the quick cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentGapCheck {
    pub symbol: String,
    pub has_gaps: bool,
    pub missing_days: usize,
    pub expected_days: usize,
    pub actual_days: usize,
    pub completion_percentage: f64,
}

/// Missing history before the oldest persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackwardGap {
    pub symbol: String,
    pub needs_backward_sync: bool,
    pub oldest_existing_date: Option<NaiveDate>,
    pub target_start_date: NaiveDate,
    pub gap: Option<GapPeriod>,
    pub estimated_missing_days: usize,
    pub priority: f64,
}

/// Backward analysis across many symbols.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackwardReport {
    pub analyzed: usize,
    /// Highest priority first.
    pub need_sync: Vec<BackwardGap>,
    pub complete: Vec<BackwardGap>,
    pub total_missing_days: usize,
    pub errors: Vec<SymbolError>,
}

/// Aggregate completeness across symbols.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDataStats {
    pub total_symbols: usize,
    pub analyzed: usize,
    pub total_expected_days: usize,
    pub total_actual_days: usize,
    pub total_gap_days: usize,
    pub global_completion_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolError {
    pub symbol: String,
    pub error: String,
}
