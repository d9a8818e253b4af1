//! Gap detection against the trading calendar.
//!
//! Diffs expected trading days against persisted records and reports the
//! missing days as maximal contiguous gap periods.

use crate::error::{AppError, Result};
use crate::services::calendar::TradingCalendar;
use crate::services::store::RecordStore;
use crate::types::{
    BackwardGap, BackwardReport, GapAnalysis, GapPeriod, GlobalDataStats, RecentGapCheck,
    SymbolError, TargetPeriod,
};
use chrono::{Days, Duration, Months, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Multiplier applied to symbols with no persisted data at all.
pub const DEFAULT_EMPTY_SYMBOL_WEIGHT: f64 = 2.0;

/// Longest trailing window accepted by the recent gap check.
pub const MAX_RECENT_WINDOW_DAYS: u32 = 366;

/// Sweep trading days in order and collect runs missing from `persisted`.
///
/// Returned gaps are chronological. Each gap's `day_count` is the number of
/// trading days it covers, both endpoints included.
pub fn identify_gaps(trading_days: &[NaiveDate], persisted: &HashSet<NaiveDate>) -> Vec<GapPeriod> {
    let mut gaps = Vec::new();
    let mut open: Option<(NaiveDate, NaiveDate, usize)> = None;

    for &day in trading_days {
        if persisted.contains(&day) {
            if let Some((start, end, count)) = open.take() {
                gaps.push(GapPeriod {
                    start_date: start,
                    end_date: end,
                    day_count: count,
                });
            }
        } else {
            open = Some(match open {
                Some((start, _, count)) => (start, day, count + 1),
                None => (day, day, 1),
            });
        }
    }

    if let Some((start, end, count)) = open {
        gaps.push(GapPeriod {
            start_date: start,
            end_date: end,
            day_count: count,
        });
    }

    gaps
}

/// Longest first. The sort is stable so equal gaps stay chronological.
pub fn sort_gaps_longest_first(gaps: &mut [GapPeriod]) {
    gaps.sort_by(|a, b| b.day_count.cmp(&a.day_count));
}

fn completion(actual: usize, expected: usize) -> f64 {
    if expected == 0 {
        100.0
    } else {
        actual as f64 / expected as f64 * 100.0
    }
}

fn years_before(today: NaiveDate, years: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MIN)
}

/// Target window `[today - years, yesterday]`.
///
/// The current day is excluded since its session may not have closed.
pub fn target_window(today: NaiveDate, years: u32) -> (NaiveDate, NaiveDate) {
    (years_before(today, years), today - Duration::days(1))
}

/// Detects missing trading days per symbol.
pub struct GapDetector {
    store: Arc<dyn RecordStore>,
    calendar: TradingCalendar,
    empty_symbol_weight: f64,
}

impl GapDetector {
    pub fn new(store: Arc<dyn RecordStore>, calendar: TradingCalendar) -> Self {
        Self {
            store,
            calendar,
            empty_symbol_weight: DEFAULT_EMPTY_SYMBOL_WEIGHT,
        }
    }

    pub fn with_empty_symbol_weight(mut self, weight: f64) -> Self {
        self.empty_symbol_weight = weight;
        self
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Ranking score: missing days, weighted up when the symbol has no data.
    pub fn priority_score(&self, analysis: &GapAnalysis) -> f64 {
        let weight = if analysis.has_no_data() {
            self.empty_symbol_weight
        } else {
            1.0
        };
        analysis.total_gap_days as f64 * weight
    }

    pub async fn analyze_gaps(&self, symbol: &str, target_years: u32) -> Result<GapAnalysis> {
        self.analyze_gaps_on(symbol, target_years, Utc::now().date_naive())
            .await
    }

    /// Full gap analysis for `symbol` as of `today`.
    pub async fn analyze_gaps_on(
        &self,
        symbol: &str,
        target_years: u32,
        today: NaiveDate,
    ) -> Result<GapAnalysis> {
        let (start, end) = target_window(today, target_years);
        let records = self.store.read_records(symbol, start, end).await?;
        let trading_days = self.calendar.generate(start, end);

        let persisted: HashSet<NaiveDate> = records.iter().map(|r| r.date).collect();
        let persisted_days = trading_days.iter().filter(|d| persisted.contains(d)).count();

        let mut gap_periods = if persisted_days == 0 && !trading_days.is_empty() {
            // Nothing stored: one gap over the whole window.
            vec![GapPeriod {
                start_date: start,
                end_date: end,
                day_count: trading_days.len(),
            }]
        } else {
            identify_gaps(&trading_days, &persisted)
        };
        sort_gaps_longest_first(&mut gap_periods);

        let total_gap_days = trading_days.len() - persisted_days;
        debug!(
            "Gap analysis {}: {}/{} days persisted, {} gaps",
            symbol,
            persisted_days,
            trading_days.len(),
            gap_periods.len()
        );

        Ok(GapAnalysis {
            symbol: symbol.to_string(),
            target_period: TargetPeriod {
                start_date: start,
                end_date: end,
                total_trading_days: trading_days.len(),
            },
            persisted_days,
            first_persisted: records.iter().map(|r| r.date).min(),
            last_persisted: records.iter().map(|r| r.date).max(),
            total_gap_days,
            gap_periods,
            completion_percentage: completion(persisted_days, trading_days.len()),
        })
    }

    pub async fn check_recent_gaps(&self, symbol: &str, days: u32) -> Result<RecentGapCheck> {
        self.check_recent_gaps_on(symbol, days, Utc::now().date_naive())
            .await
    }

    /// Missing trading days within `[today - days, yesterday]`.
    pub async fn check_recent_gaps_on(
        &self,
        symbol: &str,
        days: u32,
        today: NaiveDate,
    ) -> Result<RecentGapCheck> {
        if days == 0 || days > MAX_RECENT_WINDOW_DAYS {
            return Err(AppError::BadRequest(format!(
                "recent window must be between 1 and {} days, got {}",
                MAX_RECENT_WINDOW_DAYS, days
            )));
        }
        let start = today.checked_sub_days(Days::new(days as u64)).ok_or_else(|| {
            AppError::BadRequest(format!("{} days before {} is out of range", days, today))
        })?;
        let end = today - Duration::days(1);
        let records = self.store.read_records(symbol, start, end).await?;

        let persisted: HashSet<NaiveDate> = records.iter().map(|r| r.date).collect();
        let trading_days = self.calendar.generate(start, end);
        let actual_days = trading_days.iter().filter(|d| persisted.contains(d)).count();
        let missing_days = trading_days.len() - actual_days;

        Ok(RecentGapCheck {
            symbol: symbol.to_string(),
            has_gaps: missing_days > 0,
            missing_days,
            expected_days: trading_days.len(),
            actual_days,
            completion_percentage: completion(actual_days, trading_days.len()),
        })
    }

    pub async fn find_oldest_persisted_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        Ok(self.store.read_oldest_record(symbol).await?.map(|r| r.date))
    }

    pub async fn analyze_backward(&self, symbol: &str, target_years: u32) -> Result<BackwardGap> {
        self.analyze_backward_on(symbol, target_years, Utc::now().date_naive())
            .await
    }

    /// History missing before the oldest persisted record.
    pub async fn analyze_backward_on(
        &self,
        symbol: &str,
        target_years: u32,
        today: NaiveDate,
    ) -> Result<BackwardGap> {
        let (target_start, yesterday) = target_window(today, target_years);
        let oldest = self.find_oldest_persisted_date(symbol).await?;

        let (gap_end, weight) = match oldest {
            None => (Some(yesterday), self.empty_symbol_weight),
            Some(date) if date > target_start => (Some(date - Duration::days(1)), 1.0),
            Some(_) => (None, 0.0),
        };

        let gap = gap_end.and_then(|end| {
            let day_count = self.calendar.count(target_start, end);
            (day_count > 0).then_some(GapPeriod {
                start_date: target_start,
                end_date: end,
                day_count,
            })
        });
        let estimated_missing_days = gap.as_ref().map(|g| g.day_count).unwrap_or(0);

        Ok(BackwardGap {
            symbol: symbol.to_string(),
            needs_backward_sync: gap.is_some(),
            oldest_existing_date: oldest,
            target_start_date: target_start,
            gap,
            estimated_missing_days,
            priority: estimated_missing_days as f64 * weight,
        })
    }

    pub async fn analyze_all_backward(
        &self,
        symbols: &[String],
        target_years: u32,
    ) -> BackwardReport {
        self.analyze_all_backward_on(symbols, target_years, Utc::now().date_naive())
            .await
    }

    /// Backward analysis over many symbols. Per-symbol failures are collected.
    pub async fn analyze_all_backward_on(
        &self,
        symbols: &[String],
        target_years: u32,
        today: NaiveDate,
    ) -> BackwardReport {
        let mut report = BackwardReport::default();

        for symbol in symbols {
            match self.analyze_backward_on(symbol, target_years, today).await {
                Ok(result) => {
                    report.analyzed += 1;
                    report.total_missing_days += result.estimated_missing_days;
                    if result.needs_backward_sync {
                        report.need_sync.push(result);
                    } else {
                        report.complete.push(result);
                    }
                }
                Err(e) => {
                    warn!("Backward analysis failed for {}: {}", symbol, e);
                    report.errors.push(SymbolError {
                        symbol: symbol.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
            .need_sync
            .sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(Ordering::Equal));
        report
    }

    pub async fn global_stats(&self, symbols: &[String], target_years: u32) -> GlobalDataStats {
        self.global_stats_on(symbols, target_years, Utc::now().date_naive())
            .await
    }

    /// Aggregate completeness over `symbols`. Failed symbols are left out.
    pub async fn global_stats_on(
        &self,
        symbols: &[String],
        target_years: u32,
        today: NaiveDate,
    ) -> GlobalDataStats {
        let mut stats = GlobalDataStats {
            total_symbols: symbols.len(),
            ..Default::default()
        };

        for symbol in symbols {
            match self.analyze_gaps_on(symbol, target_years, today).await {
                Ok(analysis) => {
                    stats.analyzed += 1;
                    stats.total_expected_days += analysis.target_period.total_trading_days;
                    stats.total_actual_days += analysis.persisted_days;
                    stats.total_gap_days += analysis.total_gap_days;
                }
                Err(e) => warn!("Skipping {} in global stats: {}", symbol, e),
            }
        }

        stats.global_completion_percentage =
            completion(stats.total_actual_days, stats.total_expected_days);
        stats
    }
}
