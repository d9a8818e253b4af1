//! Splits gap periods into request-sized chunks.

use crate::error::{AppError, Result};
use crate::types::{Chunk, GapPeriod};
use chrono::{Duration, Months, NaiveDate};

/// Month span per chunk, chosen by the calendar span of the gap.
///
/// Spans above `huge_gap_days` use `huge_gap_months`, and so on down the
/// tiers. A span at or below `medium_gap_days` is fetched as one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub huge_gap_days: i64,
    pub huge_gap_months: u32,
    pub large_gap_days: i64,
    pub large_gap_months: u32,
    pub medium_gap_days: i64,
    pub medium_gap_months: u32,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            huge_gap_days: 1000,
            huge_gap_months: 3,
            large_gap_days: 500,
            large_gap_months: 6,
            medium_gap_days: 100,
            medium_gap_months: 12,
        }
    }
}

impl ChunkPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.huge_gap_days > self.large_gap_days
            && self.large_gap_days > self.medium_gap_days
            && self.medium_gap_days >= 0)
        {
            return Err(AppError::Configuration(format!(
                "chunk tiers must be strictly descending, got {}/{}/{}",
                self.huge_gap_days, self.large_gap_days, self.medium_gap_days
            )));
        }
        if self.huge_gap_months == 0 || self.large_gap_months == 0 || self.medium_gap_months == 0 {
            return Err(AppError::Configuration(
                "chunk spans must be at least one month".to_string(),
            ));
        }
        Ok(())
    }

    /// Months per chunk for a span, `None` when the whole span fits one request.
    pub fn span_months(&self, span_days: i64) -> Option<u32> {
        if span_days > self.huge_gap_days {
            Some(self.huge_gap_months)
        } else if span_days > self.large_gap_days {
            Some(self.large_gap_months)
        } else if span_days > self.medium_gap_days {
            Some(self.medium_gap_months)
        } else {
            None
        }
    }

    /// Plan chunks covering `[start, end]`.
    ///
    /// `span_days` is the calendar span of the range. Chunks tile the range in
    /// chronological order with no overlap and no skipped day. Boundaries are
    /// measured from `start` so month-end clamping never drifts.
    pub fn plan(&self, start: NaiveDate, end: NaiveDate, span_days: i64) -> Vec<Chunk> {
        if start > end {
            return Vec::new();
        }

        let months = match self.span_months(span_days) {
            Some(m) => m,
            None => return vec![chunk(start, end)],
        };

        let mut chunks = Vec::new();
        let mut chunk_start = start;
        let mut k: u32 = 1;
        while chunk_start <= end {
            let next_start = match start.checked_add_months(Months::new(months.saturating_mul(k))) {
                Some(d) => d,
                None => {
                    chunks.push(chunk(chunk_start, end));
                    break;
                }
            };
            let chunk_end = (next_start - Duration::days(1)).min(end);
            chunks.push(chunk(chunk_start, chunk_end));
            chunk_start = chunk_end + Duration::days(1);
            k += 1;
        }
        chunks
    }

    /// Plan chunks for a detected gap using its calendar span.
    pub fn plan_gap(&self, gap: &GapPeriod) -> Vec<Chunk> {
        self.plan(gap.start_date, gap.end_date, gap.calendar_days())
    }
}

fn chunk(start: NaiveDate, end: NaiveDate) -> Chunk {
    Chunk {
        start_date: start,
        end_date: end,
        day_count: (end - start).num_days() + 1,
    }
}
