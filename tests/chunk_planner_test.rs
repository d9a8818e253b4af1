//! Chunk planning over realistic gap sizes.

mod common;

use chrono::{Duration, NaiveDate};
use common::d;
use gapsync::services::ChunkPolicy;
use gapsync::types::{Chunk, GapPeriod};

fn assert_tiles(chunks: &[Chunk], start: NaiveDate, end: NaiveDate) {
    assert_eq!(chunks.first().unwrap().start_date, start);
    assert_eq!(chunks.last().unwrap().end_date, end);
    for pair in chunks.windows(2) {
        assert_eq!(pair[1].start_date, pair[0].end_date + Duration::days(1));
    }
    for chunk in chunks {
        assert!(chunk.start_date <= chunk.end_date);
        assert_eq!(chunk.day_count, (chunk.end_date - chunk.start_date).num_days() + 1);
    }
    let total: i64 = chunks.iter().map(|c| c.day_count).sum();
    assert_eq!(total, (end - start).num_days() + 1);
}

#[test]
fn test_twelve_hundred_day_gap_uses_quarterly_chunks() {
    let policy = ChunkPolicy::default();
    let start = d(2020, 1, 1);
    let end = start + Duration::days(1199);
    assert_eq!(end, d(2023, 4, 14));

    let chunks = policy.plan(start, end, 1200);

    // ceil(1200 / ~91)
    assert_eq!(chunks.len(), 14);
    assert_eq!(chunks[0].start_date, d(2020, 1, 1));
    assert_eq!(chunks[0].end_date, d(2020, 3, 31));
    assert_eq!(chunks[1].start_date, d(2020, 4, 1));
    assert_eq!(chunks[12].end_date, d(2023, 3, 31));
    assert_eq!(chunks[13].start_date, d(2023, 4, 1));
    assert_eq!(chunks[13].end_date, d(2023, 4, 14));
    assert_eq!(chunks[13].day_count, 14);
    assert_tiles(&chunks, start, end);
}

#[test]
fn test_tiling_holds_across_spans() {
    let policy = ChunkPolicy::default();
    let start = d(2019, 8, 31);
    for span in [1, 30, 100, 101, 365, 500, 501, 730, 1000, 1001, 1826, 3650] {
        let end = start + Duration::days(span - 1);
        let chunks = policy.plan(start, end, span);
        assert!(!chunks.is_empty(), "span {}", span);
        assert_tiles(&chunks, start, end);
    }
}

#[test]
fn test_chunk_count_per_tier() {
    let policy = ChunkPolicy::default();
    let start = d(2021, 1, 1);

    // At or below 100 days: one request.
    assert_eq!(policy.plan(start, start + Duration::days(99), 100).len(), 1);
    // 101..=500 days: yearly chunks.
    assert_eq!(policy.plan(start, start + Duration::days(399), 400).len(), 2);
    // 501..=1000 days: half-year chunks.
    assert_eq!(policy.plan(start, start + Duration::days(729), 730).len(), 4);
}

#[test]
fn test_plan_gap_uses_calendar_span() {
    let policy = ChunkPolicy::default();
    // 1826 calendar days but far fewer trading days.
    let gap = GapPeriod {
        start_date: d(2021, 10, 16),
        end_date: d(2026, 10, 15),
        day_count: 1255,
    };
    let chunks = policy.plan_gap(&gap);
    assert_eq!(chunks.len(), 20);
    assert_tiles(&chunks, gap.start_date, gap.end_date);
}

#[test]
fn test_custom_policy() {
    let policy = ChunkPolicy {
        huge_gap_days: 60,
        huge_gap_months: 1,
        large_gap_days: 40,
        large_gap_months: 2,
        medium_gap_days: 20,
        medium_gap_months: 3,
    };
    assert!(policy.validate().is_ok());

    let start = d(2024, 1, 1);
    let end = d(2024, 3, 31);
    let chunks = policy.plan(start, end, 91);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1].start_date, d(2024, 2, 1));
    assert_eq!(chunks[1].end_date, d(2024, 2, 29));
    assert_tiles(&chunks, start, end);
}
