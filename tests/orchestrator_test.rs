//! Orchestrator lifecycle and sync passes against a fake provider.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{d, fast_sync_config, harness, open_limits, wait_for_state, FakeSource, FlakyStore};
use gapsync::config::SyncConfig;
use gapsync::error::AppError;
use gapsync::services::gap_detector::target_window;
use gapsync::services::{
    GapDetector, RateLimitGovernor, RecordStore, SqliteStore, SyncOrchestrator, TradingCalendar,
};
use gapsync::types::{GapPeriod, PassKind, SyncState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_full_session_fills_gaps_and_monitors() {
    let h = harness(fast_sync_config(&["AAPL", "MSFT"]), FakeSource::new());
    assert_eq!(h.orchestrator.state().await, SyncState::Idle);

    let session_id = h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;

    let status = h.orchestrator.status().await;
    assert_eq!(status.session_id, Some(session_id));
    assert_eq!(status.processed, 2);
    assert_eq!(status.succeeded, 2);
    assert!(status.records_added > 0);

    let summary = status.last_analysis.unwrap();
    assert_eq!(summary.missing, 2);
    assert_eq!(summary.priority_symbols.len(), 2);

    let pass = status.last_pass.unwrap();
    assert_eq!(pass.kind, PassKind::Priority);
    assert!(!pass.cancelled);
    assert!(h.store.record_count("AAPL").unwrap() > 200);

    // Every request went through the governor ledger.
    assert_eq!(status.rate_limit.calls_last_hour, h.source.call_count());

    h.orchestrator.stop().await.unwrap();
    assert_eq!(h.orchestrator.state().await, SyncState::Stopped);
    assert!(!h.orchestrator.is_running().await);
}

#[tokio::test]
async fn test_reanalysis_after_fill_finds_no_gaps() {
    let h = harness(fast_sync_config(&["KO"]), FakeSource::new());
    h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;
    h.orchestrator.stop().await.unwrap();

    let analysis = h.orchestrator.detector().analyze_gaps("KO", 1).await.unwrap();
    assert!(analysis.gap_periods.is_empty());
    assert_eq!(analysis.total_gap_days, 0);
    assert_eq!(analysis.completion_percentage, 100.0);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());
    h.orchestrator.start().await.unwrap();

    let err = h.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyRunning));

    h.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_session() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());
    assert!(matches!(h.orchestrator.stop().await, Err(AppError::NotRunning)));
}

#[tokio::test]
async fn test_restart_begins_new_session() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());
    let first = h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;

    let second = h.orchestrator.restart().await.unwrap();
    assert_ne!(first, second);
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;
    assert_eq!(h.orchestrator.status().await.session_id, Some(second));

    h.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_moves_to_error() {
    let mut config = fast_sync_config(&["AAPL"]);
    config.target_years = 0;
    let h = harness(config, FakeSource::new());

    let err = h.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
    assert_eq!(h.orchestrator.state().await, SyncState::Error);

    let status = h.orchestrator.status().await;
    assert!(status.last_error.is_some());
    assert!(status.session_id.is_none());
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_stop_mid_pass_halts_requests() {
    let mut config = fast_sync_config(&["AAPL", "MSFT", "GOOGL", "AMZN"]);
    config.inter_chunk_delay = Duration::from_millis(200);
    config.inter_symbol_delay = Duration::from_millis(200);
    let h = harness(config, FakeSource::new().with_delay(Duration::from_millis(20)));

    h.orchestrator.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.source.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    h.orchestrator.stop().await.unwrap();
    let calls_at_stop = h.source.call_count();
    assert!(calls_at_stop < 4);
    assert_eq!(h.orchestrator.state().await, SyncState::Stopped);

    let pass = h.orchestrator.status().await.last_pass.unwrap();
    assert!(pass.cancelled);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.source.call_count(), calls_at_stop);
    assert_eq!(h.orchestrator.state().await, SyncState::Stopped);
}

#[tokio::test]
async fn test_update_symbols() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());

    let symbols = h
        .orchestrator
        .update_symbols(&["ko".to_string(), " jnj".to_string(), "KO".to_string()])
        .await
        .unwrap();
    assert_eq!(symbols, vec!["KO", "JNJ"]);
    assert_eq!(h.orchestrator.monitored_symbols().await, vec!["KO", "JNJ"]);

    let err = h.orchestrator.update_symbols(&[]).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

// =========================================================================
// Sync passes
// =========================================================================

#[tokio::test]
async fn test_failed_symbol_does_not_halt_pass() {
    let h = harness(
        fast_sync_config(&["AAPL", "BAD", "MSFT"]),
        FakeSource::new().failing("BAD"),
    );
    h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;

    let status = h.orchestrator.status().await;
    let pass = status.last_pass.unwrap();
    assert_eq!(pass.processed, 3);
    assert_eq!(pass.succeeded, 2);

    let bad = pass.results.iter().find(|r| r.symbol == "BAD").unwrap();
    assert!(!bad.success);
    assert_eq!(bad.chunks_failed, 1);
    assert_eq!(bad.new_records, 0);

    let good = pass.results.iter().find(|r| r.symbol == "MSFT").unwrap();
    assert!(good.success);
    assert!(good.new_records > 0);

    h.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_chunks_requested_in_order() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());
    let gap = GapPeriod {
        start_date: d(2022, 1, 3),
        end_date: d(2023, 12, 29),
        day_count: 500,
    };

    let token = CancellationToken::new();
    let result = h.orchestrator.sync_gaps("AAPL", &[gap], &token).await;
    assert!(result.success);
    assert_eq!(result.gaps_found, 1);
    assert_eq!(result.chunks_processed, 4);

    let calls = h.source.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].1, d(2022, 1, 3));
    assert_eq!(calls[3].2, d(2023, 12, 29));
    for pair in calls.windows(2) {
        assert_eq!(pair[1].1, pair[0].2 + ChronoDuration::days(1));
    }
}

#[tokio::test]
async fn test_cancelled_token_skips_requests() {
    let h = harness(fast_sync_config(&["AAPL"]), FakeSource::new());
    let gap = GapPeriod {
        start_date: d(2024, 1, 2),
        end_date: d(2024, 1, 31),
        day_count: 21,
    };

    let token = CancellationToken::new();
    token.cancel();
    let result = h.orchestrator.sync_gaps("AAPL", &[gap], &token).await;
    assert!(result.cancelled);
    assert!(!result.success);
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_incremental_cycle_respects_symbol_limit() {
    let mut config = fast_sync_config(&["AAPL", "MSFT", "KO"]);
    config.incremental_symbol_limit = 2;
    let h = harness(config, FakeSource::new());

    let pass = h
        .orchestrator
        .incremental_cycle(&CancellationToken::new())
        .await;
    assert_eq!(pass.kind, PassKind::Incremental);
    assert_eq!(pass.processed, 2);
    assert_eq!(pass.succeeded, 2);
    assert_eq!(h.store.record_count("KO").unwrap(), 0);
}

#[tokio::test]
async fn test_quick_cycle_runs_full_sync_when_recent_days_missing() {
    let mut config = fast_sync_config(&["AAPL"]);
    config.quick_symbols = vec!["AAPL".to_string()];
    let h = harness(config, FakeSource::new());
    let token = CancellationToken::new();

    let pass = h.orchestrator.quick_cycle(&token).await;
    assert_eq!(pass.kind, PassKind::Quick);
    assert_eq!(pass.processed, 1);
    assert_eq!(pass.succeeded, 1);
    assert!(pass.records_added > 0);

    // The whole target window is requested, not only the recent days.
    let (start, end) = target_window(Utc::now().date_naive(), 1);
    let calls = h.source.calls();
    assert!(calls.len() > 1);
    assert_eq!(calls[0].1, start);
    assert_eq!(calls.last().unwrap().2, end);

    let analysis = h.orchestrator.detector().analyze_gaps("AAPL", 1).await.unwrap();
    assert!(analysis.gap_periods.is_empty());

    // Recent window is now complete, so nothing is fetched.
    let fetched = h.source.call_count();
    let pass = h.orchestrator.quick_cycle(&token).await;
    assert_eq!(pass.processed, 0);
    assert_eq!(h.source.call_count(), fetched);
}

#[tokio::test]
async fn test_rate_limited_chunk_is_counted_as_failure() {
    let h = harness(
        fast_sync_config(&["AAPL"]),
        FakeSource::new()
            .failing("AAPL")
            .with_failure_message("rate limited: HTTP 429 Too Many Requests"),
    );
    let gap = GapPeriod {
        start_date: d(2024, 1, 2),
        end_date: d(2024, 1, 31),
        day_count: 21,
    };

    let result = h
        .orchestrator
        .sync_gaps("AAPL", &[gap], &CancellationToken::new())
        .await;
    assert_eq!(result.chunks_failed, 1);
    assert!(!result.success);
    assert_eq!(h.governor.status("fake").calls_last_hour, 1);
}

fn one_chunk_gap() -> GapPeriod {
    GapPeriod {
        start_date: d(2024, 1, 2),
        end_date: d(2024, 1, 31),
        day_count: 21,
    }
}

fn error_delay_config() -> SyncConfig {
    let mut config = fast_sync_config(&["AAPL"]);
    config.chunk_error_delay = Duration::from_secs(5);
    config.rate_limit_error_delay = Duration::from_secs(30);
    config
}

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_waits_chunk_error_delay() {
    let h = harness(error_delay_config(), FakeSource::new().failing("AAPL"));

    let started = Instant::now();
    let result = h
        .orchestrator
        .sync_gaps("AAPL", &[one_chunk_gap()], &CancellationToken::new())
        .await;
    let waited = started.elapsed();

    assert_eq!(result.chunks_failed, 1);
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_chunk_waits_longer_delay() {
    let h = harness(
        error_delay_config(),
        FakeSource::new()
            .failing("AAPL")
            .with_failure_message("rate limited: HTTP 429 Too Many Requests"),
    );

    let started = Instant::now();
    let result = h
        .orchestrator
        .sync_gaps("AAPL", &[one_chunk_gap()], &CancellationToken::new())
        .await;

    assert_eq!(result.chunks_failed, 1);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cuts_error_delay_short() {
    let h = harness(error_delay_config(), FakeSource::new().failing("AAPL"));
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        })
    };

    let started = Instant::now();
    let result = h.orchestrator.sync_gaps("AAPL", &[one_chunk_gap()], &token).await;
    assert!(result.cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_persist_failure_does_not_block_later_chunks() {
    let inner = Arc::new(SqliteStore::new_in_memory().unwrap());
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let source = Arc::new(FakeSource::new());
    let orchestrator = SyncOrchestrator::new(
        fast_sync_config(&["AAPL"]),
        Arc::new(GapDetector::new(store.clone(), TradingCalendar::new())),
        source.clone(),
        store,
        Arc::new(RateLimitGovernor::new(open_limits())),
    );
    let gap = GapPeriod {
        start_date: d(2022, 1, 3),
        end_date: d(2023, 12, 29),
        day_count: 500,
    };

    let result = orchestrator
        .sync_gaps("AAPL", &[gap], &CancellationToken::new())
        .await;
    assert_eq!(result.chunks_processed, 4);
    assert_eq!(result.chunks_failed, 0);
    assert_eq!(result.persist_failures, 1);
    assert!(result.new_records > 0);
    assert!(!result.success);

    let calls = source.calls();
    assert_eq!(calls.len(), 4);

    // Only the first batch is lost.
    let (_, from, to) = &calls[0];
    assert!(inner.read_records("AAPL", *from, *to).await.unwrap().is_empty());
    for (_, from, to) in &calls[1..] {
        assert!(!inner.read_records("AAPL", *from, *to).await.unwrap().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_quick_cycle_timer_ticks_until_stopped() {
    let mut config = fast_sync_config(&["AAPL"]);
    config.quick_symbols = vec!["MSFT".to_string()];
    config.quick_cycle_interval = Duration::from_secs(60);
    config.full_cycle_interval = Duration::from_secs(3600);
    // MSFT never fills, so every quick tick fetches again.
    let h = harness(config, FakeSource::new().failing("MSFT"));
    let msft_calls = |source: &FakeSource| source.calls().iter().filter(|c| c.0 == "MSFT").count();

    h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;
    let monitoring_since = Instant::now();
    assert_eq!(msft_calls(&h.source), 0);

    tokio::time::timeout(Duration::from_secs(300), async {
        while msft_calls(&h.source) == 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .unwrap();
    assert!(monitoring_since.elapsed() >= Duration::from_secs(59));
    let first_tick = msft_calls(&h.source);

    tokio::time::timeout(Duration::from_secs(300), async {
        while msft_calls(&h.source) == first_tick {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .unwrap();
    assert!(monitoring_since.elapsed() >= Duration::from_secs(119));

    h.orchestrator.stop().await.unwrap();
    let calls_at_stop = h.source.call_count();

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.source.call_count(), calls_at_stop);
    assert_eq!(h.orchestrator.state().await, SyncState::Stopped);
}

#[tokio::test]
async fn test_second_session_skips_complete_symbols() {
    // Data written by one session is seen by the next one's analysis.
    let h = harness(fast_sync_config(&["NVDA"]), FakeSource::new());
    h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;
    h.orchestrator.stop().await.unwrap();

    let before = h.store.record_count("NVDA").unwrap();

    h.orchestrator.start().await.unwrap();
    wait_for_state(&h.orchestrator, SyncState::Monitoring).await;
    let status = h.orchestrator.status().await;
    assert_eq!(status.last_analysis.unwrap().priority_symbols.len(), 0);
    assert_eq!(h.store.record_count("NVDA").unwrap(), before);
    h.orchestrator.stop().await.unwrap();
}
