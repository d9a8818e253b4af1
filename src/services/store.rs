//! Persistence and control-channel collaborators.

use crate::error::Result;
use crate::types::{DataRecord, RemoteCommand};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Daily record storage keyed by (symbol, date).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records for `symbol` in `[from, to]`, newest first.
    async fn read_records(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>>;

    /// Insert or replace records. Returns the number of rows written.
    async fn upsert_records(&self, records: &[DataRecord]) -> Result<usize>;

    async fn read_oldest_record(&self, symbol: &str) -> Result<Option<DataRecord>>;
}

/// Polled queue of remote commands.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Unprocessed commands, oldest first.
    async fn fetch_unprocessed_commands(&self, limit: usize) -> Result<Vec<RemoteCommand>>;

    /// Mark a command handled, with the error if dispatch failed.
    async fn mark_processed(&self, id: i64, error: Option<String>) -> Result<()>;
}
