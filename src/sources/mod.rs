//! Upstream market-data providers.

pub mod yahoo;

pub use yahoo::YahooFinanceClient;

use crate::error::Result;
use crate::types::DataRecord;
use async_trait::async_trait;
use chrono::NaiveDate;

/// A provider of daily bars.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Key used for this provider in the rate limit governor.
    fn provider_id(&self) -> &str;

    /// Daily bars for `symbol` in `[from, to]`.
    ///
    /// An empty result means the provider has no data for the range and is
    /// not an error. Transport and parse failures are `AppError::Upstream`.
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>>;
}
