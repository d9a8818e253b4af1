//! GapSync - gap-aware daily OHLCV synchronization server

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::Config;
use error::Result;
use services::{GapDetector, RateLimitGovernor, SqliteStore, SyncOrchestrator, TradingCalendar};
use sources::MarketDataSource;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub store: Arc<SqliteStore>,
}

impl AppState {
    /// Wire the engine components around a store and a market-data source.
    pub fn new(
        config: Config,
        store: Arc<SqliteStore>,
        source: Arc<dyn MarketDataSource>,
    ) -> Result<Self> {
        let calendar = TradingCalendar::with_extra_holidays(config.sync.holiday_dates()?);
        let detector = Arc::new(
            GapDetector::new(store.clone(), calendar)
                .with_empty_symbol_weight(config.sync.empty_symbol_weight),
        );

        let governor = Arc::new(RateLimitGovernor::new(config.rate_limit));
        governor.configure(source.provider_id(), config.rate_limit);

        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.sync.clone(),
            detector,
            source,
            store.clone(),
            governor,
        ));

        Ok(Self {
            config: Arc::new(config),
            orchestrator,
            store,
        })
    }
}

pub use error::AppError;
pub use types::*;
