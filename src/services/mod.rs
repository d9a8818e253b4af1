pub mod calendar;
pub mod chunk_planner;
pub mod control;
pub mod gap_detector;
pub mod orchestrator;
pub mod rate_limiter;
pub mod sqlite_store;
pub mod store;

pub use calendar::TradingCalendar;
pub use chunk_planner::ChunkPolicy;
pub use control::ControlPoller;
pub use gap_detector::GapDetector;
pub use orchestrator::SyncOrchestrator;
pub use rate_limiter::{ProviderLimits, RateLimitGovernor};
pub use sqlite_store::SqliteStore;
pub use store::{CommandChannel, RecordStore};
