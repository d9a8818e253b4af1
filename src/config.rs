use crate::error::{AppError, Result};
use crate::services::chunk_planner::ChunkPolicy;
use crate::services::gap_detector::MAX_RECENT_WINDOW_DAYS;
use crate::services::rate_limiter::ProviderLimits;
use chrono::NaiveDate;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Symbols monitored when MONITORED_SYMBOLS is not set.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "KO", "JNJ", "TSLA", "GOOGL", "AMZN", "META", "NVDA", "NFLX", "V", "MA",
    "UNH", "HD", "PG", "BAC", "JPM", "WMT", "DIS", "ADBE",
];

/// High-priority subset re-checked by the quick cycle.
pub const DEFAULT_QUICK_SYMBOLS: &[&str] = &["AAPL", "MSFT", "GOOGL", "TSLA", "NVDA"];

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Years of history to keep complete.
    pub target_years: u32,
    /// Symbols tracked by the orchestrator.
    pub monitored_symbols: Vec<String>,
    /// Symbols re-checked on the quick cycle.
    pub quick_symbols: Vec<String>,
    /// Completion % below which a symbol is queued for the priority pass.
    pub priority_threshold_pct: f64,
    /// Completion % at which a symbol counts as complete in reports.
    pub complete_threshold_pct: f64,
    /// Score multiplier for symbols with no persisted data at all.
    pub empty_symbol_weight: f64,
    /// Trailing window inspected by the quick cycle.
    pub recent_window_days: u32,
    /// Symbols synced per incremental cycle.
    pub incremental_symbol_limit: usize,
    pub full_cycle_interval: Duration,
    pub quick_cycle_interval: Duration,
    /// Pause between symbol reads during analysis.
    pub analysis_delay: Duration,
    pub inter_chunk_delay: Duration,
    pub inter_symbol_delay: Duration,
    /// Extra pause after a failed chunk.
    pub chunk_error_delay: Duration,
    /// Extra pause after a chunk the provider throttled.
    pub rate_limit_error_delay: Duration,
    /// Added on top of the governor's wait time.
    pub admission_margin: Duration,
    pub chunk_policy: ChunkPolicy,
    /// Additional market holidays as ISO dates.
    pub extra_holidays: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_years: 5,
            monitored_symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            quick_symbols: DEFAULT_QUICK_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            priority_threshold_pct: 80.0,
            complete_threshold_pct: 95.0,
            empty_symbol_weight: 2.0,
            recent_window_days: 7,
            incremental_symbol_limit: 10,
            full_cycle_interval: Duration::from_secs(6 * 3600),
            quick_cycle_interval: Duration::from_secs(3600),
            analysis_delay: Duration::from_millis(100),
            inter_chunk_delay: Duration::from_secs(2),
            inter_symbol_delay: Duration::from_secs(10),
            chunk_error_delay: Duration::from_secs(5),
            rate_limit_error_delay: Duration::from_secs(30),
            admission_margin: Duration::from_secs(1),
            chunk_policy: ChunkPolicy::default(),
            extra_holidays: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parse the configured extra holidays.
    pub fn holiday_dates(&self) -> Result<Vec<NaiveDate>> {
        self.extra_holidays
            .iter()
            .map(|s| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                    AppError::Configuration(format!("invalid holiday date '{}'", s))
                })
            })
            .collect()
    }

    /// Check the sync settings for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.target_years == 0 || self.target_years > 30 {
            return Err(AppError::Configuration(format!(
                "target_years must be between 1 and 30, got {}",
                self.target_years
            )));
        }
        if self.monitored_symbols.is_empty() {
            return Err(AppError::Configuration(
                "at least one monitored symbol is required".to_string(),
            ));
        }
        if !(self.priority_threshold_pct > 0.0 && self.priority_threshold_pct <= 100.0) {
            return Err(AppError::Configuration(format!(
                "priority threshold must be in (0, 100], got {}",
                self.priority_threshold_pct
            )));
        }
        if !(self.complete_threshold_pct > 0.0 && self.complete_threshold_pct <= 100.0) {
            return Err(AppError::Configuration(format!(
                "complete threshold must be in (0, 100], got {}",
                self.complete_threshold_pct
            )));
        }
        if self.empty_symbol_weight <= 0.0 {
            return Err(AppError::Configuration(
                "empty symbol weight must be positive".to_string(),
            ));
        }
        if self.full_cycle_interval.is_zero() || self.quick_cycle_interval.is_zero() {
            return Err(AppError::Configuration(
                "cycle intervals must be greater than zero".to_string(),
            ));
        }
        if self.recent_window_days == 0 || self.recent_window_days > MAX_RECENT_WINDOW_DAYS {
            return Err(AppError::Configuration(format!(
                "recent window must be between 1 and {} days, got {}",
                MAX_RECENT_WINDOW_DAYS, self.recent_window_days
            )));
        }
        self.chunk_policy.validate()?;
        self.holiday_dates()?;
        Ok(())
    }
}

/// Remote control poller configuration.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub poll_interval: Duration,
    /// Commands fetched per poll.
    pub batch_limit: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_limit: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database file.
    pub database_path: String,
    /// Start the orchestrator on boot.
    pub auto_start: bool,
    /// Yahoo Finance base URL.
    pub yahoo_base_url: String,
    /// Governor limits for the market-data provider.
    pub rate_limit: ProviderLimits,
    pub sync: SyncConfig,
    pub control: ControlConfig,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_uppercase())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();
        let default_limits = ProviderLimits::default();
        let default_policy = ChunkPolicy::default();
        let default_control = ControlConfig::default();

        let chunk_policy = ChunkPolicy {
            huge_gap_days: env_parse("CHUNK_TIER_HUGE_DAYS", default_policy.huge_gap_days),
            huge_gap_months: env_parse("CHUNK_TIER_HUGE_MONTHS", default_policy.huge_gap_months),
            large_gap_days: env_parse("CHUNK_TIER_LARGE_DAYS", default_policy.large_gap_days),
            large_gap_months: env_parse("CHUNK_TIER_LARGE_MONTHS", default_policy.large_gap_months),
            medium_gap_days: env_parse("CHUNK_TIER_MEDIUM_DAYS", default_policy.medium_gap_days),
            medium_gap_months: env_parse(
                "CHUNK_TIER_MEDIUM_MONTHS",
                default_policy.medium_gap_months,
            ),
        };

        let sync = SyncConfig {
            target_years: env_parse("TARGET_YEARS", defaults.target_years),
            monitored_symbols: env_list("MONITORED_SYMBOLS").unwrap_or(defaults.monitored_symbols),
            quick_symbols: env_list("QUICK_SYNC_SYMBOLS").unwrap_or(defaults.quick_symbols),
            priority_threshold_pct: env_parse(
                "PRIORITY_THRESHOLD_PCT",
                defaults.priority_threshold_pct,
            ),
            complete_threshold_pct: env_parse(
                "COMPLETE_THRESHOLD_PCT",
                defaults.complete_threshold_pct,
            ),
            empty_symbol_weight: env_parse(
                "EMPTY_SYMBOL_PRIORITY_WEIGHT",
                defaults.empty_symbol_weight,
            ),
            recent_window_days: env_parse("RECENT_WINDOW_DAYS", defaults.recent_window_days),
            incremental_symbol_limit: env_parse(
                "INCREMENTAL_SYMBOL_LIMIT",
                defaults.incremental_symbol_limit,
            ),
            full_cycle_interval: env_millis("FULL_CYCLE_INTERVAL_MS", defaults.full_cycle_interval),
            quick_cycle_interval: env_millis(
                "QUICK_CYCLE_INTERVAL_MS",
                defaults.quick_cycle_interval,
            ),
            analysis_delay: env_millis("ANALYSIS_DELAY_MS", defaults.analysis_delay),
            inter_chunk_delay: env_millis("INTER_CHUNK_DELAY_MS", defaults.inter_chunk_delay),
            inter_symbol_delay: env_millis("INTER_SYMBOL_DELAY_MS", defaults.inter_symbol_delay),
            chunk_error_delay: env_millis("CHUNK_ERROR_DELAY_MS", defaults.chunk_error_delay),
            rate_limit_error_delay: env_millis(
                "RATE_LIMIT_ERROR_DELAY_MS",
                defaults.rate_limit_error_delay,
            ),
            admission_margin: env_millis("ADMISSION_MARGIN_MS", defaults.admission_margin),
            chunk_policy,
            extra_holidays: env::var("EXTRA_HOLIDAYS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3002),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/gapsync.db".to_string()),
            auto_start: env::var("AUTO_START_SYNC")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            yahoo_base_url: env::var("YAHOO_BASE_URL")
                .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),
            rate_limit: ProviderLimits {
                max_calls_per_hour: env_parse("MAX_CALLS_PER_HOUR", default_limits.max_calls_per_hour),
                max_calls_per_day: env_parse("MAX_DAILY_API_CALLS", default_limits.max_calls_per_day),
                min_delay_between_calls: env_millis(
                    "MIN_DELAY_BETWEEN_CALLS_MS",
                    default_limits.min_delay_between_calls,
                ),
            },
            sync,
            control: ControlConfig {
                poll_interval: env_millis("CONTROL_POLL_INTERVAL_MS", default_control.poll_interval),
                batch_limit: env_parse("CONTROL_BATCH_LIMIT", default_control.batch_limit),
            },
        }
    }

    /// Validate every section. Startup aborts on the first error.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.sync.validate()?;
        if self.control.poll_interval.is_zero() || self.control.batch_limit == 0 {
            return Err(AppError::Configuration(
                "control poll interval and batch limit must be greater than zero".to_string(),
            ));
        }
        if self.database_path.trim().is_empty() {
            return Err(AppError::Configuration(
                "DATABASE_PATH must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            database_path: "data/gapsync.db".to_string(),
            auto_start: false,
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            rate_limit: ProviderLimits::default(),
            sync: SyncConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3002);
        assert!(!config.auto_start);
        assert_eq!(config.sync.target_years, 5);
        assert_eq!(config.sync.monitored_symbols.len(), 20);
        assert_eq!(config.sync.quick_symbols.len(), 5);
        assert_eq!(config.sync.priority_threshold_pct, 80.0);
        assert_eq!(config.rate_limit.max_calls_per_hour, 50);
        assert_eq!(config.rate_limit.max_calls_per_day, 1500);
        assert_eq!(config.rate_limit.min_delay_between_calls, Duration::from_secs(2));
        assert_eq!(config.control.poll_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_symbols() {
        let mut config = Config::default();
        config.sync.monitored_symbols.clear();
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.sync.priority_threshold_pct = 0.0;
        assert!(config.validate().is_err());

        config.sync.priority_threshold_pct = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_hourly_above_daily() {
        let mut config = Config::default();
        config.rate_limit.max_calls_per_hour = 2000;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.sync.quick_cycle_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.batch_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_recent_window() {
        let mut config = Config::default();
        config.sync.recent_window_days = 366;
        assert!(config.validate().is_ok());

        config.sync.recent_window_days = 367;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));

        config.sync.recent_window_days = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_holiday_parsing() {
        let mut sync = SyncConfig::default();
        sync.extra_holidays = vec!["2025-01-09".to_string(), " 2026-12-24 ".to_string()];
        let dates = sync.holiday_dates().unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2025, 1, 9).unwrap());

        sync.extra_holidays.push("not-a-date".to_string());
        assert!(matches!(sync.validate(), Err(AppError::Configuration(_))));
    }
}
