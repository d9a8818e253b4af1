//! Per-provider admission control for upstream requests.
//!
//! Each provider keeps a ledger of call timestamps checked against a minimum
//! spacing, an hourly cap and a daily cap. The governor only answers "may I
//! call now" and "how long until I may"; callers record their own calls.

use crate::error::{AppError, Result};
use crate::types::RateLimitStatus;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Limits for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_calls_per_hour: u32,
    pub max_calls_per_day: u32,
    pub min_delay_between_calls: Duration,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            max_calls_per_hour: 50,
            max_calls_per_day: 1500,
            min_delay_between_calls: Duration::from_secs(2),
        }
    }
}

impl ProviderLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_hour == 0 || self.max_calls_per_day == 0 {
            return Err(AppError::Configuration(
                "rate limit caps must be greater than zero".to_string(),
            ));
        }
        if self.max_calls_per_hour > self.max_calls_per_day {
            return Err(AppError::Configuration(format!(
                "hourly cap {} exceeds daily cap {}",
                self.max_calls_per_hour, self.max_calls_per_day
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CallLedger {
    /// Ascending call times within the last 24 hours.
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
}

impl CallLedger {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= DAY {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn calls_within(&self, now: Instant, window: Duration) -> usize {
        self.calls
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }

    /// Time until enough calls age out of `window` to fall below `cap`.
    fn window_wait(&self, now: Instant, window: Duration, cap: u32) -> Duration {
        let in_window = self.calls_within(now, window);
        let cap = cap as usize;
        if in_window < cap {
            return Duration::ZERO;
        }
        // The call that has to expire for the count to drop below the cap.
        let idx = self.calls.len() - in_window + (in_window - cap);
        match self.calls.get(idx) {
            Some(&t) => (t + window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn delay_wait(&self, now: Instant, min_delay: Duration) -> Duration {
        match self.last_call {
            Some(last) => (last + min_delay).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Rate limit governor shared by every sync pass.
pub struct RateLimitGovernor {
    limits: DashMap<String, ProviderLimits>,
    ledgers: DashMap<String, CallLedger>,
    default_limits: ProviderLimits,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self::new(ProviderLimits::default())
    }
}

impl RateLimitGovernor {
    /// Create a governor. Providers without explicit limits use `default_limits`.
    pub fn new(default_limits: ProviderLimits) -> Self {
        Self {
            limits: DashMap::new(),
            ledgers: DashMap::new(),
            default_limits,
        }
    }

    /// Set limits for a provider. The existing ledger is kept.
    pub fn configure(&self, provider: &str, limits: ProviderLimits) {
        self.limits.insert(provider.to_string(), limits);
    }

    pub fn limits(&self, provider: &str) -> ProviderLimits {
        self.limits
            .get(provider)
            .map(|l| *l)
            .unwrap_or(self.default_limits)
    }

    pub fn can_make_request(&self, provider: &str) -> bool {
        self.wait_time(provider).is_zero()
    }

    /// Record a call made just now.
    pub fn record_api_call(&self, provider: &str) {
        let now = Instant::now();
        let mut ledger = self.ledgers.entry(provider.to_string()).or_default();
        ledger.prune(now);
        ledger.calls.push_back(now);
        ledger.last_call = Some(now);
    }

    /// How long until a request would be admitted. Zero when admitted now.
    pub fn wait_time(&self, provider: &str) -> Duration {
        let limits = self.limits(provider);
        let now = Instant::now();
        let mut ledger = match self.ledgers.get_mut(provider) {
            Some(l) => l,
            None => return Duration::ZERO,
        };
        ledger.prune(now);

        ledger
            .delay_wait(now, limits.min_delay_between_calls)
            .max(ledger.window_wait(now, HOUR, limits.max_calls_per_hour))
            .max(ledger.window_wait(now, DAY, limits.max_calls_per_day))
    }

    /// Admission check as a `Result`, for callers that propagate refusal.
    pub fn check(&self, provider: &str) -> Result<()> {
        let wait = self.wait_time(provider);
        if wait.is_zero() {
            Ok(())
        } else {
            Err(AppError::RateLimitExceeded {
                provider: provider.to_string(),
                wait,
            })
        }
    }

    /// Wait until admitted. Returns false if cancelled first.
    ///
    /// `margin` is added to every computed wait so the request lands just
    /// after the window boundary rather than on it.
    pub async fn acquire(
        &self,
        provider: &str,
        margin: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let wait = self.wait_time(provider);
            if wait.is_zero() {
                return true;
            }
            debug!("Rate limit: waiting {:?} for provider '{}'", wait + margin, provider);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait + margin) => {}
            }
        }
    }

    pub fn status(&self, provider: &str) -> RateLimitStatus {
        let limits = self.limits(provider);
        let wait = self.wait_time(provider);
        let now = Instant::now();

        let (calls_last_hour, calls_last_day, since_last) = match self.ledgers.get(provider) {
            Some(ledger) => (
                ledger.calls_within(now, HOUR),
                ledger.calls_within(now, DAY),
                ledger
                    .last_call
                    .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            ),
            None => (0, 0, None),
        };

        RateLimitStatus {
            provider: provider.to_string(),
            calls_last_hour,
            calls_last_day,
            max_calls_per_hour: limits.max_calls_per_hour,
            max_calls_per_day: limits.max_calls_per_day,
            can_make_request: wait.is_zero(),
            wait_time_ms: wait.as_millis() as u64,
            time_since_last_call_ms: since_last,
            min_delay_ms: limits.min_delay_between_calls.as_millis() as u64,
        }
    }

    /// Entries currently held for a provider, after pruning.
    pub fn ledger_len(&self, provider: &str) -> usize {
        let now = Instant::now();
        match self.ledgers.get_mut(provider) {
            Some(mut ledger) => {
                ledger.prune(now);
                ledger.calls.len()
            }
            None => 0,
        }
    }
}
