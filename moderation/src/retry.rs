//! Bounded retries and analyzer health tracking.
//!
//! # Design
//!
//! ```text
//! call
//!   ├─ Ok                        → health.record_success()
//!   ├─ Err(retriable), budget    → sleep(backoff) → call again
//!   └─ Err(terminal | exhausted) → health.record_failure() → AnalyzerFailure
//! ```
//!
//! One [`RetryPolicy`] is shared by analyzer calls and safety checks. The
//! attempt budget is the smaller of the configured `max_attempts` and what
//! the error's [`RetryCategory`](crate::error::RetryCategory) allows.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::AnalyzerError;

/// Retry policy with capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1` (zero-based `attempt` that failed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(16) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails terminally or the budget runs out.
    ///
    /// `op` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AnalyzerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AnalyzerError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let category = err.retry_category();
                    let allowed = category
                        .default_max_retries()
                        .map(|retries| (retries + 1).min(self.max_attempts))
                        .unwrap_or(1);
                    if attempt + 1 >= allowed {
                        return Err(err);
                    }
                    let delay = self.backoff_for(attempt);
                    debug!(
                        label,
                        attempt,
                        category = %category,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// How much of an analyzer's capability is currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// Last call succeeded.
    Full,
    /// One or two consecutive failures.
    Partial,
    /// Three or more consecutive failures.
    Unavailable,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Consecutive failures before an analyzer is considered unavailable.
pub const UNAVAILABLE_AFTER: u32 = 3;
/// Consecutive successes needed to recover to [`HealthLevel::Full`].
pub const RECOVER_AFTER: u32 = 3;

/// Health of one analyzer, tracked across cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerHealth {
    pub analyzer_name: String,
    pub level: HealthLevel,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl AnalyzerHealth {
    pub fn new(analyzer_name: &str) -> Self {
        Self {
            analyzer_name: analyzer_name.to_string(),
            level: HealthLevel::Full,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_calls: 0,
            total_failures: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;

        if self.level != HealthLevel::Full && self.consecutive_successes >= RECOVER_AFTER {
            self.level = HealthLevel::Full;
            self.last_change = Utc::now();
            self.last_error = None;
        }
    }

    pub fn record_failure(&mut self, error: &str) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.to_string());

        let new_level = if self.consecutive_failures >= UNAVAILABLE_AFTER {
            HealthLevel::Unavailable
        } else {
            HealthLevel::Partial
        };
        if new_level != self.level {
            self.level = new_level;
            self.last_change = Utc::now();
        }
    }

    /// Failure rate as a fraction (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}
