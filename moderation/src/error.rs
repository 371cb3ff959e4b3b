//! Analyzer error taxonomy with retry classification.
//!
//! Every failure an analyzer or safety classifier can report is represented
//! here. The retry policy asks `retry_category()` instead of matching on
//! strings.
//!
//! | Category        | Retriable | Max retries |
//! |-----------------|-----------|-------------|
//! | Transient       | yes       | 2           |
//! | RateLimit       | yes       | 3           |
//! | ParseFailure    | yes       | 1           |
//! | Timeout         | no        | -           |
//! | Configuration   | no        | -           |
//! | Cancelled       | no        | -           |
//! | Internal        | no        | -           |

use std::fmt;

use thiserror::Error;

/// Classification used by [`RetryPolicy`](crate::retry::RetryPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network or backend hiccup; safe to try again.
    Transient,
    /// Backend rate limit; retry with backoff.
    RateLimit,
    /// Backend answered with something unparseable.
    ParseFailure,
    /// The per-call deadline elapsed. Retrying would blow the cycle budget.
    Timeout,
    /// Misconfigured analyzer; retrying cannot help.
    Configuration,
    /// Session closed while the call was in flight.
    Cancelled,
    /// Bug or panic inside the analyzer.
    Internal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit | Self::ParseFailure)
    }

    /// Suggested retry count for retriable categories.
    pub fn default_max_retries(self) -> Option<u32> {
        match self {
            Self::Transient => Some(2),
            Self::RateLimit => Some(3),
            Self::ParseFailure => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ParseFailure => write!(f, "parse_failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned by an analyzer or safety classifier call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyzerError {
    // ── Retriable ─────────────────────────────────────────────────────────
    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("unparseable response: {0}")]
    Parse(String),

    // ── Non-retriable ─────────────────────────────────────────────────────
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cancelled")]
    Cancelled,

    #[error("analyzer panicked: {0}")]
    Panicked(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalyzerError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Backend(_) => RetryCategory::Transient,
            Self::RateLimit(_) => RetryCategory::RateLimit,
            Self::Parse(_) => RetryCategory::ParseFailure,
            Self::Timeout(_) => RetryCategory::Timeout,
            Self::Configuration(_) => RetryCategory::Configuration,
            Self::Cancelled => RetryCategory::Cancelled,
            Self::Panicked(_) | Self::Internal(_) => RetryCategory::Internal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_categories() {
        assert!(AnalyzerError::Backend("503".into()).is_retriable());
        assert!(AnalyzerError::RateLimit("429".into()).is_retriable());
        assert!(AnalyzerError::Parse("bad json".into()).is_retriable());
        assert!(!AnalyzerError::Timeout(10_000).is_retriable());
        assert!(!AnalyzerError::Configuration("no key".into()).is_retriable());
        assert!(!AnalyzerError::Cancelled.is_retriable());
        assert!(!AnalyzerError::Panicked("boom".into()).is_retriable());
    }

    #[test]
    fn test_max_retries_only_for_retriable() {
        for cat in [
            RetryCategory::Transient,
            RetryCategory::RateLimit,
            RetryCategory::ParseFailure,
        ] {
            assert!(cat.default_max_retries().is_some(), "{cat}");
        }
        for cat in [
            RetryCategory::Timeout,
            RetryCategory::Configuration,
            RetryCategory::Cancelled,
            RetryCategory::Internal,
        ] {
            assert!(cat.default_max_retries().is_none(), "{cat}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AnalyzerError::Timeout(250).to_string(),
            "timed out after 250 ms"
        );
        assert_eq!(RetryCategory::RateLimit.to_string(), "rate_limit");
    }
}
