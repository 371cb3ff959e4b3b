//! Fallback output when every analyzer in a cycle failed, plus the sliding
//! failure window that raises the "repeated analyzer failures" warning.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RecoveryConfig;
use crate::executor::ExecutionBatch;
use crate::types::{AnalysisOutcome, InterventionType};

/// Name reported in `trigger_context` for recovery output.
pub const RECOVERY_ANALYZER: &str = "recovery";

#[derive(Debug, Clone)]
pub struct RecoveryAgent {
    message: String,
    confidence: f32,
}

impl RecoveryAgent {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            message: config.message.clone(),
            confidence: config.confidence,
        }
    }

    /// A low-confidence check-in, produced only on a total outage.
    pub fn recover(&self, batch: &ExecutionBatch) -> Option<AnalysisOutcome> {
        if !batch.total_outage() {
            return None;
        }
        Some(AnalysisOutcome::flag(
            RECOVERY_ANALYZER,
            InterventionType::DecisionStyle,
            self.message.clone(),
            self.confidence,
        ))
    }
}

/// Counts analyzer failures inside a sliding time window.
#[derive(Debug, Clone)]
pub struct FailureMonitor {
    window: Duration,
    threshold: usize,
    failures: VecDeque<Instant>,
}

impl FailureMonitor {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            window: Duration::from_secs(config.failure_window_secs),
            threshold: config.failure_threshold.max(1),
            failures: VecDeque::new(),
        }
    }

    /// Record `count` failures at `now`. Returns a warning once the window
    /// holds `threshold` or more.
    pub fn observe(&mut self, count: usize, now: Instant) -> Option<String> {
        for _ in 0..count {
            self.failures.push_back(now);
        }
        while let Some(front) = self.failures.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        (count > 0 && self.failures.len() >= self.threshold).then(|| {
            format!(
                "repeated analyzer failures: {} in the last {}s",
                self.failures.len(),
                self.window.as_secs()
            )
        })
    }

    pub fn in_window(&self) -> usize {
        self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalyzerFailure;

    fn failure(name: &str) -> AnalyzerFailure {
        AnalyzerFailure {
            analyzer_name: name.into(),
            error: "down".into(),
            retryable: true,
        }
    }

    #[test]
    fn test_recovers_only_on_total_outage() {
        let agent = RecoveryAgent::new(&RecoveryConfig::default());

        let outage = ExecutionBatch {
            failures: vec![failure("topic"), failure("principle")],
            ..ExecutionBatch::default()
        };
        let outcome = agent.recover(&outage).unwrap();
        assert_eq!(outcome.intervention_type, InterventionType::DecisionStyle);
        assert!((outcome.confidence - 0.2).abs() < f32::EPSILON);
        assert_eq!(outcome.analyzer_name, RECOVERY_ANALYZER);

        let partial = ExecutionBatch {
            outcomes: vec![AnalysisOutcome::clear("topic", InterventionType::TopicDrift)],
            failures: vec![failure("principle")],
            ..ExecutionBatch::default()
        };
        assert!(agent.recover(&partial).is_none());
        assert!(agent.recover(&ExecutionBatch::default()).is_none());
    }

    #[test]
    fn test_failure_window_warns_at_threshold() {
        let mut monitor = FailureMonitor::new(&RecoveryConfig::default());
        let t0 = Instant::now();
        assert!(monitor.observe(1, t0).is_none());
        assert!(monitor.observe(1, t0 + Duration::from_secs(10)).is_none());
        let warning = monitor.observe(1, t0 + Duration::from_secs(20)).unwrap();
        assert!(warning.starts_with("repeated analyzer failures: 3"));
    }

    #[test]
    fn test_failure_window_slides() {
        let mut monitor = FailureMonitor::new(&RecoveryConfig::default());
        let t0 = Instant::now();
        monitor.observe(2, t0);
        assert!(monitor.observe(1, t0 + Duration::from_secs(61)).is_none());
        assert_eq!(monitor.in_window(), 1);
    }

    #[test]
    fn test_no_warning_without_new_failures() {
        let mut monitor = FailureMonitor::new(&RecoveryConfig::default());
        let t0 = Instant::now();
        assert!(monitor.observe(3, t0).is_some());
        assert!(monitor.observe(0, t0 + Duration::from_secs(1)).is_none());
    }
}
