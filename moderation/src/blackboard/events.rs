//! Blackboard event types.
//!
//! These are audit records only; nothing reads them back to make decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerKind;
use crate::suppressor::SuppressReason;
use crate::types::InterventionType;

/// Everything the orchestrator writes to the blackboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlackboardEvent {
    /// The planner chose analyzers for a cycle.
    Plan {
        cycle: u64,
        kinds: Vec<AnalyzerKind>,
        timestamp: DateTime<Utc>,
    },

    /// A cycle finished.
    Checkpoint {
        cycle: u64,
        outcomes: usize,
        failures: usize,
        emitted: bool,
        timestamp: DateTime<Utc>,
    },

    /// An intervention was accepted and emitted.
    Intervention {
        intervention_id: String,
        intervention_type: InterventionType,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A candidate was vetoed by the suppressor.
    Suppressed {
        intervention_type: InterventionType,
        reason: SuppressReason,
        timestamp: DateTime<Utc>,
    },

    AnalyzerFailure {
        analyzer_name: String,
        error: String,
        retryable: bool,
        timestamp: DateTime<Utc>,
    },

    Warning {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The recovery agent stood in for a total analyzer outage.
    Recovery {
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

impl BlackboardEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Plan { timestamp, .. }
            | Self::Checkpoint { timestamp, .. }
            | Self::Intervention { timestamp, .. }
            | Self::Suppressed { timestamp, .. }
            | Self::AnalyzerFailure { timestamp, .. }
            | Self::Warning { timestamp, .. }
            | Self::Recovery { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Intervention { .. } => "intervention",
            Self::Suppressed { .. } => "suppressed",
            Self::AnalyzerFailure { .. } => "analyzer_failure",
            Self::Warning { .. } => "warning",
            Self::Recovery { .. } => "recovery",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = BlackboardEvent::Suppressed {
            intervention_type: InterventionType::TopicDrift,
            reason: SuppressReason::DuplicateMessage { age_ms: 30_000 },
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "suppressed");
        assert_eq!(json["reason"]["reason"], "duplicate_message");
        assert_eq!(event.event_type(), "suppressed");
    }
}
