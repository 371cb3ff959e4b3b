//! Core records shared by every stage of a moderation cycle.
//!
//! These are the values that cross component boundaries: transcript entries
//! flowing in, analyzer outcomes and failures flowing through the executor,
//! and interventions flowing out to the session consumer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session identifier.
pub type SessionId = String;

/// Generate a short prefixed identifier (`int_1a2b3c4d`, `tr_9f8e7d6c`).
pub fn short_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

/// One line of the conversation.
///
/// Immutable once it lands in the permanent transcript. While an utterance
/// is still being transcribed the session keeps a partial entry keyed by
/// the upstream item id and replaces its text on every revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub speaker: String,
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub latency_ms: f64,
}

impl TranscriptEntry {
    /// Speaker label used when the upstream cannot attribute an utterance.
    pub const UNKNOWN_SPEAKER: &'static str = "Unknown";

    /// Create an entry with a fresh id.
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        let speaker = speaker.into();
        let confidence = if speaker == Self::UNKNOWN_SPEAKER {
            0.0
        } else {
            1.0
        };
        Self {
            id: short_id("tr"),
            timestamp: Utc::now(),
            speaker,
            text: text.into(),
            confidence,
            latency_ms: 0.0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the speaker is attributed to someone.
    pub fn has_speaker(&self) -> bool {
        !self.speaker.is_empty() && self.speaker != Self::UNKNOWN_SPEAKER
    }

    /// `"<timestamp> <speaker>: <text>"`, the form used in source citations.
    pub fn citation(&self) -> String {
        format!(
            "{} {}: {}",
            self.timestamp.to_rfc3339(),
            self.speaker,
            self.text
        )
    }
}

/// A meeting participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub speaking_count: u32,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            role: String::new(),
            speaking_count: 0,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// Category of a moderator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    TopicDrift,
    PrincipleViolation,
    ParticipationImbalance,
    /// Neutral bucket used for sanitized, recovery and held-for-review output.
    DecisionStyle,
}

impl InterventionType {
    pub fn all() -> &'static [InterventionType] {
        &[
            Self::TopicDrift,
            Self::PrincipleViolation,
            Self::ParticipationImbalance,
            Self::DecisionStyle,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopicDrift => "topic_drift",
            Self::PrincipleViolation => "principle_violation",
            Self::ParticipationImbalance => "participation_imbalance",
            Self::DecisionStyle => "decision_style",
        }
    }

    /// Merge priority: higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::PrincipleViolation => 3,
            Self::TopicDrift => 2,
            Self::ParticipationImbalance => 1,
            Self::DecisionStyle => 0,
        }
    }
}

impl std::fmt::Display for InterventionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one analyzer concluded this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub analyzer_name: String,
    pub needs_intervention: bool,
    pub intervention_type: InterventionType,
    pub message: String,
    /// Clamped to 0.0–1.0.
    pub confidence: f32,
    pub violated_principle: Option<String>,
    pub parking_lot_item: Option<String>,
    pub suggested_speaker: Option<String>,
}

impl AnalysisOutcome {
    /// An outcome that asks for no intervention.
    pub fn clear(analyzer_name: impl Into<String>, intervention_type: InterventionType) -> Self {
        Self {
            analyzer_name: analyzer_name.into(),
            needs_intervention: false,
            intervention_type,
            message: String::new(),
            confidence: 0.0,
            violated_principle: None,
            parking_lot_item: None,
            suggested_speaker: None,
        }
    }

    /// An outcome that asks for an intervention.
    pub fn flag(
        analyzer_name: impl Into<String>,
        intervention_type: InterventionType,
        message: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            analyzer_name: analyzer_name.into(),
            needs_intervention: true,
            intervention_type,
            message: message.into(),
            confidence: confidence.clamp(0.0, 1.0),
            violated_principle: None,
            parking_lot_item: None,
            suggested_speaker: None,
        }
    }

    pub fn with_violated_principle(mut self, principle: impl Into<String>) -> Self {
        self.violated_principle = Some(principle.into());
        self
    }

    pub fn with_parking_lot_item(mut self, item: impl Into<String>) -> Self {
        self.parking_lot_item = Some(item.into());
        self
    }

    pub fn with_suggested_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.suggested_speaker = Some(speaker.into());
        self
    }
}

/// An analyzer that crashed, timed out or returned an error.
///
/// Kept distinct from [`AnalysisOutcome`] so "no intervention needed" is never
/// confused with "this analyzer failed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerFailure {
    pub analyzer_name: String,
    pub error: String,
    pub retryable: bool,
}

/// A moderator message pushed to the live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub intervention_type: InterventionType,
    pub message: String,
    pub trigger_context: String,
    pub violated_principle: Option<String>,
    pub parking_lot_item: Option<String>,
    pub suggested_speaker: Option<String>,
}

/// Marker that separates the trigger description from appended citations.
pub const SOURCE_MARKER: &str = "source:";

impl Intervention {
    /// Build an intervention from an analyzer outcome.
    pub fn from_outcome(outcome: &AnalysisOutcome) -> Self {
        Self {
            id: short_id("int"),
            timestamp: Utc::now(),
            intervention_type: outcome.intervention_type,
            message: outcome.message.clone(),
            trigger_context: format!("Detected by {}", outcome.analyzer_name),
            violated_principle: outcome.violated_principle.clone(),
            parking_lot_item: outcome.parking_lot_item.clone(),
            suggested_speaker: outcome.suggested_speaker.clone(),
        }
    }

    /// Append `entry` to the trigger context as a source citation.
    pub fn attach_source(&mut self, entry: &TranscriptEntry) {
        self.trigger_context = format!(
            "{} | {} {}",
            self.trigger_context,
            SOURCE_MARKER,
            entry.citation()
        );
    }

    pub fn has_source(&self) -> bool {
        self.trigger_context.contains(SOURCE_MARKER)
    }

    /// The citation strings appended to the trigger context.
    pub fn citations(&self) -> Vec<String> {
        self.trigger_context
            .split(" | ")
            .filter_map(|part| part.strip_prefix(SOURCE_MARKER))
            .map(|c| c.trim().to_string())
            .collect()
    }
}

/// Read-only view of a session handed to analyzers.
///
/// Analyzers never see the mutable session state; every change flows back
/// through the session task.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session_id: SessionId,
    pub title: String,
    pub agenda: String,
    pub participants: Arc<[Participant]>,
    pub recent: Arc<[TranscriptEntry]>,
}

impl SessionView {
    pub fn new(
        session_id: impl Into<String>,
        agenda: impl Into<String>,
        participants: Vec<Participant>,
        recent: Vec<TranscriptEntry>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            title: String::new(),
            agenda: agenda.into(),
            participants: participants.into(),
            recent: recent.into(),
        }
    }

    pub fn participant_names(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.name.as_str())
    }

    pub fn latest(&self) -> Option<&TranscriptEntry> {
        self.recent.last()
    }
}
