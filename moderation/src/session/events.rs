//! Messages crossing the session boundary.
//!
//! * [`UpstreamEvent`]: from the transcription side into the session task.
//! * [`ControlMessage`]: from the session owner into the session task.
//! * [`SessionEvent`]: from the session task out to the consumer, serialized
//!   as `{"type": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::connection::ConnectionState;
use crate::types::{Intervention, InterventionType, Participant, TranscriptEntry};

/// Failure reported by a transcription source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Bad credentials, unknown model and similar. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("stream error: {0}")]
    Stream(String),

    /// Reconnect attempts used up. The connection is failed for good.
    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },
}

impl UpstreamError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "STT_CONFIGURATION_ERROR",
            Self::Connection(_) => "STT_CONNECTION_ERROR",
            Self::Stream(_) => "STT_ERROR",
            Self::Exhausted { .. } => "STT_RECONNECT_EXHAUSTED",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Exhausted { .. })
    }
}

/// Event delivered by the upstream side.
///
/// Everything except `Partial` travels on the priority channel.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Final {
        text: String,
        latency_ms: f64,
        item_id: Option<String>,
        speaker: Option<String>,
    },
    Partial {
        item_id: String,
        text: String,
    },
    SpeechEnded,
    /// Connection state change, produced by the supervisor.
    Status(ConnectionState),
    /// Error to surface to the consumer, produced by the supervisor.
    Failure(UpstreamError),
}

/// Inbound control from whoever owns the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    UpdateParticipants(Vec<Participant>),
    UpdateAgenda {
        title: Option<String>,
        agenda: Option<String>,
    },
    InjectTranscript {
        speaker: String,
        text: String,
    },
    StartDialogue,
    StopDialogue,
    Audio(Vec<u8>),
    Close,
}

/// Intervention as the consumer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionPayload {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub intervention_type: InterventionType,
    pub message: String,
    pub trigger_context: String,
    pub violated_principle: Option<String>,
    pub parking_lot_item: Option<String>,
    pub suggested_speaker: Option<String>,
    pub citations: Vec<String>,
}

impl From<&Intervention> for InterventionPayload {
    fn from(i: &Intervention) -> Self {
        Self {
            id: i.id.clone(),
            timestamp: i.timestamp.to_rfc3339(),
            intervention_type: i.intervention_type,
            message: i.message.clone(),
            trigger_context: i.trigger_context.clone(),
            violated_principle: i.violated_principle.clone(),
            parking_lot_item: i.parking_lot_item.clone(),
            suggested_speaker: i.suggested_speaker.clone(),
            citations: i.citations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerShare {
    pub speaker: String,
    pub count: usize,
    pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerStats {
    pub total: usize,
    pub speakers: Vec<SpeakerShare>,
}

/// Transcription status as the consumer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttStatus {
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl SttStatus {
    pub fn from_connection(state: ConnectionState) -> Option<Self> {
        match state {
            ConnectionState::Connecting => Some(Self::Connecting),
            ConnectionState::Connected => Some(Self::Connected),
            ConnectionState::Reconnecting => Some(Self::Reconnecting),
            ConnectionState::Failed => Some(Self::Failed),
            ConnectionState::Disconnected | ConnectionState::Closed => None,
        }
    }
}

/// Outbound event to the session consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    Transcript(TranscriptEntry),
    TranscriptUpdate(TranscriptEntry),
    Intervention(InterventionPayload),
    SpeakerStats(SpeakerStats),
    SttStatus {
        status: SttStatus,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    DialogueStatus {
        active: bool,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Transcript(_) => "transcript",
            Self::TranscriptUpdate(_) => "transcript_update",
            Self::Intervention(_) => "intervention",
            Self::SpeakerStats(_) => "speaker_stats",
            Self::SttStatus { .. } => "stt_status",
            Self::Error { .. } => "error",
            Self::DialogueStatus { .. } => "dialogue_status",
        }
    }

    pub fn error(code: &str, message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        }
    }
}

impl From<&UpstreamError> for SessionEvent {
    fn from(err: &UpstreamError) -> Self {
        Self::error(err.code(), err.to_string(), err.is_recoverable())
    }
}
