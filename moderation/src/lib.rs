//! Live Conversation Moderation Library
//!
//! This library provides:
//! - Concurrent conversation analyzers behind one `Analyzer` trait
//! - A per-cycle pipeline that merges, suppresses and safety-checks interventions
//! - A live session task that owns transcript state, upstream reconnects and
//!   cycle scheduling
//!
//! # Pipeline
//!
//! ```text
//! transcript ─▶ Planner ─▶ ParallelExecutor ─▶ merger ─▶ DuplicateSuppressor
//!                               │ (all failed)              │
//!                               ▼                           ▼
//!                         RecoveryAgent ──────────▶ SafetyVerifier ─▶ intervention
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let (handle, mut events, done) = SessionBuilder::new(ModerationConfig::default())
//!     .agenda("Q3 budget")
//!     .spawn();
//! handle.inject("Ana", "We must just decide.").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod analyzer;
pub mod blackboard;
pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod merger;
pub mod orchestrator;
pub mod planner;
pub mod recovery;
pub mod retry;
pub mod safety;
pub mod session;
pub mod suppressor;
pub mod types;

// Re-export key analyzer types
pub use analyzer::{
    Analyzer, AnalyzerKind, AnalyzerRegistry, ParticipationAnalyzer, PrincipleAnalyzer,
    SharedAnalyzer, TopicAnalyzer,
};

// Re-export key cycle types
pub use config::{ConfigError, ModerationConfig};
pub use error::{AnalyzerError, RetryCategory};
pub use executor::{ExecutionBatch, ParallelExecutor};
pub use orchestrator::{CycleInput, CycleReport, Orchestrator, SharedOrchestrator};
pub use planner::{Plan, Planner};
pub use retry::{AnalyzerHealth, HealthLevel, RetryPolicy};
pub use safety::{PermissiveClassifier, SafetyClassifier, SafetyReport, SafetyVerdict};
pub use suppressor::{DuplicateSuppressor, SuppressReason, Verdict};

// Re-export key session types
pub use session::{
    ControlMessage, DialogueGenerator, DialogueLine, SessionBuilder, SessionEvent, SessionHandle,
    SessionRecord, SessionRegistry, TranscriptionSource, UpstreamError, UpstreamSink,
};

pub use types::{
    AnalysisOutcome, AnalyzerFailure, Intervention, InterventionType, Participant, SessionId,
    SessionView, TranscriptEntry,
};
