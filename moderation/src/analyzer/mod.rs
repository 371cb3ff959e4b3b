//! Analyzer contract and registry.
//!
//! An analyzer looks at a read-only [`SessionView`] plus the most recent
//! transcript entries and either asks for an intervention or not. Analyzers
//! are interchangeable: the planner picks [`AnalyzerKind`]s, the registry
//! maps kinds to implementations, and the executor only ever sees
//! `Arc<dyn Analyzer>`.
//!
//! ```text
//! Planner ──kinds──▶ AnalyzerRegistry::select ──Arc<dyn Analyzer>──▶ ParallelExecutor
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = AnalyzerRegistry::with_heuristics(&config.planner);
//! let selected = registry.select(&[AnalyzerKind::Topic]);
//! ```

pub mod participation;
pub mod principle;
pub mod topic;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::error::AnalyzerError;
use crate::types::{AnalysisOutcome, InterventionType, SessionView, TranscriptEntry};

pub use participation::ParticipationAnalyzer;
pub use principle::PrincipleAnalyzer;
pub use topic::TopicAnalyzer;

/// The closed set of analyzer domains.
///
/// Declaration order is the canonical plan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Topic,
    Principle,
    Participation,
}

impl AnalyzerKind {
    pub fn all() -> &'static [AnalyzerKind] {
        &[Self::Topic, Self::Principle, Self::Participation]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Principle => "principle",
            Self::Participation => "participation",
        }
    }

    /// Intervention type an analyzer of this kind reports.
    pub fn intervention_type(self) -> InterventionType {
        match self {
            Self::Topic => InterventionType::TopicDrift,
            Self::Principle => InterventionType::PrincipleViolation,
            Self::Participation => InterventionType::ParticipationImbalance,
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of conversation analysis.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    /// Name used in logs, failures and `trigger_context`.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn analyze(
        &self,
        session: &SessionView,
        recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError>;
}

/// Shared analyzer handle.
pub type SharedAnalyzer = Arc<dyn Analyzer>;

/// Maps each [`AnalyzerKind`] to at most one implementation.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<AnalyzerKind, SharedAnalyzer>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three keyword heuristics.
    pub fn with_heuristics(config: &PlannerConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TopicAnalyzer::new(
            config.off_topic_keywords.clone(),
        )));
        registry.register(Arc::new(PrincipleAnalyzer::new()));
        registry.register(Arc::new(ParticipationAnalyzer::default()));
        registry
    }

    /// Register an analyzer, replacing any previous one of the same kind.
    pub fn register(&mut self, analyzer: SharedAnalyzer) -> Option<SharedAnalyzer> {
        self.analyzers.insert(analyzer.kind(), analyzer)
    }

    pub fn get(&self, kind: AnalyzerKind) -> Option<&SharedAnalyzer> {
        self.analyzers.get(&kind)
    }

    pub fn contains(&self, kind: AnalyzerKind) -> bool {
        self.analyzers.contains_key(&kind)
    }

    /// Registered kinds in canonical order.
    pub fn kinds(&self) -> Vec<AnalyzerKind> {
        self.analyzers.keys().copied().collect()
    }

    /// Resolve planned kinds to implementations, preserving plan order and
    /// skipping kinds with nothing registered.
    pub fn select(&self, kinds: &[AnalyzerKind]) -> Vec<SharedAnalyzer> {
        kinds
            .iter()
            .filter_map(|k| self.analyzers.get(k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}

impl fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Lowercased text of an entry, for keyword matching.
pub(crate) fn lowered(entry: &TranscriptEntry) -> String {
    entry.text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let mut kinds = vec![
            AnalyzerKind::Participation,
            AnalyzerKind::Topic,
            AnalyzerKind::Principle,
        ];
        kinds.sort();
        assert_eq!(kinds, AnalyzerKind::all());
    }

    #[test]
    fn test_with_heuristics_registers_all_kinds() {
        let registry = AnalyzerRegistry::with_heuristics(&PlannerConfig::default());
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.kinds(), AnalyzerKind::all());
    }

    #[test]
    fn test_select_skips_unregistered_and_keeps_order() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(Arc::new(PrincipleAnalyzer::new()));
        registry.register(Arc::new(TopicAnalyzer::new(vec![])));

        let selected = registry.select(&[
            AnalyzerKind::Topic,
            AnalyzerKind::Principle,
            AnalyzerKind::Participation,
        ]);
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["topic", "principle"]);
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let mut registry = AnalyzerRegistry::new();
        assert!(registry
            .register(Arc::new(TopicAnalyzer::new(vec![])))
            .is_none());
        assert!(registry
            .register(Arc::new(TopicAnalyzer::new(vec!["lunch".into()])))
            .is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_kind_maps_to_intervention_type() {
        assert_eq!(
            AnalyzerKind::Participation.intervention_type(),
            InterventionType::ParticipationImbalance
        );
    }
}
