//! Cycle planner: decides which analyzers run for newly arrived transcript.
//!
//! ```text
//! entries < 2                         → no-op
//! calls % topic_interval == 0         → topic
//! latest has off-topic keyword        → topic
//! latest has decision keyword         → principle
//! calls % participation_interval == 0 → participation (roster > 1 only)
//! domain unresolved                   → re-invoke that kind
//! ```
//!
//! Output is always in canonical [`AnalyzerKind`] order and only contains
//! kinds with a registered analyzer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::AnalyzerKind;
use crate::config::PlannerConfig;
use crate::types::TranscriptEntry;

/// Snapshot of what the planner needs from the session.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub transcript_len: usize,
    pub latest: Option<&'a TranscriptEntry>,
    pub participant_count: usize,
    pub unresolved: &'a BTreeSet<AnalyzerKind>,
    pub available: &'a [AnalyzerKind],
}

/// The planner's decision for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub kinds: Vec<AnalyzerKind>,
    /// Planner call count at the time of this plan (0 for gated calls).
    pub call_number: u64,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Planner {
    config: PlannerConfig,
    off_topic: Vec<String>,
    decision: Vec<String>,
    calls: u64,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        let lower =
            |words: &[String]| -> Vec<String> { words.iter().map(|w| w.to_lowercase()).collect() };
        Self {
            off_topic: lower(&config.off_topic_keywords),
            decision: lower(&config.decision_keywords),
            config,
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn plan(&mut self, input: &PlanInput<'_>) -> Plan {
        if input.transcript_len < 2 {
            return Plan::default();
        }
        self.calls += 1;

        let text = input
            .latest
            .map(|e| e.text.to_lowercase())
            .unwrap_or_default();
        let mentions = |words: &[String]| words.iter().any(|w| !w.is_empty() && text.contains(w));

        let mut wanted = BTreeSet::new();
        if self.calls % u64::from(self.config.topic_interval.max(1)) == 0 || mentions(&self.off_topic)
        {
            wanted.insert(AnalyzerKind::Topic);
        }
        if mentions(&self.decision) {
            wanted.insert(AnalyzerKind::Principle);
        }
        if self.calls % u64::from(self.config.participation_interval.max(1)) == 0
            && input.participant_count > 1
        {
            wanted.insert(AnalyzerKind::Participation);
        }
        for kind in input.unresolved {
            if *kind != AnalyzerKind::Participation || input.participant_count > 1 {
                wanted.insert(*kind);
            }
        }

        // BTreeSet iteration is the canonical order.
        let kinds: Vec<AnalyzerKind> = wanted
            .into_iter()
            .filter(|k| input.available.contains(k))
            .collect();

        if !kinds.is_empty() {
            debug!(call = self.calls, ?kinds, "Planned analyzers");
        }
        Plan {
            kinds,
            call_number: self.calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[AnalyzerKind] = &[
        AnalyzerKind::Topic,
        AnalyzerKind::Principle,
        AnalyzerKind::Participation,
    ];

    fn input<'a>(
        len: usize,
        latest: &'a TranscriptEntry,
        participants: usize,
        unresolved: &'a BTreeSet<AnalyzerKind>,
    ) -> PlanInput<'a> {
        PlanInput {
            transcript_len: len,
            latest: Some(latest),
            participant_count: participants,
            unresolved,
            available: ALL,
        }
    }

    #[test]
    fn test_fewer_than_two_entries_is_noop() {
        let mut planner = Planner::new(PlannerConfig::default());
        let entry = TranscriptEntry::new("Ana", "weekend plans?");
        let none = BTreeSet::new();
        let plan = planner.plan(&input(1, &entry, 3, &none));
        assert!(plan.is_empty());
        assert_eq!(planner.calls(), 0);
    }

    #[test]
    fn test_topic_every_third_call() {
        let mut planner = Planner::new(PlannerConfig::default());
        let entry = TranscriptEntry::new("Ana", "Budget line items.");
        let none = BTreeSet::new();
        assert!(planner.plan(&input(2, &entry, 1, &none)).is_empty());
        assert!(planner.plan(&input(3, &entry, 1, &none)).is_empty());
        assert_eq!(
            planner.plan(&input(4, &entry, 1, &none)).kinds,
            vec![AnalyzerKind::Topic]
        );
    }

    #[test]
    fn test_keywords_trigger_topic_and_principle() {
        let mut planner = Planner::new(PlannerConfig::default());
        let entry = TranscriptEntry::new("Ana", "By the way, we must just decide now");
        let none = BTreeSet::new();
        let plan = planner.plan(&input(2, &entry, 1, &none));
        assert_eq!(plan.kinds, vec![AnalyzerKind::Topic, AnalyzerKind::Principle]);
    }

    #[test]
    fn test_participation_needs_multiple_participants() {
        let config = PlannerConfig {
            participation_interval: 1,
            topic_interval: 100,
            ..PlannerConfig::default()
        };
        let entry = TranscriptEntry::new("Ana", "ok");
        let none = BTreeSet::new();

        let mut planner = Planner::new(config.clone());
        assert!(planner.plan(&input(2, &entry, 1, &none)).is_empty());

        let mut planner = Planner::new(config);
        assert_eq!(
            planner.plan(&input(2, &entry, 2, &none)).kinds,
            vec![AnalyzerKind::Participation]
        );
    }

    #[test]
    fn test_unresolved_domain_reinvoked() {
        let mut planner = Planner::new(PlannerConfig::default());
        let entry = TranscriptEntry::new("Ana", "ok");
        let unresolved: BTreeSet<_> = [AnalyzerKind::Principle].into_iter().collect();
        let plan = planner.plan(&input(2, &entry, 1, &unresolved));
        assert_eq!(plan.kinds, vec![AnalyzerKind::Principle]);
    }

    #[test]
    fn test_only_available_kinds_planned() {
        let mut planner = Planner::new(PlannerConfig::default());
        let entry = TranscriptEntry::new("Ana", "by the way, obviously we must");
        let none = BTreeSet::new();
        let plan = planner.plan(&PlanInput {
            available: &[AnalyzerKind::Principle],
            ..input(2, &entry, 3, &none)
        });
        assert_eq!(plan.kinds, vec![AnalyzerKind::Principle]);
    }
}
