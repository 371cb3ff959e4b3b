//! Speaking-share heuristic for participation imbalance.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Analyzer, AnalyzerKind};
use crate::error::AnalyzerError;
use crate::types::{AnalysisOutcome, InterventionType, SessionView, TranscriptEntry};

#[derive(Debug, Clone)]
pub struct ParticipationAnalyzer {
    /// A single speaker above this share of utterances is dominant.
    pub dominance_threshold: f32,
    /// Roster members below this share count as silent.
    pub silence_threshold: f32,
    pub min_entries: usize,
}

impl Default for ParticipationAnalyzer {
    fn default() -> Self {
        Self {
            dominance_threshold: 0.5,
            silence_threshold: 0.1,
            min_entries: 5,
        }
    }
}

#[async_trait]
impl Analyzer for ParticipationAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Participation
    }

    async fn analyze(
        &self,
        session: &SessionView,
        recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let clear = || AnalysisOutcome::clear(self.name(), InterventionType::ParticipationImbalance);
        if session.participants.is_empty() || recent.len() < self.min_entries {
            return Ok(clear());
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in recent.iter().filter(|e| e.has_speaker()) {
            *counts.entry(entry.speaker.as_str()).or_default() += 1;
        }
        let total: usize = counts.values().sum();
        if total == 0 {
            return Ok(clear());
        }

        // Roster order keeps the output deterministic.
        let silent: Vec<&str> = session
            .participant_names()
            .filter(|name| {
                let share = counts.get(name).copied().unwrap_or(0) as f32 / total as f32;
                share < self.silence_threshold
            })
            .collect();

        let dominant = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, count)| (*name, *count as f32 / total as f32))
            .filter(|(_, share)| *share > self.dominance_threshold);

        if let Some(first_silent) = silent.first() {
            return Ok(AnalysisOutcome::flag(
                self.name(),
                InterventionType::ParticipationImbalance,
                format!("We haven't heard much from {}. What's your take?", silent.join(", ")),
                0.6,
            )
            .with_suggested_speaker(*first_silent));
        }

        if let Some((name, share)) = dominant {
            let quietest = session
                .participant_names()
                .filter(|p| *p != name)
                .min_by_key(|p| counts.get(p).copied().unwrap_or(0));
            let mut outcome = AnalysisOutcome::flag(
                self.name(),
                InterventionType::ParticipationImbalance,
                format!(
                    "{name} has carried {:.0}% of the discussion. Could we hear other views?",
                    share * 100.0
                ),
                share,
            );
            if let Some(quietest) = quietest {
                outcome = outcome.with_suggested_speaker(quietest);
            }
            return Ok(outcome);
        }

        Ok(clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Participant;

    fn session(names: &[&str], lines: &[&str]) -> SessionView {
        SessionView::new(
            "s1",
            "",
            names.iter().map(|n| Participant::new(*n)).collect(),
            lines
                .iter()
                .map(|s| TranscriptEntry::new(*s, "point"))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_silent_participant_flagged() {
        let s = session(&["Ana", "Ben", "Cy"], &["Ana", "Ben", "Ana", "Ben", "Ana"]);
        let outcome = ParticipationAnalyzer::default()
            .analyze(&s, &s.recent)
            .await
            .unwrap();
        assert!(outcome.needs_intervention);
        assert_eq!(outcome.suggested_speaker.as_deref(), Some("Cy"));
        assert!(outcome.message.contains("Cy"));
    }

    #[tokio::test]
    async fn test_dominant_speaker_flagged() {
        let s = session(
            &["Ana", "Ben"],
            &["Ana", "Ana", "Ana", "Ana", "Ben", "Ana", "Ben", "Ana", "Ben", "Ana"],
        );
        let outcome = ParticipationAnalyzer::default()
            .analyze(&s, &s.recent)
            .await
            .unwrap();
        assert!(outcome.needs_intervention);
        assert!(outcome.message.starts_with("Ana has carried 70%"));
        assert_eq!(outcome.suggested_speaker.as_deref(), Some("Ben"));
        assert!((outcome.confidence - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_balanced_is_clear() {
        let s = session(&["Ana", "Ben"], &["Ana", "Ben", "Ana", "Ben", "Ana", "Ben"]);
        let outcome = ParticipationAnalyzer::default()
            .analyze(&s, &s.recent)
            .await
            .unwrap();
        assert!(!outcome.needs_intervention);
    }

    #[tokio::test]
    async fn test_too_few_entries() {
        let s = session(&["Ana", "Ben", "Cy"], &["Ana", "Ana"]);
        let outcome = ParticipationAnalyzer::default()
            .analyze(&s, &s.recent)
            .await
            .unwrap();
        assert!(!outcome.needs_intervention);
    }
}
