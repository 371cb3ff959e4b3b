//! Keyword heuristic for topic drift.
//!
//! Flags the latest entry when it contains an off-topic keyword and offers
//! the digression as a parking-lot item.

use async_trait::async_trait;

use super::{lowered, Analyzer, AnalyzerKind};
use crate::error::AnalyzerError;
use crate::types::{AnalysisOutcome, InterventionType, SessionView, TranscriptEntry};

const CONFIDENCE: f32 = 0.8;
const PARKING_LOT_CHARS: usize = 30;

pub struct TopicAnalyzer {
    keywords: Vec<String>,
}

impl TopicAnalyzer {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matched_keyword(&self, entry: &TranscriptEntry) -> Option<&str> {
        let text = lowered(entry);
        self.keywords
            .iter()
            .find(|kw| !kw.is_empty() && text.contains(kw.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl Analyzer for TopicAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Topic
    }

    async fn analyze(
        &self,
        session: &SessionView,
        recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let Some(latest) = recent.last() else {
            return Ok(AnalysisOutcome::clear(self.name(), InterventionType::TopicDrift));
        };
        let Some(keyword) = self.matched_keyword(latest) else {
            return Ok(AnalysisOutcome::clear(self.name(), InterventionType::TopicDrift));
        };

        tracing::debug!(keyword, speaker = %latest.speaker, "Off-topic keyword matched");

        let agenda = if session.agenda.trim().is_empty() {
            "the agenda"
        } else {
            session.agenda.as_str()
        };
        let snippet: String = latest.text.chars().take(PARKING_LOT_CHARS).collect();

        Ok(AnalysisOutcome::flag(
            self.name(),
            InterventionType::TopicDrift,
            format!("Let's park that for later and come back to {agenda}."),
            CONFIDENCE,
        )
        .with_parking_lot_item(format!("'{snippet}...' to discuss later")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(agenda: &str, lines: &[(&str, &str)]) -> SessionView {
        SessionView::new(
            "s1",
            agenda,
            vec![],
            lines
                .iter()
                .map(|(s, t)| TranscriptEntry::new(*s, *t))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_flags_off_topic_keyword() {
        let analyzer = TopicAnalyzer::new(vec!["Weekend".into()]);
        let session = view(
            "Q3 roadmap",
            &[("Ana", "Roadmap first."), ("Ben", "Anyone doing something this WEEKEND?")],
        );
        let outcome = analyzer.analyze(&session, &session.recent).await.unwrap();
        assert!(outcome.needs_intervention);
        assert_eq!(outcome.intervention_type, InterventionType::TopicDrift);
        assert!(outcome.message.contains("Q3 roadmap"));
        assert!(outcome.parking_lot_item.unwrap().starts_with("'Anyone doing"));
    }

    #[tokio::test]
    async fn test_on_topic_is_clear() {
        let analyzer = TopicAnalyzer::new(vec!["weekend".into()]);
        let session = view("Q3 roadmap", &[("Ana", "Let's size the roadmap items.")]);
        let outcome = analyzer.analyze(&session, &session.recent).await.unwrap();
        assert!(!outcome.needs_intervention);
    }

    #[tokio::test]
    async fn test_only_latest_entry_counts() {
        let analyzer = TopicAnalyzer::new(vec!["lunch".into()]);
        let session = view("", &[("Ana", "lunch?"), ("Ben", "Back to the budget.")]);
        let outcome = analyzer.analyze(&session, &session.recent).await.unwrap();
        assert!(!outcome.needs_intervention);
    }

    #[tokio::test]
    async fn test_empty_transcript() {
        let analyzer = TopicAnalyzer::new(vec!["lunch".into()]);
        let session = view("", &[]);
        let outcome = analyzer.analyze(&session, &[]).await.unwrap();
        assert!(!outcome.needs_intervention);
    }
}
