//! Pattern table for meeting-principle violations.
//!
//! Each pattern names the principle it protects. The first pattern that
//! matches the latest entry wins.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Analyzer, AnalyzerKind};
use crate::error::AnalyzerError;
use crate::types::{AnalysisOutcome, InterventionType, SessionView, TranscriptEntry};

const CONFIDENCE: f32 = 0.7;

/// Pattern definition for scanning.
struct Pattern {
    principle: &'static str,
    regex: &'static str,
    message: &'static str,
}

const PATTERNS: &[Pattern] = &[
    Pattern {
        principle: "Psychological safety",
        regex: r"(?i)\b(shut up|stupid|that's dumb|idiot|what nonsense)\b",
        message: "Let's respond to the idea rather than the person.",
    },
    Pattern {
        principle: "Shared decision-making",
        regex: r"(?i)\b(i'll decide|i decide|my way|just do what i say|final answer)\b",
        message: "Before we lock this in, let's hear whether everyone can support it.",
    },
    Pattern {
        principle: "Respect the timebox",
        regex: r"(?i)\b(no time|just decide|skip it|hurry up|we must)\b",
        message: "Time pressure is real, but let's not skip the reasoning. What's the smallest decision we can make now?",
    },
    Pattern {
        principle: "Evidence over assertion",
        regex: r"(?i)\b(obviously|everyone knows|everyone agrees)\b",
        message: "Can we check that assumption with the group?",
    },
    Pattern {
        principle: "Scope discipline",
        regex: r"(?i)\b(let's also add|while we're at it|one more feature)\b",
        message: "That expands the scope. Should we capture it separately?",
    },
];

static COMPILED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|p| Regex::new(p.regex).expect("principle pattern should compile"))
        .collect()
});

#[derive(Debug, Default)]
pub struct PrincipleAnalyzer;

impl PrincipleAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn matched(text: &str) -> Option<&'static Pattern> {
        PATTERNS
            .iter()
            .zip(COMPILED.iter())
            .find(|(_, re)| re.is_match(text))
            .map(|(p, _)| p)
    }
}

#[async_trait]
impl Analyzer for PrincipleAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Principle
    }

    async fn analyze(
        &self,
        _session: &SessionView,
        recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let matched = recent.last().and_then(|e| Self::matched(&e.text));
        match matched {
            Some(pattern) => Ok(AnalysisOutcome::flag(
                self.name(),
                InterventionType::PrincipleViolation,
                pattern.message,
                CONFIDENCE,
            )
            .with_violated_principle(pattern.principle)),
            None => Ok(AnalysisOutcome::clear(
                self.name(),
                InterventionType::PrincipleViolation,
            )),
        }
    }
}
