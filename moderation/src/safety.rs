//! Safety verification for outgoing interventions.
//!
//! ```text
//! Intervention
//!   ├─ classifier (retried, timed)  unsafe      → safe_message | fallback, decision_style
//!   │                               unavailable → fallback, decision_style (warn)
//!   ├─ denylist (case-insensitive)  hit         → denylist notice, decision_style
//!   ├─ truncate to max_length with '…'
//!   └─ adversarial review           rejected    → "held for review (reason)", decision_style
//! ```
//!
//! The verifier never drops an intervention: every path ends with a message
//! that is safe to emit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SafetyConfig;
use crate::error::AnalyzerError;
use crate::retry::RetryPolicy;
use crate::types::{Intervention, InterventionType, SOURCE_MARKER};

const ELLIPSIS: char = '…';

/// Classifier verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    #[serde(default)]
    pub safe_message: Option<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            ..Self::default()
        }
    }

    pub fn unsafe_with(safe_message: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            safe_message,
            reasons: vec![reason.into()],
        }
    }
}

/// Content-safety backend.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, message: &str) -> Result<SafetyVerdict, AnalyzerError>;
}

/// Classifier that approves everything. Used when no backend is configured;
/// the local denylist still applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveClassifier;

#[async_trait]
impl SafetyClassifier for PermissiveClassifier {
    fn name(&self) -> &str {
        "permissive"
    }

    async fn check(&self, _message: &str) -> Result<SafetyVerdict, AnalyzerError> {
        Ok(SafetyVerdict::safe())
    }
}

/// Structural checks on the final intervention.
#[derive(Debug, Clone)]
pub struct AdversarialReviewer {
    min_length: usize,
}

impl AdversarialReviewer {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// `Err(reason)` when the intervention must be held.
    pub fn review(&self, intervention: &Intervention) -> Result<(), String> {
        if intervention.message.trim().is_empty() {
            return Err("message is empty".into());
        }
        if !intervention.trigger_context.contains(SOURCE_MARKER) {
            return Err("no source citation".into());
        }
        if intervention.message.chars().count() < self.min_length {
            return Err("message is too short".into());
        }
        Ok(())
    }
}

/// How the classifier step went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierOutcome {
    Safe,
    Sanitized,
    Unavailable,
}

/// What the verifier did to an intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub classifier: ClassifierOutcome,
    pub denylisted: bool,
    pub truncated: bool,
    /// Reason the adversarial review held the message, if it did.
    pub held: Option<String>,
}

impl SafetyReport {
    pub fn modified(&self) -> bool {
        self.classifier != ClassifierOutcome::Safe
            || self.denylisted
            || self.truncated
            || self.held.is_some()
    }
}

pub struct SafetyVerifier {
    classifier: Arc<dyn SafetyClassifier>,
    retry: RetryPolicy,
    timeout: Duration,
    config: SafetyConfig,
    denylist: Vec<String>,
    reviewer: AdversarialReviewer,
}

impl SafetyVerifier {
    pub fn new(
        classifier: Arc<dyn SafetyClassifier>,
        config: SafetyConfig,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            retry,
            timeout,
            denylist: config.denylist.iter().map(|t| t.to_lowercase()).collect(),
            reviewer: AdversarialReviewer::new(config.min_length),
            config,
        }
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Sanitize `intervention` in place.
    pub async fn verify(&self, intervention: &mut Intervention) -> SafetyReport {
        let mut report = SafetyReport {
            classifier: ClassifierOutcome::Safe,
            denylisted: false,
            truncated: false,
            held: None,
        };

        if !intervention.message.trim().is_empty() {
            match self.classify(&intervention.message).await {
                Ok(verdict) if verdict.is_safe => {}
                Ok(verdict) => {
                    debug!(reasons = ?verdict.reasons, "Classifier flagged intervention");
                    intervention.message = verdict
                        .safe_message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| self.config.fallback_message.clone());
                    intervention.intervention_type = InterventionType::DecisionStyle;
                    report.classifier = ClassifierOutcome::Sanitized;
                }
                Err(err) => {
                    warn!(
                        classifier = self.classifier.name(),
                        error = %err,
                        "Safety classifier unavailable, using fallback message"
                    );
                    intervention.message = self.config.fallback_message.clone();
                    intervention.intervention_type = InterventionType::DecisionStyle;
                    report.classifier = ClassifierOutcome::Unavailable;
                }
            }
        }

        if self.denylisted(&intervention.message) {
            intervention.message = self.config.denylist_notice.clone();
            intervention.intervention_type = InterventionType::DecisionStyle;
            report.denylisted = true;
        }

        report.truncated = truncate(&mut intervention.message, self.config.max_length);

        if let Err(reason) = self.reviewer.review(intervention) {
            debug!(%reason, "Intervention held for review");
            intervention.message = format!("Intervention held for review ({reason})");
            intervention.intervention_type = InterventionType::DecisionStyle;
            truncate(&mut intervention.message, self.config.max_length);
            report.held = Some(reason);
        }

        report
    }

    async fn classify(&self, message: &str) -> Result<SafetyVerdict, AnalyzerError> {
        let timeout = self.timeout;
        self.retry
            .run(self.classifier.name(), |_| async move {
                tokio::time::timeout(timeout, self.classifier.check(message))
                    .await
                    .unwrap_or(Err(AnalyzerError::Timeout(timeout.as_millis() as u64)))
            })
            .await
    }

    fn denylisted(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.denylist
            .iter()
            .any(|term| !term.is_empty() && lowered.contains(term.as_str()))
    }
}

/// Truncate to at most `max_chars` characters, ending with `…` when cut.
/// Returns whether the message was shortened.
pub fn truncate(message: &mut String, max_chars: usize) -> bool {
    if message.chars().count() <= max_chars {
        return false;
    }
    let keep = max_chars.saturating_sub(1);
    let mut cut: String = message.chars().take(keep).collect();
    let trimmed_len = cut.trim_end().len();
    cut.truncate(trimmed_len);
    cut.push(ELLIPSIS);
    *message = cut;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisOutcome, TranscriptEntry};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedClassifier(Result<SafetyVerdict, AnalyzerError>);

    #[async_trait]
    impl SafetyClassifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn check(&self, _message: &str) -> Result<SafetyVerdict, AnalyzerError> {
            self.0.clone()
        }
    }

    struct CountingClassifier(AtomicU32);

    #[async_trait]
    impl SafetyClassifier for CountingClassifier {
        fn name(&self) -> &str {
            "counting"
        }
        async fn check(&self, _message: &str) -> Result<SafetyVerdict, AnalyzerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SafetyVerdict::safe())
        }
    }

    fn verifier(classifier: Arc<dyn SafetyClassifier>) -> SafetyVerifier {
        SafetyVerifier::new(
            classifier,
            SafetyConfig::default(),
            RetryPolicy::no_retry(),
            Duration::from_secs(1),
        )
    }

    fn cited(kind: InterventionType, message: &str) -> Intervention {
        let mut i = Intervention::from_outcome(&AnalysisOutcome::flag("topic", kind, message, 0.8));
        i.attach_source(&TranscriptEntry::new("Ana", "so anyway"));
        i
    }

    #[tokio::test]
    async fn test_safe_message_passes_untouched() {
        let mut i = cited(InterventionType::TopicDrift, "Let's come back to the agenda.");
        let report = verifier(Arc::new(PermissiveClassifier)).verify(&mut i).await;
        assert!(!report.modified());
        assert_eq!(i.intervention_type, InterventionType::TopicDrift);
        assert_eq!(i.message, "Let's come back to the agenda.");
    }

    #[tokio::test]
    async fn test_unsafe_uses_supplied_alternative() {
        let classifier = FixedClassifier(Ok(SafetyVerdict::unsafe_with(
            Some("Let's keep it kind.".into()),
            "insult",
        )));
        let mut i = cited(InterventionType::PrincipleViolation, "You are being rude, Ben.");
        let report = verifier(Arc::new(classifier)).verify(&mut i).await;
        assert_eq!(report.classifier, ClassifierOutcome::Sanitized);
        assert_eq!(i.message, "Let's keep it kind.");
        assert_eq!(i.intervention_type, InterventionType::DecisionStyle);
    }

    #[tokio::test]
    async fn test_unsafe_without_alternative_uses_fallback() {
        let classifier = FixedClassifier(Ok(SafetyVerdict::unsafe_with(None, "x")));
        let mut i = cited(InterventionType::TopicDrift, &"long ".repeat(100));
        let v = verifier(Arc::new(classifier));
        v.verify(&mut i).await;
        assert_eq!(i.message, SafetyConfig::default().fallback_message);
        assert_eq!(i.intervention_type, InterventionType::DecisionStyle);
        assert!(i.message.chars().count() <= SafetyConfig::default().max_length);
    }

    #[tokio::test]
    async fn test_classifier_error_is_conservative() {
        let classifier = FixedClassifier(Err(AnalyzerError::Backend("down".into())));
        let mut i = cited(InterventionType::TopicDrift, "Back to the agenda please.");
        let report = verifier(Arc::new(classifier)).verify(&mut i).await;
        assert_eq!(report.classifier, ClassifierOutcome::Unavailable);
        assert_eq!(i.message, SafetyConfig::default().fallback_message);
        assert_eq!(i.intervention_type, InterventionType::DecisionStyle);
    }

    #[tokio::test]
    async fn test_denylist_is_case_insensitive() {
        let mut i = cited(InterventionType::TopicDrift, "That joke about a BOMB was off.");
        let report = verifier(Arc::new(PermissiveClassifier)).verify(&mut i).await;
        assert!(report.denylisted);
        assert_eq!(i.message, SafetyConfig::default().denylist_notice);
        assert_eq!(i.intervention_type, InterventionType::DecisionStyle);
    }

    #[tokio::test]
    async fn test_long_message_truncated() {
        let mut i = cited(InterventionType::TopicDrift, &"word ".repeat(80));
        let report = verifier(Arc::new(PermissiveClassifier)).verify(&mut i).await;
        assert!(report.truncated);
        assert_eq!(i.message.chars().count(), 220);
        assert!(i.message.ends_with('…'));
        assert_eq!(i.intervention_type, InterventionType::TopicDrift);
    }

    #[tokio::test]
    async fn test_missing_citation_is_held() {
        let mut i = Intervention::from_outcome(&AnalysisOutcome::flag(
            "topic",
            InterventionType::TopicDrift,
            "Back to the agenda please.",
            0.8,
        ));
        let report = verifier(Arc::new(PermissiveClassifier)).verify(&mut i).await;
        assert_eq!(report.held.as_deref(), Some("no source citation"));
        assert_eq!(i.message, "Intervention held for review (no source citation)");
        assert_eq!(i.intervention_type, InterventionType::DecisionStyle);
    }

    #[tokio::test]
    async fn test_short_message_is_held() {
        let mut i = cited(InterventionType::TopicDrift, "Hey");
        let report = verifier(Arc::new(PermissiveClassifier)).verify(&mut i).await;
        assert_eq!(report.held.as_deref(), Some("message is too short"));
    }

    #[tokio::test]
    async fn test_empty_message_skips_classifier() {
        let classifier = Arc::new(CountingClassifier(AtomicU32::new(0)));
        let mut i = cited(InterventionType::TopicDrift, "");
        let report = verifier(classifier.clone()).verify(&mut i).await;
        assert_eq!(classifier.0.load(Ordering::SeqCst), 0);
        assert_eq!(report.held.as_deref(), Some("message is empty"));
    }

    #[test]
    fn test_truncate_multibyte() {
        let mut s = "가".repeat(10);
        assert!(truncate(&mut s, 5));
        assert_eq!(s, "가가가가…");
        let mut short = "ok".to_string();
        assert!(!truncate(&mut short, 5));
    }
}
