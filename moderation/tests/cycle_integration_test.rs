//! Analysis cycle integration tests: cooldowns, spacing, safety fallback and
//! failure isolation through the public orchestrator API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moderation::config::{CooldownConfig, SuppressorConfig};
use moderation::suppressor::{DuplicateSuppressor, SuppressReason, Verdict};
use moderation::{
    AnalysisOutcome, Analyzer, AnalyzerError, AnalyzerKind, AnalyzerRegistry, CycleInput,
    InterventionType, ModerationConfig, Orchestrator, Participant, PermissiveClassifier,
    SafetyClassifier, SafetyVerdict, SessionView, TranscriptEntry,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ── Doubles ────────────────────────────────────────────────────────

enum Behavior {
    Flag(&'static str, f32),
    Fail,
    Panic,
    Hang,
    /// Flags with a new message on every call.
    Fresh,
}

struct Stub {
    kind: AnalyzerKind,
    behavior: Behavior,
    calls: AtomicU32,
}

fn stub(kind: AnalyzerKind, behavior: Behavior) -> Arc<dyn Analyzer> {
    Arc::new(Stub {
        kind,
        behavior,
        calls: AtomicU32::new(0),
    })
}

#[async_trait]
impl Analyzer for Stub {
    fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    async fn analyze(
        &self,
        _session: &SessionView,
        _recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let flag = |message: String, confidence: f32| {
            AnalysisOutcome::flag(
                self.kind.as_str(),
                self.kind.intervention_type(),
                message,
                confidence,
            )
        };
        match &self.behavior {
            Behavior::Flag(message, confidence) => Ok(flag(message.to_string(), *confidence)),
            Behavior::Fail => Err(AnalyzerError::Backend("upstream 503".into())),
            Behavior::Panic => panic!("analyzer bug"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(AnalysisOutcome::clear(self.kind.as_str(), self.kind.intervention_type()))
            }
            Behavior::Fresh => Ok(flag(format!("Check-in number {call}, any concerns?"), 0.7)),
        }
    }
}

struct Unsafe;

#[async_trait]
impl SafetyClassifier for Unsafe {
    fn name(&self) -> &str {
        "always-unsafe"
    }

    async fn check(&self, _message: &str) -> Result<SafetyVerdict, AnalyzerError> {
        Ok(SafetyVerdict::unsafe_with(None, "hostile tone"))
    }
}

fn orchestrator(
    config: &ModerationConfig,
    analyzers: Vec<Arc<dyn Analyzer>>,
    classifier: Arc<dyn SafetyClassifier>,
) -> Orchestrator {
    let mut registry = AnalyzerRegistry::new();
    for analyzer in analyzers {
        registry.register(analyzer);
    }
    Orchestrator::new("cycle-test", config, registry, classifier)
}

fn no_spacing() -> ModerationConfig {
    ModerationConfig {
        suppressor: SuppressorConfig {
            min_interval_secs: 0,
            ..SuppressorConfig::default()
        },
        ..ModerationConfig::default()
    }
}

/// Two lines; the latest trips both the off-topic and decision triggers.
fn input() -> CycleInput {
    let recent = vec![
        TranscriptEntry::new("Ana", "Revenue is flat this quarter."),
        TranscriptEntry::new("Ben", "By the way, we must just decide now."),
    ];
    CycleInput {
        view: SessionView::new(
            "cycle-test",
            "Q3 budget",
            vec![Participant::new("Ana"), Participant::new("Ben")],
            recent,
        ),
        transcript_len: 2,
        unresolved: Default::default(),
    }
}

// ── Cooldown scenario ──────────────────────────────────────────────

#[test]
fn topic_drift_cooldown_scenario() {
    let mut suppressor = DuplicateSuppressor::new(&SuppressorConfig {
        min_interval_secs: 15,
        max_recent: 10,
        cooldowns: CooldownConfig {
            topic_drift: 60,
            ..CooldownConfig::default()
        },
    });
    let message = "Let's park that for later and come back to Q3 budget.";
    let t0 = Instant::now();

    let Verdict::Admit { fingerprint } =
        suppressor.evaluate(InterventionType::TopicDrift, message, t0)
    else {
        panic!("first intervention should be admitted");
    };
    suppressor.record(InterventionType::TopicDrift, fingerprint, t0);

    let at_30 = suppressor.evaluate(
        InterventionType::TopicDrift,
        message,
        t0 + Duration::from_secs(30),
    );
    assert!(matches!(
        at_30,
        Verdict::Suppress(SuppressReason::DuplicateMessage { .. })
    ));

    let at_61 = suppressor.evaluate(
        InterventionType::TopicDrift,
        message,
        t0 + Duration::from_secs(61),
    );
    assert!(at_61.is_admitted());
}

// ── Spacing ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn accepted_interventions_respect_min_interval() {
    let config = ModerationConfig {
        suppressor: SuppressorConfig {
            min_interval_secs: 15,
            max_recent: 10,
            cooldowns: CooldownConfig {
                topic_drift: 0,
                principle_violation: 0,
                participation_imbalance: 0,
                decision_style: 0,
            },
        },
        ..ModerationConfig::default()
    };
    let mut orch = orchestrator(
        &config,
        vec![stub(AnalyzerKind::Principle, Behavior::Fresh)],
        Arc::new(PermissiveClassifier),
    );
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let mut accepted = Vec::new();
    for _ in 0..=12 {
        let report = orch.run_cycle(input(), &cancel).await;
        if report.intervention.is_some() {
            accepted.push(Instant::now() - start);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
    }

    assert_eq!(accepted.len(), 5);
    for pair in accepted.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(15));
    }
}

// ── Safety ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unsafe_message_without_alternative_uses_fallback() {
    let config = no_spacing();
    let mut orch = orchestrator(
        &config,
        vec![stub(
            AnalyzerKind::Principle,
            Behavior::Flag("You people are hopeless, stop talking.", 0.9),
        )],
        Arc::new(Unsafe),
    );
    let report = orch.run_cycle(input(), &CancellationToken::new()).await;

    let intervention = report.intervention.expect("fallback intervention");
    assert_eq!(intervention.message, config.safety.fallback_message);
    assert_eq!(intervention.intervention_type, InterventionType::DecisionStyle);
    assert!(intervention.message.chars().count() <= config.safety.max_length);
    assert!(intervention.has_source());
}

// ── Failure isolation ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn crashing_and_hanging_analyzers_do_not_block_others() {
    let config = no_spacing();
    let mut orch = orchestrator(
        &config,
        vec![
            stub(AnalyzerKind::Topic, Behavior::Panic),
            stub(AnalyzerKind::Participation, Behavior::Hang),
            stub(
                AnalyzerKind::Principle,
                Behavior::Flag("Before we lock this in, can everyone support it?", 0.7),
            ),
        ],
        Arc::new(PermissiveClassifier),
    );
    let mut cycle_input = input();
    cycle_input.unresolved = [AnalyzerKind::Participation].into_iter().collect();

    let report = orch.run_cycle(cycle_input, &CancellationToken::new()).await;

    let intervention = report.intervention.expect("principle outcome survives");
    assert_eq!(
        intervention.message,
        "Before we lock this in, can everyone support it?"
    );
    assert_eq!(report.failures.len(), 2);
    assert!(!report.recovered);
    let names: Vec<&str> = report
        .failures
        .iter()
        .map(|f| f.analyzer_name.as_str())
        .collect();
    assert!(names.contains(&"topic"));
    assert!(names.contains(&"participation"));
}

#[tokio::test(start_paused = true)]
async fn total_outage_emits_recovery_through_safety() {
    let config = no_spacing();
    let mut orch = orchestrator(
        &config,
        vec![
            stub(AnalyzerKind::Topic, Behavior::Fail),
            stub(AnalyzerKind::Principle, Behavior::Fail),
        ],
        Arc::new(PermissiveClassifier),
    );
    let report = orch.run_cycle(input(), &CancellationToken::new()).await;

    assert!(report.recovered);
    assert!(report.safety.is_some());
    let intervention = report.intervention.expect("recovery intervention");
    assert_eq!(intervention.message, config.recovery.message);
    assert_eq!(intervention.intervention_type, InterventionType::DecisionStyle);
    assert!(intervention.has_source());
}

#[tokio::test]
async fn higher_priority_wins_over_confidence() {
    let config = no_spacing();
    let mut orch = orchestrator(
        &config,
        vec![
            stub(
                AnalyzerKind::Topic,
                Behavior::Flag("Let's come back to the budget.", 0.95),
            ),
            stub(
                AnalyzerKind::Principle,
                Behavior::Flag("Let's hear from everyone first.", 0.6),
            ),
        ],
        Arc::new(PermissiveClassifier),
    );
    let report = orch.run_cycle(input(), &CancellationToken::new()).await;
    let intervention = report.intervention.unwrap();
    assert_eq!(
        intervention.intervention_type,
        InterventionType::PrincipleViolation
    );
    assert_eq!(report.outcomes.len(), 2);
}
