//! Analysis cycle orchestrator.
//!
//! One call to [`Orchestrator::run_cycle`] takes a read-only view of the
//! session and produces at most one intervention:
//!
//! ```text
//! interval check ─▶ Planner ─▶ ParallelExecutor ─▶ merge winner
//!                                   │                  │ (none + all failed)
//!                                   ▼                  ▼
//!                            health, failure window   RecoveryAgent
//!                                                      │
//!                     DuplicateSuppressor::evaluate ◀──┘
//!                                   │ admit
//!                                   ▼
//!                     SafetyVerifier::verify ─▶ record ─▶ CycleReport
//! ```
//!
//! The orchestrator lives behind an async mutex owned by the session, so two
//! cycles never interleave their accept/reject decisions. Nothing here is
//! mutated until the cycle's async work has settled; a cancelled cycle leaves
//! the cooldown clock and transcript untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{AnalyzerKind, AnalyzerRegistry};
use crate::blackboard::{Blackboard, BlackboardEvent};
use crate::config::ModerationConfig;
use crate::executor::ParallelExecutor;
use crate::merger;
use crate::planner::{Plan, PlanInput, Planner};
use crate::recovery::{FailureMonitor, RecoveryAgent};
use crate::retry::{AnalyzerHealth, RetryPolicy};
use crate::safety::{SafetyClassifier, SafetyReport, SafetyVerifier};
use crate::suppressor::{DuplicateSuppressor, SuppressReason, Verdict};
use crate::types::{AnalysisOutcome, AnalyzerFailure, Intervention, SessionId, SessionView};

/// Shared orchestrator handle used by the session task.
pub type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

/// What the session hands to a cycle.
#[derive(Debug, Clone)]
pub struct CycleInput {
    pub view: SessionView,
    /// Full transcript length; `view.recent` may be a window of it.
    pub transcript_len: usize,
    pub unresolved: BTreeSet<AnalyzerKind>,
}

/// Everything one cycle did. The session applies it only when
/// `cancelled` is false.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub plan: Plan,
    pub skipped: Option<SuppressReason>,
    pub outcomes: Vec<AnalysisOutcome>,
    pub failures: Vec<AnalyzerFailure>,
    pub intervention: Option<Intervention>,
    pub suppressed: Option<SuppressReason>,
    pub safety: Option<SafetyReport>,
    pub recovered: bool,
    pub warnings: Vec<String>,
    /// Domains whose analyzer asked for an intervention this cycle.
    pub flagged: Vec<AnalyzerKind>,
    /// Domains whose analyzer ran cleanly and found nothing.
    pub cleared: Vec<AnalyzerKind>,
    pub cancelled: bool,
}

impl CycleReport {
    fn cancelled(cycle: u64, plan: Plan) -> Self {
        Self {
            cycle,
            plan,
            cancelled: true,
            ..Self::default()
        }
    }
}

pub struct Orchestrator {
    session_id: SessionId,
    planner: Planner,
    registry: AnalyzerRegistry,
    executor: ParallelExecutor,
    suppressor: DuplicateSuppressor,
    safety: SafetyVerifier,
    recovery: RecoveryAgent,
    failures: FailureMonitor,
    health: BTreeMap<String, AnalyzerHealth>,
    blackboard: Blackboard,
    cycles: u64,
    emitted: usize,
}

impl Orchestrator {
    pub fn new(
        session_id: impl Into<SessionId>,
        config: &ModerationConfig,
        registry: AnalyzerRegistry,
        classifier: Arc<dyn SafetyClassifier>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            session_id: session_id.into(),
            planner: Planner::new(config.planner.clone()),
            registry,
            executor: ParallelExecutor::new(&config.executor, retry.clone()),
            suppressor: DuplicateSuppressor::new(&config.suppressor),
            safety: SafetyVerifier::new(
                classifier,
                config.safety.clone(),
                retry,
                config.executor.timeout(),
            ),
            recovery: RecoveryAgent::new(&config.recovery),
            failures: FailureMonitor::new(&config.recovery),
            health: BTreeMap::new(),
            blackboard: Blackboard::new(config.session.max_blackboard_events),
            cycles: 0,
            emitted: 0,
        }
    }

    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn suppressor(&self) -> &DuplicateSuppressor {
        &self.suppressor
    }

    pub fn health(&self) -> &BTreeMap<String, AnalyzerHealth> {
        &self.health
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one analysis cycle.
    pub async fn run_cycle(&mut self, input: CycleInput, cancel: &CancellationToken) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        if let Err(reason) = self.suppressor.check_interval(Instant::now()) {
            debug!(session_id = %self.session_id, cycle, %reason, "Cycle skipped");
            report.skipped = Some(reason);
            return report;
        }

        let available = self.registry.kinds();
        let plan = self.planner.plan(&PlanInput {
            transcript_len: input.transcript_len,
            latest: input.view.latest(),
            participant_count: input.view.participants.len(),
            unresolved: &input.unresolved,
            available: &available,
        });
        if plan.is_empty() {
            report.plan = plan;
            return report;
        }
        self.blackboard.append(BlackboardEvent::Plan {
            cycle,
            kinds: plan.kinds.clone(),
            timestamp: Utc::now(),
        });

        let selected = self.registry.select(&plan.kinds);
        let kinds_by_name: HashMap<String, AnalyzerKind> = selected
            .iter()
            .map(|a| (a.name().to_string(), a.kind()))
            .collect();

        let batch = self
            .executor
            .run(selected, input.view.clone(), cancel)
            .await;
        if batch.cancelled {
            info!(session_id = %self.session_id, cycle, "Cycle cancelled during analysis");
            return CycleReport::cancelled(cycle, plan);
        }

        // ── Settle analyzer bookkeeping ──────────────────────────────────
        for outcome in &batch.outcomes {
            self.health_for(&outcome.analyzer_name).record_success();
            if let Some(kind) = kinds_by_name.get(&outcome.analyzer_name) {
                if outcome.needs_intervention {
                    report.flagged.push(*kind);
                } else {
                    report.cleared.push(*kind);
                }
            }
        }
        for failure in &batch.failures {
            self.health_for(&failure.analyzer_name)
                .record_failure(&failure.error);
            self.blackboard.append(BlackboardEvent::AnalyzerFailure {
                analyzer_name: failure.analyzer_name.clone(),
                error: failure.error.clone(),
                retryable: failure.retryable,
                timestamp: Utc::now(),
            });
        }
        if let Some(warning) = self.failures.observe(batch.failures.len(), Instant::now()) {
            warn!(session_id = %self.session_id, cycle, "{}", warning);
            self.blackboard.append(BlackboardEvent::Warning {
                message: warning.clone(),
                timestamp: Utc::now(),
            });
            report.warnings.push(warning);
        }

        // ── Pick a candidate ─────────────────────────────────────────────
        let recovery_outcome = self.recovery.recover(&batch);
        let merged = merger::merge(
            &batch.outcomes,
            recovery_outcome.as_ref(),
            input.view.latest(),
        );
        if merged.as_ref().is_some_and(|m| m.recovered) {
            info!(
                session_id = %self.session_id,
                cycle,
                failures = batch.failures.len(),
                "All analyzers failed, using recovery"
            );
            self.blackboard.append(BlackboardEvent::Recovery {
                failures: batch.failures.len(),
                timestamp: Utc::now(),
            });
            report.recovered = true;
        }
        let candidate = merged.map(|m| m.intervention);

        report.plan = plan;
        report.outcomes = batch.outcomes.clone();
        report.failures = batch.failures.clone();

        let Some(mut intervention) = candidate else {
            self.checkpoint(&mut report, &input);
            return report;
        };

        // ── Gate ─────────────────────────────────────────────────────────
        let candidate_type = intervention.intervention_type;
        let fingerprint = match self.suppressor.evaluate(
            candidate_type,
            &intervention.message,
            Instant::now(),
        ) {
            Verdict::Admit { fingerprint } => fingerprint,
            Verdict::Suppress(reason) => {
                debug!(
                    session_id = %self.session_id,
                    cycle,
                    intervention_type = %candidate_type,
                    %reason,
                    "Intervention suppressed"
                );
                self.blackboard.append(BlackboardEvent::Suppressed {
                    intervention_type: candidate_type,
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                report.suppressed = Some(reason);
                self.checkpoint(&mut report, &input);
                return report;
            }
        };

        let safety = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session_id = %self.session_id, cycle, "Cycle cancelled during safety check");
                return CycleReport::cancelled(cycle, report.plan);
            }
            safety = self.safety.verify(&mut intervention) => safety,
        };

        // ── Commit ───────────────────────────────────────────────────────
        self.suppressor
            .record(candidate_type, fingerprint, Instant::now());
        self.emitted += 1;
        self.blackboard.append(BlackboardEvent::Intervention {
            intervention_id: intervention.id.clone(),
            intervention_type: intervention.intervention_type,
            message: intervention.message.clone(),
            timestamp: intervention.timestamp,
        });
        info!(
            session_id = %self.session_id,
            cycle,
            intervention_type = %intervention.intervention_type,
            sanitized = safety.modified(),
            "Intervention accepted"
        );

        report.safety = Some(safety);
        report.intervention = Some(intervention);
        self.checkpoint(&mut report, &input);
        report
    }

    fn health_for(&mut self, name: &str) -> &mut AnalyzerHealth {
        self.health
            .entry(name.to_string())
            .or_insert_with(|| AnalyzerHealth::new(name))
    }

    fn checkpoint(&mut self, report: &mut CycleReport, input: &CycleInput) {
        let emitted = self.emitted;
        let snapshot = self.blackboard.snapshot_mut();
        snapshot.refresh_session(&input.view.participants, &input.view.recent, emitted);
        snapshot.transcript_count = input.transcript_len;
        snapshot.cycles = report.cycle;
        snapshot.analyzer_health = self.health.clone();

        self.blackboard.append(BlackboardEvent::Checkpoint {
            cycle: report.cycle,
            outcomes: report.outcomes.len(),
            failures: report.failures.len(),
            emitted: report.intervention.is_some(),
            timestamp: Utc::now(),
        });
    }
}
