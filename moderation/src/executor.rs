//! Parallel analyzer executor: JoinSet fan-out, per-analyzer isolation.
//!
//! ```text
//! analyzers ──spawn × N──▶ [retry(timeout(analyze))] ──catch_unwind──▶ slot[i]
//!                                                                        │
//! cancel token ──────────────── abort_all ◀──── select! ◀── join_next ◀──┘
//! ```
//!
//! Every analyzer ends up either as an [`AnalysisOutcome`] or an
//! [`AnalyzerFailure`]; one analyzer's error, timeout or panic never affects
//! another's result. Results are reported in plan order.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analyzer::SharedAnalyzer;
use crate::config::ExecutorConfig;
use crate::error::AnalyzerError;
use crate::retry::RetryPolicy;
use crate::types::{AnalysisOutcome, AnalyzerFailure, SessionView};

/// Everything one execution produced.
#[derive(Debug, Clone, Default)]
pub struct ExecutionBatch {
    pub outcomes: Vec<AnalysisOutcome>,
    pub failures: Vec<AnalyzerFailure>,
    /// Set when the session was cancelled mid-flight. A cancelled batch must
    /// not be applied.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ExecutionBatch {
    pub fn cancelled(elapsed: Duration) -> Self {
        Self {
            cancelled: true,
            elapsed,
            ..Self::default()
        }
    }

    pub fn positive(&self) -> impl Iterator<Item = &AnalysisOutcome> {
        self.outcomes.iter().filter(|o| o.needs_intervention)
    }

    /// Every analyzer failed and nothing succeeded.
    pub fn total_outage(&self) -> bool {
        self.outcomes.is_empty() && !self.failures.is_empty()
    }
}

type Slot = Result<AnalysisOutcome, AnalyzerFailure>;

#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    timeout: Duration,
    retry: RetryPolicy,
}

impl ParallelExecutor {
    pub fn new(config: &ExecutorConfig, retry: RetryPolicy) -> Self {
        Self {
            timeout: config.timeout(),
            retry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `analyzers` concurrently against `session`.
    ///
    /// Returns once every analyzer settled or `cancel` fired.
    pub async fn run(
        &self,
        analyzers: Vec<SharedAnalyzer>,
        session: SessionView,
        cancel: &CancellationToken,
    ) -> ExecutionBatch {
        let start = Instant::now();
        if analyzers.is_empty() {
            return ExecutionBatch::default();
        }

        let total = analyzers.len();
        let mut join_set: JoinSet<(usize, Slot)> = JoinSet::new();

        for (index, analyzer) in analyzers.into_iter().enumerate() {
            let session = session.clone();
            let retry = self.retry.clone();
            let timeout = self.timeout;

            join_set.spawn(async move {
                let name = analyzer.name().to_string();
                let call = retry.run(&name, |_attempt| {
                    let analyzer = analyzer.clone();
                    let session = session.clone();
                    async move {
                        match tokio::time::timeout(
                            timeout,
                            analyzer.analyze(&session, &session.recent),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(AnalyzerError::Timeout(timeout.as_millis() as u64)),
                        }
                    }
                });

                let result = match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(AnalyzerError::Panicked(panic_message(panic.as_ref()))),
                };

                let slot = result.map_err(|err| AnalyzerFailure {
                    analyzer_name: name,
                    retryable: err.is_retriable(),
                    error: err.to_string(),
                });
                (index, slot)
            });
        }

        let mut slots: Vec<Option<Slot>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    debug!(pending = join_set.len(), "Analyzer batch cancelled");
                    return ExecutionBatch::cancelled(start.elapsed());
                }
                next = join_set.join_next() => {
                    match next {
                        Some(Ok((index, slot))) => slots[index] = Some(slot),
                        Some(Err(e)) => {
                            // Panics are caught inside the task; only aborts land here.
                            warn!(error = %e, "analyzer task did not complete");
                        }
                        None => break,
                    }
                }
            }
        }

        let mut batch = ExecutionBatch {
            elapsed: start.elapsed(),
            ..ExecutionBatch::default()
        };
        for slot in slots.into_iter().flatten() {
            match slot {
                Ok(outcome) => batch.outcomes.push(outcome),
                Err(failure) => {
                    warn!(
                        analyzer = %failure.analyzer_name,
                        error = %failure.error,
                        retryable = failure.retryable,
                        "Analyzer failed"
                    );
                    batch.failures.push(failure);
                }
            }
        }
        debug!(
            outcomes = batch.outcomes.len(),
            failures = batch.failures.len(),
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "Analyzer batch settled"
        );
        batch
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
