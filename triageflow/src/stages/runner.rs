//! Stage execution wrapper: timeout, retry, failure classification and
//! per-case status tracking.

use super::{Stage, StageInput, StageOutput};
use crate::core::{StageKind, StageStatus};
use crate::errors::{panic_message, StageFailure};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::pipeline::{with_retry, RetryConfig, RetryFailure};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Status of one stage for one case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRunState {
    /// Current status.
    pub status: StageStatus,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// Current attempt, starting at 1.
    pub attempt: usize,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Aggregate counters for one stage across all cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Calls to `execute`.
    pub invocations: u64,
    /// Successful executions.
    pub successes: u64,
    /// Failed executions, after retries.
    pub failures: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Duration of the most recent successful execution.
    pub last_processing_duration_ms: Option<u64>,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Terminal status of the most recent execution.
    pub last_outcome: Option<StageStatus>,
}

/// Point-in-time view of a stage, as reported by `system_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// The stage.
    pub stage: StageKind,
    /// Derived status across cases.
    pub status: StageStatus,
    /// Cases currently running this stage.
    pub running: usize,
    /// Cases waiting out a retry delay on this stage.
    pub blocked: usize,
    /// Aggregate counters.
    pub metrics: StageMetrics,
}

/// Per-case status map plus aggregate metrics for one stage.
///
/// Status is keyed by case id so concurrent cases never overwrite each
/// other's in-flight state.
#[derive(Debug, Default)]
pub struct StageTracker {
    states: DashMap<String, StageRunState>,
    metrics: Mutex<StageMetrics>,
}

impl StageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status of this stage for a case. Unknown cases are idle.
    #[must_use]
    pub fn status(&self, case_id: &str) -> StageStatus {
        self.states
            .get(case_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Returns the full state for a case.
    #[must_use]
    pub fn state(&self, case_id: &str) -> Option<StageRunState> {
        self.states.get(case_id).map(|s| s.clone())
    }

    /// Returns a copy of the aggregate metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.lock().clone()
    }

    /// Drops the state held for a case.
    pub fn release(&self, case_id: &str) {
        self.states.remove(case_id);
    }

    fn begin(&self) {
        self.metrics.lock().invocations += 1;
    }

    fn start_attempt(&self, case_id: &str, attempt: usize) {
        let mut state = self.states.entry(case_id.to_string()).or_default();
        state.status = StageStatus::Running;
        state.started_at = Some(Utc::now());
        state.attempt = attempt;
    }

    fn block(&self, case_id: &str, error: &str) {
        if let Some(mut state) = self.states.get_mut(case_id) {
            state.status = StageStatus::Blocked;
            state.last_error = Some(error.to_string());
        }
        self.metrics.lock().retries += 1;
    }

    fn complete(&self, case_id: &str, duration_ms: u64) {
        if let Some(mut state) = self.states.get_mut(case_id) {
            state.status = StageStatus::Completed;
        }
        let mut metrics = self.metrics.lock();
        metrics.successes += 1;
        metrics.last_processing_duration_ms = Some(duration_ms);
        metrics.last_outcome = Some(StageStatus::Completed);
    }

    fn fail(&self, case_id: &str, error: &str) {
        {
            let mut state = self.states.entry(case_id.to_string()).or_default();
            state.status = StageStatus::Error;
            state.last_error = Some(error.to_string());
        }
        let mut metrics = self.metrics.lock();
        metrics.failures += 1;
        metrics.last_error = Some(error.to_string());
        metrics.last_outcome = Some(StageStatus::Error);
    }

    /// Summarizes the tracker.
    #[must_use]
    pub fn snapshot(&self, stage: StageKind) -> StageSnapshot {
        let mut running = 0;
        let mut blocked = 0;
        for entry in &self.states {
            match entry.status {
                StageStatus::Running => running += 1,
                StageStatus::Blocked => blocked += 1,
                _ => {}
            }
        }
        let metrics = self.metrics();
        let status = if running > 0 {
            StageStatus::Running
        } else if blocked > 0 {
            StageStatus::Blocked
        } else {
            metrics.last_outcome.unwrap_or_default()
        };
        StageSnapshot {
            stage,
            status,
            running,
            blocked,
            metrics,
        }
    }
}

/// Runs one stage with a timeout and retry policy.
#[derive(Debug)]
pub struct StageRunner<O: StageOutput> {
    stage: Arc<dyn Stage<Output = O>>,
    timeout: Duration,
    retry: RetryConfig,
    events: Arc<dyn EventSink>,
    tracker: StageTracker,
}

impl<O: StageOutput> StageRunner<O> {
    /// Creates a runner with the stage's default timeout and retry policy.
    pub fn new(stage: Arc<dyn Stage<Output = O>>) -> Self {
        Self {
            stage,
            timeout: O::KIND.default_timeout(),
            retry: RetryConfig::default(),
            events: Arc::new(NoOpEventSink),
            tracker: StageTracker::new(),
        }
    }

    /// Sets the processing timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the stage kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        O::KIND
    }

    /// Returns the status tracker.
    #[must_use]
    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    /// Returns a summary of this stage.
    #[must_use]
    pub fn snapshot(&self) -> StageSnapshot {
        self.tracker.snapshot(O::KIND)
    }

    /// Executes the stage for one case.
    ///
    /// Timeouts and transient errors are retried with backoff. Anything else,
    /// and a retryable failure that outlives its attempts, comes back as
    /// [`StageFailure::Critical`].
    pub async fn execute(&self, case_id: &str, input: &StageInput<'_>) -> Result<O, StageFailure> {
        let kind = O::KIND;
        let timer = SpanTimer::start(self.stage.name());
        self.tracker.begin();

        let retry_key = format!("{case_id}:{kind}");
        let result = with_retry(
            &self.retry,
            &retry_key,
            move |attempt| self.attempt(case_id, input, attempt),
            move |next_attempt, delay, error: &StageFailure| {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                self.tracker.block(case_id, error.message());
                tracing::warn!(
                    case_id,
                    stage = %kind,
                    attempt = next_attempt - 1,
                    delay_ms,
                    error = %error,
                    "Stage attempt failed, retrying"
                );
                self.events.try_emit(
                    names::STAGE_RETRYING,
                    Some(json!({
                        "case_id": case_id,
                        "stage": kind.as_str(),
                        "next_attempt": next_attempt,
                        "delay_ms": delay_ms,
                        "error": error.message(),
                    })),
                );
            },
        )
        .await;

        let attempts = self.tracker.state(case_id).map_or(1, |s| s.attempt);
        let outcome = match result {
            Ok(output) => match AssertUnwindSafe(self.stage.post_process(output))
                .catch_unwind()
                .await
            {
                Ok(processed) => {
                    processed.map_err(|e| StageFailure::critical(kind, e.to_string(), attempts))
                }
                Err(payload) => Err(StageFailure::critical(
                    kind,
                    format!("stage panicked: {}", panic_message(payload)),
                    attempts,
                )),
            },
            Err(RetryFailure {
                error,
                attempts,
                exhausted,
            }) => Err(if exhausted {
                error.escalate(attempts)
            } else {
                error
            }),
        };

        let duration_ms = timer.elapsed_ms();
        match outcome {
            Ok(output) => {
                self.tracker.complete(case_id, duration_ms);
                tracing::info!(
                    case_id,
                    stage = %kind,
                    duration_ms,
                    attempt = attempts,
                    outcome = "completed",
                    "Stage completed"
                );
                self.events.try_emit(
                    names::STAGE_COMPLETED,
                    Some(json!({
                        "case_id": case_id,
                        "stage": kind.as_str(),
                        "duration_ms": duration_ms,
                        "attempts": attempts,
                    })),
                );
                Ok(output)
            }
            Err(failure) => {
                self.tracker.fail(case_id, failure.message());
                tracing::error!(
                    case_id,
                    stage = %kind,
                    duration_ms,
                    attempt = attempts,
                    outcome = "failed",
                    error = %failure,
                    "Stage failed"
                );
                self.events.try_emit(
                    names::STAGE_FAILED,
                    Some(json!({
                        "case_id": case_id,
                        "stage": kind.as_str(),
                        "duration_ms": duration_ms,
                        "error": failure.to_dict(),
                    })),
                );
                Err(failure)
            }
        }
    }

    async fn attempt(
        &self,
        case_id: &str,
        input: &StageInput<'_>,
        attempt: usize,
    ) -> Result<O, StageFailure> {
        let kind = O::KIND;
        self.tracker.start_attempt(case_id, attempt);
        tracing::debug!(case_id, stage = %kind, attempt, "Stage attempt started");
        self.events.try_emit(
            names::STAGE_STARTED,
            Some(json!({"case_id": case_id, "stage": kind.as_str(), "attempt": attempt})),
        );

        // A panicking stage is a programming error: critical, never retried.
        let guarded = AssertUnwindSafe(self.stage.process(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => Err(StageFailure::retryable(
                kind,
                format!(
                    "Stage {kind} timed out after {}ms",
                    self.timeout.as_millis()
                ),
            )),
            Ok(Err(payload)) => Err(StageFailure::critical(
                kind,
                format!("stage panicked: {}", panic_message(payload)),
                attempt,
            )),
            Ok(Ok(Err(e))) if e.is_transient() => Err(StageFailure::retryable(kind, e.to_string())),
            Ok(Ok(Err(e))) => Err(StageFailure::critical(kind, e.to_string(), attempt)),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Alert, AlertType, EnrichmentResult, RiskAssessment};
    use crate::errors::StageError;
    use crate::events::CollectingEventSink;
    use crate::testing::{fixtures, FailingStage, PanickingStage, ScriptedStage, SlowStage};
    use pretty_assertions::assert_eq;

    fn fast_retry() -> RetryConfig {
        RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(2)
    }

    fn alert() -> Alert {
        Alert::new(AlertType::Sanctions, "CUST-1").with_id("case-1")
    }

    #[tokio::test]
    async fn test_success_marks_completed_and_records_metrics() {
        let events = Arc::new(CollectingEventSink::new());
        let runner = StageRunner::new(Arc::new(ScriptedStage::always(fixtures::sample_enrichment())))
            .with_event_sink(events.clone());
        let alert = alert();

        let output = runner.execute("case-1", &StageInput::new(&alert)).await;

        assert_eq!(output.unwrap(), fixtures::sample_enrichment());
        assert_eq!(runner.tracker().status("case-1"), StageStatus::Completed);
        let metrics = runner.tracker().metrics();
        assert_eq!(metrics.invocations, 1);
        assert_eq!(metrics.successes, 1);
        assert!(metrics.last_processing_duration_ms.is_some());
        assert_eq!(events.event_types(), vec!["stage.started", "stage.completed"]);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_then_succeeds() {
        let stage = Arc::new(ScriptedStage::new(vec![
            Err(StageError::transient("503")),
            Ok(RiskAssessment::new(40, 0.8, "ok")),
        ]));
        let runner = StageRunner::new(stage.clone()).with_retry(fast_retry());
        let alert = alert();

        let output = runner.execute("case-1", &StageInput::new(&alert)).await.unwrap();

        assert_eq!(output.overall_risk_score, 40);
        assert_eq!(stage.calls(), 2);
        assert_eq!(runner.tracker().metrics().retries, 1);
        assert_eq!(runner.tracker().state("case-1").unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let stage = Arc::new(FailingStage::<EnrichmentResult>::fatal("unparseable response"));
        let runner = StageRunner::new(stage.clone()).with_retry(fast_retry());
        let alert = alert();

        let failure = runner
            .execute("case-1", &StageInput::new(&alert))
            .await
            .unwrap_err();

        assert_eq!(
            failure,
            StageFailure::critical(StageKind::Enrichment, "unparseable response", 1)
        );
        assert_eq!(stage.calls(), 1);
        let state = runner.tracker().state("case-1").unwrap();
        assert_eq!(state.status, StageStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("unparseable response"));
        assert_eq!(
            runner.tracker().metrics().last_error.as_deref(),
            Some("unparseable response")
        );
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries_and_escalates() {
        let stage = Arc::new(SlowStage::new(
            fixtures::sample_enrichment(),
            Duration::from_millis(200),
        ));
        let events = Arc::new(CollectingEventSink::new());
        let runner = StageRunner::new(stage.clone())
            .with_timeout(Duration::from_millis(10))
            .with_retry(fast_retry())
            .with_event_sink(events.clone());
        let alert = alert();

        let failure = runner
            .execute("case-1", &StageInput::new(&alert))
            .await
            .unwrap_err();

        assert!(!failure.is_retryable());
        assert!(failure.message().contains("timed out after 10ms"));
        assert!(failure.to_string().contains("after 3 attempt(s)"));
        assert_eq!(stage.calls(), 3);
        assert_eq!(events.events_of_type("stage.retrying").len(), 2);
        assert_eq!(events.events_of_type("stage.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_status_is_tracked_per_case() {
        let runner = StageRunner::new(Arc::new(FailingStage::<EnrichmentResult>::fatal("boom")));
        let alert = alert();

        let _ = runner.execute("case-a", &StageInput::new(&alert)).await;
        runner.tracker().start_attempt("case-b", 1);

        assert_eq!(runner.tracker().status("case-a"), StageStatus::Error);
        assert_eq!(runner.tracker().status("case-b"), StageStatus::Running);
        assert_eq!(runner.tracker().status("case-c"), StageStatus::Idle);

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.status, StageStatus::Running);
        assert_eq!(snapshot.running, 1);

        runner.tracker().release("case-b");
        assert_eq!(runner.snapshot().status, StageStatus::Error);
    }

    #[tokio::test]
    async fn test_panicking_stage_is_critical_and_not_retried() {
        let runner = StageRunner::new(Arc::new(PanickingStage::for_case(
            "case-1",
            fixtures::sample_enrichment(),
        )))
        .with_retry(fast_retry());
        let alert = alert();

        let failure = runner
            .execute("case-1", &StageInput::new(&alert))
            .await
            .unwrap_err();

        assert!(!failure.is_retryable());
        assert!(failure.message().contains("stage panicked: stage panicked on case case-1"));
        assert_eq!(runner.tracker().status("case-1"), StageStatus::Error);
        assert_eq!(runner.tracker().metrics().retries, 0);
        assert_eq!(runner.snapshot().running, 0);
    }

    #[derive(Debug)]
    struct PanickingPostProcess;

    #[async_trait::async_trait]
    impl Stage for PanickingPostProcess {
        type Output = RiskAssessment;

        async fn process(&self, _input: &StageInput<'_>) -> Result<RiskAssessment, StageError> {
            Ok(RiskAssessment::new(40, 0.8, "ok"))
        }

        async fn post_process(&self, _output: RiskAssessment) -> Result<RiskAssessment, StageError> {
            panic!("post-processing bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_post_process_is_critical() {
        let runner = StageRunner::new(Arc::new(PanickingPostProcess));
        let alert = alert();

        let failure = runner
            .execute("case-1", &StageInput::new(&alert))
            .await
            .unwrap_err();

        assert!(matches!(failure, StageFailure::Critical { attempts: 1, .. }));
        assert!(failure.message().contains("post-processing bug"));
        assert_eq!(runner.tracker().status("case-1"), StageStatus::Error);
    }
}
