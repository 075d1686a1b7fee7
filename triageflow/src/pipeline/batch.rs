//! Concurrent batch processing with bounded admission.

use super::coordinator::PipelineCoordinator;
use crate::core::{Alert, Decision};
use crate::errors::{panic_message, TriageError};
use crate::events::{names, EventSink};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info};

/// Caps the number of cases inside the pipeline at once.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    /// Creates a gate admitting at most `capacity` cases.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Waits for a free slot.
    pub async fn admit(self: &Arc<Self>) -> Result<AdmissionPermit, TriageError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| TriageError::Internal(format!("admission gate closed: {e}")))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            gate: Arc::clone(self),
        })
    }

    /// Maximum concurrent cases.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cases currently admitted.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of cases admitted at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result for one case in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    /// The pipeline returned a decision (success or emergency).
    Decided(Decision),
    /// The case's task died before producing a decision.
    Failed {
        /// The case.
        case_id: String,
        /// What went wrong.
        error: String,
    },
}

impl CaseOutcome {
    /// Case id of this outcome.
    #[must_use]
    pub fn case_id(&self) -> &str {
        match self {
            Self::Decided(decision) => &decision.case_id,
            Self::Failed { case_id, .. } => case_id,
        }
    }

    /// The decision, if one was produced.
    #[must_use]
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Decided(decision) => Some(decision),
            Self::Failed { .. } => None,
        }
    }

    /// Returns true if no decision was produced.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Totals for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Cases submitted.
    pub total: usize,
    /// Decisions from a full pipeline run.
    pub successful: usize,
    /// Emergency decisions.
    pub emergency: usize,
    /// Cases without a decision.
    pub failed: usize,
}

impl BatchSummary {
    /// Counts outcomes.
    #[must_use]
    pub fn from_outcomes(outcomes: &[CaseOutcome]) -> Self {
        outcomes.iter().fold(
            Self {
                total: outcomes.len(),
                ..Self::default()
            },
            |mut acc, outcome| {
                match outcome.decision() {
                    Some(d) if d.is_emergency() => acc.emergency += 1,
                    Some(_) => acc.successful += 1,
                    None => acc.failed += 1,
                }
                acc
            },
        )
    }
}

/// Runs many cases concurrently through one coordinator.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    coordinator: Arc<PipelineCoordinator>,
    gate: Arc<AdmissionGate>,
    events: Arc<dyn EventSink>,
}

impl BatchRunner {
    /// Creates a runner bounded by the coordinator's `max_concurrent_cases`.
    pub fn new(coordinator: Arc<PipelineCoordinator>, events: Arc<dyn EventSink>) -> Self {
        let gate = Arc::new(AdmissionGate::new(
            coordinator.config().max_concurrent_cases,
        ));
        Self {
            coordinator,
            gate,
            events,
        }
    }

    /// Returns the admission gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Processes `cases` concurrently.
    ///
    /// Returns one outcome per case in input order. A stage panic already
    /// ends in an emergency decision; a case whose task dies anyway is
    /// reported as [`CaseOutcome::Failed`] and does not affect the others.
    pub async fn process_batch(&self, cases: Vec<Alert>) -> Vec<CaseOutcome> {
        let timer = crate::observability::SpanTimer::start("batch");
        info!(
            batch_size = cases.len(),
            max_concurrent_cases = self.gate.capacity(),
            "Processing batch"
        );

        let handles: Vec<_> = cases
            .into_iter()
            .map(|case| {
                let case_id = case.alert_id.clone();
                let coordinator = Arc::clone(&self.coordinator);
                let gate = Arc::clone(&self.gate);
                let handle = tokio::spawn(async move {
                    let _permit = gate.admit().await?;
                    Ok::<_, TriageError>(coordinator.process_case(&case).await)
                });
                (case_id, handle)
            })
            .collect();

        let joined = join_all(
            handles
                .into_iter()
                .map(|(case_id, handle)| async move { (case_id, handle.await) }),
        )
        .await;

        let mut outcomes = Vec::with_capacity(joined.len());
        for (case_id, joined) in joined {
            let outcome = match joined {
                Ok(Ok(decision)) => CaseOutcome::Decided(decision),
                Ok(Err(e)) => CaseOutcome::Failed {
                    case_id,
                    error: e.to_string(),
                },
                Err(join_error) => {
                    self.coordinator.release_case(&case_id);
                    let error = if join_error.is_panic() {
                        format!("case task panicked: {}", panic_message(join_error.into_panic()))
                    } else {
                        format!("case task cancelled: {join_error}")
                    };
                    error!(case_id = %case_id, error = %error, "Case failed without a decision");
                    CaseOutcome::Failed { case_id, error }
                }
            };
            outcomes.push(outcome);
        }

        let summary = BatchSummary::from_outcomes(&outcomes);
        let duration_ms = timer.elapsed_ms();
        info!(
            total = summary.total,
            successful = summary.successful,
            emergency = summary.emergency,
            failed = summary.failed,
            duration_ms,
            "Batch completed"
        );
        self.events.try_emit(
            names::BATCH_COMPLETED,
            Some(json!({
                "total": summary.total,
                "successful": summary.successful,
                "emergency": summary.emergency,
                "failed": summary.failed,
                "duration_ms": duration_ms,
            })),
        );

        outcomes
    }
}
