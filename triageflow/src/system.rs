//! Top-level entry point.

use crate::analysis::AnalysisService;
use crate::config::TriageConfig;
use crate::core::{Alert, Decision};
use crate::errors::ConfigError;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{BatchRunner, CaseOutcome, CaseRecord, PipelineCoordinator};
use crate::stages::{
    DecisionStage, EnrichmentStage, NarrativeStage, RiskScoringStage, StageSet, StageSnapshot,
};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of the system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Per-stage status and counters, in execution order.
    pub stages: Vec<StageSnapshot>,
    /// Batch cases currently admitted.
    pub in_flight_cases: usize,
    /// Highest number of batch cases admitted at once.
    pub peak_in_flight_cases: usize,
    /// Admission limit.
    pub max_concurrent_cases: usize,
    /// Version stamped onto decisions.
    pub system_version: String,
}

/// The AML triage system: one coordinator plus a bounded batch runner.
///
/// ```rust,ignore
/// use triageflow::prelude::*;
///
/// let system = TriageSystem::with_reference_stages(
///     TriageConfig::default().with_env_overrides()?,
///     Arc::new(StaticAnalysisService::new()),
/// )?;
/// let decision = system.process_case(&alert).await;
/// ```
#[derive(Debug, Clone)]
pub struct TriageSystem {
    coordinator: Arc<PipelineCoordinator>,
    batch: BatchRunner,
}

impl TriageSystem {
    /// Creates a system from explicit stages.
    pub fn new(config: TriageConfig, stages: StageSet) -> Result<Self, ConfigError> {
        Self::with_event_sink(config, stages, Arc::new(NoOpEventSink))
    }

    /// Creates a system that reports events to `events`.
    pub fn with_event_sink(
        config: TriageConfig,
        stages: StageSet,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        let coordinator = Arc::new(PipelineCoordinator::with_event_sink(
            config,
            stages,
            Arc::clone(&events),
        )?);
        let batch = BatchRunner::new(Arc::clone(&coordinator), events);
        Ok(Self { coordinator, batch })
    }

    /// Creates a system running the built-in stages on top of `service`.
    pub fn with_reference_stages(
        config: TriageConfig,
        service: Arc<dyn AnalysisService>,
    ) -> Result<Self, ConfigError> {
        let stages = reference_stages(&config, service);
        Self::new(config, stages)
    }

    /// Processes one case. Always returns a decision.
    pub async fn process_case(&self, case: &Alert) -> Decision {
        self.coordinator.process_case(case).await
    }

    /// Processes one case and keeps its sealed audit trail.
    pub async fn process_case_audited(&self, case: &Alert) -> CaseRecord {
        self.coordinator.run_case(case).await
    }

    /// Processes many cases, at most `max_concurrent_cases` at a time.
    pub async fn process_batch(&self, cases: Vec<Alert>) -> Vec<CaseOutcome> {
        self.batch.process_batch(cases).await
    }

    /// Returns the current status of every stage and the admission gate.
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        let gate = self.batch.gate();
        let config = self.coordinator.config();
        SystemStatus {
            stages: self.coordinator.stage_snapshots(),
            in_flight_cases: gate.in_flight(),
            peak_in_flight_cases: gate.peak_in_flight(),
            max_concurrent_cases: gate.capacity(),
            system_version: config.system_version.clone(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TriageConfig {
        self.coordinator.config()
    }
}

/// The four built-in stages sharing one analysis service.
pub fn reference_stages(config: &TriageConfig, service: Arc<dyn AnalysisService>) -> StageSet {
    StageSet::new(
        Arc::new(EnrichmentStage::new(Arc::clone(&service))),
        Arc::new(RiskScoringStage::new(Arc::clone(&service))),
        Arc::new(NarrativeStage::new(Arc::clone(&service))),
        Arc::new(DecisionStage::new(service, config.thresholds)),
    )
}
