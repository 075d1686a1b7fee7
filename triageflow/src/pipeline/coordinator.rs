//! Runs one case through the four stages and always produces a decision.

use super::state::CaseState;
use crate::audit::{metadata, AuditCategory, AuditTrail, SealedAuditTrail};
use crate::config::{RiskThresholds, TriageConfig};
use crate::core::{
    Alert, Decision, DecisionFactors, Disposition, EnrichmentResult, EscalationDetails,
    NarrativeContext, RecommendedAction, RiskAssessment, StageKind,
};
use crate::errors::{ConfigError, StageFailure};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::stages::{Stage, StageOutput, StageRunner, StageSet, StageSnapshot};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

const EMERGENCY_REVIEWER: &str = "Senior Compliance Officer";

/// A decision together with the sealed audit trail that produced it.
#[derive(Debug, Clone)]
pub struct CaseRecord {
    /// The terminal decision.
    pub decision: Decision,
    /// The case's audit trail.
    pub audit: SealedAuditTrail,
}

/// Sequences the stages for a single case.
///
/// Every stage failure ends in an emergency decision. `process_case` never
/// returns an error.
#[derive(Debug)]
pub struct PipelineCoordinator {
    config: TriageConfig,
    enrichment: StageRunner<EnrichmentResult>,
    risk_assessment: StageRunner<RiskAssessment>,
    narrative: StageRunner<NarrativeContext>,
    decision: StageRunner<Decision>,
    events: Arc<dyn EventSink>,
}

impl PipelineCoordinator {
    /// Creates a coordinator that discards events.
    pub fn new(config: TriageConfig, stages: StageSet) -> Result<Self, ConfigError> {
        Self::with_event_sink(config, stages, Arc::new(NoOpEventSink))
    }

    /// Creates a coordinator that reports stage and case events to `events`.
    pub fn with_event_sink(
        config: TriageConfig,
        stages: StageSet,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            enrichment: runner(stages.enrichment, &config, &events),
            risk_assessment: runner(stages.risk_assessment, &config, &events),
            narrative: runner(stages.narrative, &config, &events),
            decision: runner(stages.decision, &config, &events),
            config,
            events,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Per-stage status summaries, in execution order.
    #[must_use]
    pub fn stage_snapshots(&self) -> Vec<StageSnapshot> {
        vec![
            self.enrichment.snapshot(),
            self.risk_assessment.snapshot(),
            self.narrative.snapshot(),
            self.decision.snapshot(),
        ]
    }

    /// Drops per-case stage state for `case_id`.
    pub fn release_case(&self, case_id: &str) {
        self.enrichment.tracker().release(case_id);
        self.risk_assessment.tracker().release(case_id);
        self.narrative.tracker().release(case_id);
        self.decision.tracker().release(case_id);
    }

    /// Processes one case and returns its decision.
    pub async fn process_case(&self, case: &Alert) -> Decision {
        self.run_case(case).await.decision
    }

    /// Processes one case and returns the decision with its audit trail.
    pub async fn run_case(&self, case: &Alert) -> CaseRecord {
        let case_id = case.alert_id.as_str();
        info!(
            case_id,
            alert_type = ?case.alert_type,
            customer_id = %case.customer_id,
            "Processing case"
        );

        let mut state = CaseState::new(case);
        let mut trail = AuditTrail::new(case_id, self.config.versions());

        let result = self.run_stages(&mut state, &mut trail).await;
        self.release_case(case_id);

        let record = match result.and_then(|()| self.take_decision(&mut state)) {
            Ok(decision) => self.finish(decision, &state, trail),
            Err(failure) => self.emergency(&state, trail, &failure),
        };

        let decision = &record.decision;
        let event = if decision.is_emergency() {
            names::CASE_EMERGENCY
        } else {
            names::CASE_DECIDED
        };
        self.events.try_emit(
            event,
            Some(json!({
                "case_id": case_id,
                "disposition": decision.disposition.as_str(),
                "risk_score": decision.risk_score,
                "confidence": decision.confidence_score,
                "processing_time_ms": decision.processing_time_ms,
            })),
        );
        info!(
            case_id,
            disposition = %decision.disposition,
            risk_score = decision.risk_score,
            confidence = decision.confidence_score,
            emergency = decision.is_emergency(),
            processing_time_ms = decision.processing_time_ms,
            "Case decided"
        );

        record
    }

    async fn run_stages(
        &self,
        state: &mut CaseState<'_>,
        trail: &mut AuditTrail,
    ) -> Result<(), StageFailure> {
        let enrichment = Self::run_stage(&self.enrichment, state, trail).await?;
        state.enrichment = Some(enrichment);
        state.mark_completed(StageKind::Enrichment);

        let risk = Self::run_stage(&self.risk_assessment, state, trail).await?;
        state.risk_assessment = Some(risk);
        state.mark_completed(StageKind::RiskAssessment);

        let narrative = Self::run_stage(&self.narrative, state, trail).await?;
        state.narrative = Some(narrative);
        state.mark_completed(StageKind::NarrativeContext);

        let decision = Self::run_stage(&self.decision, state, trail).await?;
        state.decision = Some(decision);
        state.mark_completed(StageKind::Decision);

        Ok(())
    }

    async fn run_stage<O: StageOutput>(
        runner: &StageRunner<O>,
        state: &CaseState<'_>,
        trail: &mut AuditTrail,
    ) -> Result<O, StageFailure> {
        let input = state.input();
        let output = runner.execute(state.case_id(), &input).await?;
        trail
            .append(
                O::KIND.as_str(),
                O::ACTION,
                O::CATEGORY,
                &input,
                &output,
                output.audit_metadata(),
            )
            .map_err(|e| {
                StageFailure::critical(O::KIND, format!("audit append failed: {e}"), 1)
            })?;
        Ok(output)
    }

    fn take_decision(&self, state: &mut CaseState<'_>) -> Result<Decision, StageFailure> {
        let decision = state.decision.take().ok_or_else(|| {
            StageFailure::critical(StageKind::Decision, "decision stage produced no output", 1)
        })?;
        if decision.case_id != state.case_id() {
            return Err(StageFailure::critical(
                StageKind::Decision,
                format!(
                    "decision case id {} does not match case {}",
                    decision.case_id,
                    state.case_id()
                ),
                1,
            ));
        }
        Ok(decision)
    }

    fn finish(&self, mut decision: Decision, state: &CaseState<'_>, trail: AuditTrail) -> CaseRecord {
        let audit = trail.seal();
        decision.finalize(
            state.elapsed_ms(),
            audit.timeline(),
            self.config.system_version.clone(),
        );
        CaseRecord { decision, audit }
    }

    /// Builds the fail-safe decision for a failed run.
    fn emergency(
        &self,
        state: &CaseState<'_>,
        mut trail: AuditTrail,
        failure: &StageFailure,
    ) -> CaseRecord {
        let case_id = state.case_id();
        let completed: Vec<&str> = state
            .completed_stages()
            .iter()
            .map(StageKind::as_str)
            .collect();
        warn!(
            case_id,
            stage = %failure.stage(),
            completed_stages = ?completed,
            error = %failure,
            "Pipeline failed, escalating case"
        );

        let policy = self.config.emergency;
        let disposition = match (&state.risk_assessment, policy.upgrade_from_partial) {
            (Some(risk), true) => policy
                .disposition
                .max(partial_disposition(&self.config.thresholds, risk.overall_risk_score)),
            _ => policy.disposition,
        };

        let decision = Decision::new(
            case_id,
            disposition,
            100,
            0.0,
            format!("Emergency escalation due to system error: {failure}. Human review required."),
        )
        .with_escalation(
            EscalationDetails::new(
                format!("System error in {} stage: {}", failure.stage(), failure.message()),
                policy.priority,
            )
            .with_reviewer(EMERGENCY_REVIEWER),
        )
        .with_action(RecommendedAction::new(
            "Perform a full manual review of the alert",
            1,
            "Automated triage did not complete",
        ))
        .with_factors(DecisionFactors {
            primary: vec![format!("{} stage failed", failure.stage())],
            uncertainty: vec![failure.to_string()],
            ..DecisionFactors::default()
        })
        .into_emergency();

        let meta = metadata([
            ("error", json!(failure.to_dict())),
            ("completed_stages", json!(completed)),
            ("disposition", json!(disposition.as_str())),
        ]);
        if let Err(e) = trail.append(
            failure.stage().as_str(),
            "emergency_escalation",
            AuditCategory::Error,
            &state.input(),
            failure,
            meta,
        ) {
            error!(case_id, error = %e, "Failed to record emergency audit entry");
        }

        self.finish(decision, state, trail)
    }
}

fn runner<O: StageOutput>(
    stage: Arc<dyn Stage<Output = O>>,
    config: &TriageConfig,
    events: &Arc<dyn EventSink>,
) -> StageRunner<O> {
    StageRunner::new(stage)
        .with_timeout(config.timeouts.for_stage(O::KIND))
        .with_retry(config.retry.clone())
        .with_event_sink(Arc::clone(events))
}

/// Disposition implied by a risk score alone.
fn partial_disposition(thresholds: &RiskThresholds, risk_score: u8) -> Disposition {
    if risk_score >= thresholds.severe_risk {
        Disposition::EscalateSar
    } else if risk_score >= thresholds.high_risk {
        Disposition::EscalateL3
    } else {
        Disposition::EscalateL2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmergencyPolicy;
    use crate::core::{DecisionOutcome, EscalationPriority};
    use crate::errors::StageError;
    use crate::pipeline::RetryConfig;
    use crate::core::StageStatus;
    use crate::testing::{assert_emergency, fixtures, FailingStage, PanickingStage, ScriptedStage};

    fn fast_config() -> TriageConfig {
        TriageConfig::default().with_retry(RetryConfig::default().with_base_delay_ms(1).with_max_delay_ms(2))
    }

    #[tokio::test]
    async fn test_successful_case() {
        let coordinator =
            PipelineCoordinator::new(fast_config(), fixtures::scripted_stage_set()).unwrap();
        let alert = fixtures::sample_alert();

        let record = coordinator.run_case(&alert).await;

        assert_eq!(record.decision.outcome, DecisionOutcome::Success);
        assert_eq!(record.decision.case_id, alert.alert_id);
        assert_eq!(record.audit.len(), 4);
        assert_eq!(record.decision.audit_trail.len(), 4);
        assert!(record.decision.system_version.is_some());
    }

    #[tokio::test]
    async fn test_fatal_failure_escalates() {
        let mut stages = fixtures::scripted_stage_set();
        stages.narrative = Arc::new(FailingStage::<NarrativeContext>::fatal("template error"));
        let coordinator = PipelineCoordinator::new(fast_config(), stages).unwrap();

        let decision = coordinator.process_case(&fixtures::sample_alert()).await;

        assert!(decision.is_emergency());
        assert_eq!(decision.disposition, Disposition::EscalateL3);
        assert_eq!(decision.risk_score, 100);
        assert!((decision.confidence_score - 0.0).abs() < f64::EPSILON);
        assert!(decision.requires_human_review);
        assert!(decision.rationale.contains("template error"));
        let details = decision.escalation_details.unwrap();
        assert_eq!(details.priority, EscalationPriority::Urgent);
        assert_eq!(details.suggested_reviewer.as_deref(), Some(EMERGENCY_REVIEWER));
        // enrichment, risk, then the error entry
        assert_eq!(decision.audit_trail.len(), 3);
        assert_eq!(decision.audit_trail[2].action, "emergency_escalation");
    }

    #[tokio::test]
    async fn test_emergency_upgrade_from_partial_risk() {
        let mut stages = fixtures::scripted_stage_set();
        stages.risk_assessment = Arc::new(ScriptedStage::always(fixtures::sample_risk(92)));
        stages.decision = Arc::new(FailingStage::<Decision>::fatal("model unavailable"));
        let config = fast_config().with_emergency(EmergencyPolicy {
            upgrade_from_partial: true,
            ..EmergencyPolicy::default()
        });
        let coordinator = PipelineCoordinator::new(config, stages).unwrap();

        let decision = coordinator.process_case(&fixtures::sample_alert()).await;

        assert!(decision.is_emergency());
        assert_eq!(decision.disposition, Disposition::EscalateSar);
    }

    #[tokio::test]
    async fn test_mismatched_decision_case_id_is_emergency() {
        let mut stages = fixtures::scripted_stage_set();
        stages.decision = Arc::new(ScriptedStage::always(fixtures::sample_decision(
            "someone-else",
            Disposition::AutoClear,
            10,
        )));
        let coordinator = PipelineCoordinator::new(fast_config(), stages).unwrap();

        let decision = coordinator.process_case(&fixtures::sample_alert()).await;

        assert!(decision.is_emergency());
        assert_eq!(decision.case_id, "alert-0001");
        assert!(decision.rationale.contains("does not match"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let mut stages = fixtures::scripted_stage_set();
        stages.enrichment = Arc::new(ScriptedStage::new(vec![
            Err(StageError::transient("rate limited")),
            Ok(fixtures::sample_enrichment()),
        ]));
        let coordinator = PipelineCoordinator::new(fast_config(), stages).unwrap();

        let decision = coordinator.process_case(&fixtures::sample_alert()).await;

        assert!(!decision.is_emergency());
        let snapshot = &coordinator.stage_snapshots()[0];
        assert_eq!(snapshot.metrics.retries, 1);
        assert_eq!(snapshot.running, 0);
    }

    #[tokio::test]
    async fn test_panicking_stage_yields_emergency_decision() {
        let mut stages = fixtures::scripted_stage_set();
        stages.narrative = Arc::new(PanickingStage::for_case(
            "alert-0001",
            fixtures::sample_narrative(),
        ));
        let coordinator = PipelineCoordinator::new(fast_config(), stages).unwrap();

        let record = coordinator.run_case(&fixtures::sample_alert()).await;

        assert_emergency(&record.decision);
        assert!(record.decision.rationale.contains("stage panicked"));
        // enrichment, risk, then the error entry
        assert_eq!(record.audit.len(), 3);
        assert!(record.audit.verify().is_ok());

        let narrative = &coordinator.stage_snapshots()[2];
        assert_eq!(narrative.status, StageStatus::Error);
        assert_eq!(narrative.running, 0);
        assert_eq!(narrative.metrics.failures, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TriageConfig::default().with_max_concurrent_cases(0);
        assert!(PipelineCoordinator::new(config, fixtures::scripted_stage_set()).is_err());
    }

    #[test]
    fn test_partial_disposition() {
        let t = RiskThresholds::default();
        assert_eq!(partial_disposition(&t, 90), Disposition::EscalateSar);
        assert_eq!(partial_disposition(&t, 75), Disposition::EscalateL3);
        assert_eq!(partial_disposition(&t, 10), Disposition::EscalateL2);
    }
}
