//! Per-run state for one case.

use crate::core::{
    Alert, Decision, EnrichmentResult, NarrativeContext, RiskAssessment, StageKind,
};
use crate::stages::StageInput;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Holds the case and each stage's output as the pipeline advances.
///
/// Created at pipeline start, filled in execution order by the coordinator
/// and dropped once the decision is returned.
#[derive(Debug)]
pub struct CaseState<'a> {
    /// The case under review.
    pub case: &'a Alert,
    /// Enrichment output.
    pub enrichment: Option<EnrichmentResult>,
    /// Risk assessment output.
    pub risk_assessment: Option<RiskAssessment>,
    /// Narrative output.
    pub narrative: Option<NarrativeContext>,
    /// Decision output.
    pub decision: Option<Decision>,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    start: Instant,
    stage_times: Vec<(StageKind, u64)>,
}

impl<'a> CaseState<'a> {
    /// Starts a run.
    #[must_use]
    pub fn new(case: &'a Alert) -> Self {
        Self {
            case,
            enrichment: None,
            risk_assessment: None,
            narrative: None,
            decision: None,
            started_at: Utc::now(),
            start: Instant::now(),
            stage_times: Vec::with_capacity(StageKind::ALL.len()),
        }
    }

    /// Case id.
    #[must_use]
    pub fn case_id(&self) -> &'a str {
        &self.case.alert_id
    }

    /// The input for the next stage: the case plus everything completed so far.
    #[must_use]
    pub fn input(&self) -> StageInput<'_> {
        StageInput {
            case: self.case,
            enrichment: self.enrichment.as_ref(),
            risk_assessment: self.risk_assessment.as_ref(),
            narrative: self.narrative.as_ref(),
        }
    }

    /// Milliseconds since the run started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records that a stage completed now.
    pub fn mark_completed(&mut self, kind: StageKind) {
        let elapsed = self.elapsed_ms();
        self.stage_times.push((kind, elapsed));
    }

    /// Elapsed milliseconds at each stage completion, in execution order.
    #[must_use]
    pub fn stage_times(&self) -> &[(StageKind, u64)] {
        &self.stage_times
    }

    /// Stages completed so far.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<StageKind> {
        self.stage_times.iter().map(|(kind, _)| *kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_input_grows_with_completed_stages() {
        let alert = fixtures::sample_alert();
        let mut state = CaseState::new(&alert);

        assert!(state.input().enrichment.is_none());

        state.enrichment = Some(fixtures::sample_enrichment());
        state.mark_completed(StageKind::Enrichment);

        let input = state.input();
        assert!(input.enrichment.is_some());
        assert!(input.risk_assessment.is_none());
        assert_eq!(state.completed_stages(), vec![StageKind::Enrichment]);
        assert_eq!(state.case_id(), "alert-0001");
    }

    #[test]
    fn test_stage_times_are_non_decreasing() {
        let alert = fixtures::sample_alert();
        let mut state = CaseState::new(&alert);

        for kind in StageKind::ALL {
            state.mark_completed(kind);
        }

        let times = state.stage_times();
        assert_eq!(times.len(), 4);
        assert!(times.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
