//! Stage trait and the execution wrapper.
//!
//! A stage is one of the four fixed analysis steps. Each stage kind has its
//! own typed output, so the coordinator cannot hand a risk stage the output
//! of the wrong predecessor.

mod reference;
mod runner;

pub use reference::{DecisionStage, EnrichmentStage, NarrativeStage, RiskScoringStage};
pub use runner::{StageMetrics, StageRunState, StageRunner, StageSnapshot, StageTracker};

use crate::audit::{metadata, AuditCategory, AuditMetadata};
use crate::core::{Alert, Decision, EnrichmentResult, NarrativeContext, RiskAssessment, StageKind};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;

/// What a stage receives: the case plus the outputs of earlier stages.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StageInput<'a> {
    /// The case under review.
    pub case: &'a Alert,
    /// Enrichment output, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<&'a EnrichmentResult>,
    /// Risk assessment output, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<&'a RiskAssessment>,
    /// Narrative output, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<&'a NarrativeContext>,
}

impl<'a> StageInput<'a> {
    /// Input for the first stage.
    #[must_use]
    pub fn new(case: &'a Alert) -> Self {
        Self {
            case,
            enrichment: None,
            risk_assessment: None,
            narrative: None,
        }
    }

    /// Returns the enrichment output or [`StageError::MissingInput`].
    pub fn require_enrichment(&self) -> Result<&'a EnrichmentResult, StageError> {
        self.enrichment
            .ok_or(StageError::MissingInput(StageKind::Enrichment))
    }

    /// Returns the risk assessment or [`StageError::MissingInput`].
    pub fn require_risk_assessment(&self) -> Result<&'a RiskAssessment, StageError> {
        self.risk_assessment
            .ok_or(StageError::MissingInput(StageKind::RiskAssessment))
    }

    /// Returns the narrative or [`StageError::MissingInput`].
    pub fn require_narrative(&self) -> Result<&'a NarrativeContext, StageError> {
        self.narrative
            .ok_or(StageError::MissingInput(StageKind::NarrativeContext))
    }
}

/// A typed stage output and how it is recorded in the audit trail.
pub trait StageOutput: Serialize + Clone + Debug + Send + Sync + 'static {
    /// The stage that produces this output.
    const KIND: StageKind;
    /// Audit action label.
    const ACTION: &'static str;
    /// Audit category.
    const CATEGORY: AuditCategory;

    /// Metadata recorded alongside the hashes.
    fn audit_metadata(&self) -> AuditMetadata;
}

impl StageOutput for EnrichmentResult {
    const KIND: StageKind = StageKind::Enrichment;
    const ACTION: &'static str = "data_enriched";
    const CATEGORY: AuditCategory = AuditCategory::StageCompletion;

    fn audit_metadata(&self) -> AuditMetadata {
        metadata([
            ("sources_used", json!(self.sources_used)),
            ("completeness", json!(self.data_quality.completeness)),
            ("warnings", json!(self.warnings.len())),
        ])
    }
}

impl StageOutput for RiskAssessment {
    const KIND: StageKind = StageKind::RiskAssessment;
    const ACTION: &'static str = "risk_calculated";
    const CATEGORY: AuditCategory = AuditCategory::RiskDecision;

    fn audit_metadata(&self) -> AuditMetadata {
        let compliance = if self.compliance_concerns.is_empty() {
            "no_concerns"
        } else {
            "concerns_raised"
        };
        metadata([
            ("risk_score", json!(self.overall_risk_score)),
            ("risk_level", json!(self.risk_level.as_str())),
            ("confidence", json!(self.confidence)),
            ("compliance_result", json!(compliance)),
            ("regulations", json!(self.regulatory_citations)),
        ])
    }
}

impl StageOutput for NarrativeContext {
    const KIND: StageKind = StageKind::NarrativeContext;
    const ACTION: &'static str = "narrative_generated";
    const CATEGORY: AuditCategory = AuditCategory::StageCompletion;

    fn audit_metadata(&self) -> AuditMetadata {
        metadata([
            ("confidence", json!(self.confidence_score)),
            ("key_findings", json!(self.key_findings.len())),
        ])
    }
}

impl StageOutput for Decision {
    const KIND: StageKind = StageKind::Decision;
    const ACTION: &'static str = "decision_made";
    const CATEGORY: AuditCategory = AuditCategory::RiskDecision;

    fn audit_metadata(&self) -> AuditMetadata {
        metadata([
            ("disposition", json!(self.disposition.as_str())),
            ("confidence", json!(self.confidence_score)),
            ("requires_human_review", json!(self.requires_human_review)),
        ])
    }
}

/// Trait for pipeline stages.
///
/// Implementations are shared across every in-flight case, so all per-case
/// data arrives through [`StageInput`].
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// The typed output.
    type Output: StageOutput;

    /// Returns the name of the stage.
    fn name(&self) -> &str {
        <Self::Output as StageOutput>::KIND.as_str()
    }

    /// Runs the stage's domain logic.
    async fn process(&self, input: &StageInput<'_>) -> Result<Self::Output, StageError>;

    /// Hook applied to a successful output. Identity by default.
    async fn post_process(&self, output: Self::Output) -> Result<Self::Output, StageError> {
        Ok(output)
    }
}

/// A synchronous function-based stage.
pub struct FnStage<O, F>
where
    F: Fn(&StageInput<'_>) -> Result<O, StageError> + Send + Sync,
{
    name: String,
    func: F,
    _output: std::marker::PhantomData<fn() -> O>,
}

impl<O, F> FnStage<O, F>
where
    O: StageOutput,
    F: Fn(&StageInput<'_>) -> Result<O, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(func: F) -> Self {
        Self {
            name: O::KIND.as_str().to_string(),
            func,
            _output: std::marker::PhantomData,
        }
    }
}

impl<O, F> Debug for FnStage<O, F>
where
    F: Fn(&StageInput<'_>) -> Result<O, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<O, F> Stage for FnStage<O, F>
where
    O: StageOutput,
    F: Fn(&StageInput<'_>) -> Result<O, StageError> + Send + Sync,
{
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: &StageInput<'_>) -> Result<O, StageError> {
        (self.func)(input)
    }
}

/// The four stages the coordinator runs, in order.
#[derive(Debug, Clone)]
pub struct StageSet {
    /// Enrichment stage.
    pub enrichment: Arc<dyn Stage<Output = EnrichmentResult>>,
    /// Risk assessment stage.
    pub risk_assessment: Arc<dyn Stage<Output = RiskAssessment>>,
    /// Narrative context stage.
    pub narrative: Arc<dyn Stage<Output = NarrativeContext>>,
    /// Decision stage.
    pub decision: Arc<dyn Stage<Output = Decision>>,
}

impl StageSet {
    /// Bundles the four stages.
    pub fn new(
        enrichment: Arc<dyn Stage<Output = EnrichmentResult>>,
        risk_assessment: Arc<dyn Stage<Output = RiskAssessment>>,
        narrative: Arc<dyn Stage<Output = NarrativeContext>>,
        decision: Arc<dyn Stage<Output = Decision>>,
    ) -> Self {
        Self {
            enrichment,
            risk_assessment,
            narrative,
            decision,
        }
    }
}
