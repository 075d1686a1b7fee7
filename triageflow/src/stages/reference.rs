//! Reference implementations of the four stages.
//!
//! The numeric parts are deterministic; free text comes from the
//! [`AnalysisService`]. Replace any of them through the [`Stage`] trait.

use super::{Stage, StageInput};
use crate::analysis::{AnalysisRequest, AnalysisService};
use crate::config::RiskThresholds;
use crate::core::{
    Alert, AlertType, DataQuality, Decision, DecisionFactors, Disposition, EnrichmentResult,
    EscalationDetails, EscalationPriority, NarrativeContext, RecommendedAction, RiskAssessment, StageKind,
};
use crate::errors::StageError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const HIGH_RISK_JURISDICTIONS: &[&str] = &["IR", "KP", "MM", "SY"];
const ELEVATED_RISK_JURISDICTIONS: &[&str] = &["AE", "PA", "VG", "KY", "RU"];
const HISTORY_SOURCE: &str = "internal_alert_history";

fn request(kind: StageKind, case: &Alert, system: &str, prompt: String) -> AnalysisRequest {
    AnalysisRequest::new(kind, &case.alert_id, prompt).with_system_prompt(system)
}

/// Gathers customer, jurisdiction and history context.
#[derive(Debug, Clone)]
pub struct EnrichmentStage {
    service: Arc<dyn AnalysisService>,
}

impl EnrichmentStage {
    /// Creates the stage.
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }

    fn jurisdiction_risk(case: &Alert) -> Option<&'static str> {
        if let Some(explicit) = case.payload.get("jurisdiction_risk").and_then(|v| v.as_str()) {
            return match explicit.to_ascii_uppercase().as_str() {
                "HIGH" => Some("HIGH"),
                "MEDIUM" => Some("MEDIUM"),
                _ => Some("LOW"),
            };
        }
        let code = case.jurisdiction.as_deref()?.to_ascii_uppercase();
        Some(if HIGH_RISK_JURISDICTIONS.contains(&code.as_str()) {
            "HIGH"
        } else if ELEVATED_RISK_JURISDICTIONS.contains(&code.as_str()) {
            "MEDIUM"
        } else {
            "LOW"
        })
    }

    fn data_quality(case: &Alert) -> DataQuality {
        let present = [
            !case.customer_id.trim().is_empty(),
            case.jurisdiction.is_some(),
            !case.data_sources.is_empty(),
            !case.match_scores.is_empty(),
            !case.payload.is_null(),
        ];
        let found = present.iter().filter(|p| **p).count();
        let completeness = found as f64 / present.len() as f64;
        let reliability = if case.data_sources.is_empty() { 0.5 } else { 0.9 };
        DataQuality::new(completeness, reliability)
    }
}

#[async_trait]
impl Stage for EnrichmentStage {
    type Output = EnrichmentResult;

    async fn process(&self, input: &StageInput<'_>) -> Result<EnrichmentResult, StageError> {
        let case = input.case;
        let historical_alert_count = case
            .payload
            .get("historical_alert_count")
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX));
        let jurisdiction_risk = Self::jurisdiction_risk(case);

        let mut warnings = Vec::new();
        if case.jurisdiction.is_none() {
            warnings.push("No jurisdiction on record".to_string());
        }
        if case.data_sources.is_empty() {
            warnings.push("No screening sources on record".to_string());
        }

        let mut sources_used = case.data_sources.clone();
        sources_used.push(HISTORY_SOURCE.to_string());

        let summary = self
            .service
            .complete(
                &request(
                    StageKind::Enrichment,
                    case,
                    "You are the data enrichment analyst in an AML triage system.",
                    format!(
                        "Summarize the customer context for a {:?} alert on customer {}.",
                        case.alert_type, case.customer_id
                    ),
                )
                .with_context(json!({
                    "alert": case,
                    "historical_alert_count": historical_alert_count,
                    "jurisdiction_risk": jurisdiction_risk,
                })),
            )
            .await?;

        Ok(EnrichmentResult {
            summary,
            sources_used,
            historical_alert_count,
            jurisdiction_risk: jurisdiction_risk.map(str::to_string),
            data_quality: Self::data_quality(case),
            warnings,
        })
    }
}

/// Weighted component scoring over the alert and its enrichment.
#[derive(Debug, Clone)]
pub struct RiskScoringStage {
    service: Arc<dyn AnalysisService>,
}

impl RiskScoringStage {
    /// Creates the stage.
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }

    /// Returns the weighted score and the factors that drove it.
    fn score(case: &Alert, enrichment: &EnrichmentResult) -> (u8, Vec<String>, Vec<String>) {
        let mut aggravating = Vec::new();
        let mut mitigating = Vec::new();

        let mut customer = 20.0;
        if case.alert_type == AlertType::Pep {
            customer += 40.0;
            aggravating.push("Politically exposed person".to_string());
        }
        if enrichment.historical_alert_count > 3 {
            customer += 20.0;
            aggravating.push(format!(
                "{} prior alerts on record",
                enrichment.historical_alert_count
            ));
        } else if enrichment.historical_alert_count == 0 {
            mitigating.push("No prior alerts on record".to_string());
        }

        let geographic = match enrichment.jurisdiction_risk.as_deref() {
            Some("HIGH") => {
                aggravating.push("High-risk jurisdiction".to_string());
                90.0
            }
            Some("MEDIUM") => 50.0,
            Some(_) => {
                mitigating.push("Low-risk jurisdiction".to_string());
                20.0
            }
            None => 50.0,
        };

        let transaction = if case.alert_type == AlertType::Transaction {
            aggravating.push("Transaction monitoring trigger".to_string());
            80.0
        } else {
            20.0
        };

        let best_match = case.max_match_score();
        let screening = best_match * 100.0;
        if best_match >= 0.85 {
            aggravating.push(format!("Strong screening match ({best_match:.2})"));
        } else if best_match < 0.5 && !case.match_scores.is_empty() {
            mitigating.push(format!("Weak screening match ({best_match:.2})"));
        }

        let network = 10.0;

        let mut weighted = customer * 0.30
            + geographic * 0.20
            + transaction * 0.25
            + screening * 0.15
            + network * 0.10;
        // Near-certain sanctions hits go straight to the severe band.
        if case.alert_type == AlertType::Sanctions && best_match >= 0.95 {
            weighted = weighted.max(90.0);
        }

        let score = weighted.round().clamp(0.0, 100.0) as u8;
        (score, aggravating, mitigating)
    }
}

#[async_trait]
impl Stage for RiskScoringStage {
    type Output = RiskAssessment;

    async fn process(&self, input: &StageInput<'_>) -> Result<RiskAssessment, StageError> {
        let case = input.case;
        let enrichment = input.require_enrichment()?;
        let (score, aggravating, mitigating) = Self::score(case, enrichment);
        let confidence = 0.85 * (0.5 + enrichment.data_quality.reliability / 2.0);

        let narrative = self
            .service
            .complete(
                &request(
                    StageKind::RiskAssessment,
                    case,
                    "You are the risk scoring analyst in an AML triage system.",
                    format!("Explain a risk score of {score} for this alert."),
                )
                .with_context(json!({
                    "enrichment_summary": enrichment.summary,
                    "aggravating_factors": aggravating,
                    "mitigating_factors": mitigating,
                })),
            )
            .await?;

        let mut assessment = RiskAssessment::new(score, confidence, narrative);
        assessment.regulatory_citations = case.applicable_regulations.clone();
        if score > 60 {
            assessment
                .regulatory_citations
                .push("31 CFR 1020.320".to_string());
        }
        if case.alert_type == AlertType::Sanctions && score > 80 {
            assessment
                .compliance_concerns
                .push("Possible OFAC sanctions exposure".to_string());
        }
        assessment.aggravating_factors = aggravating;
        assessment.mitigating_factors = mitigating;
        Ok(assessment)
    }
}

/// Builds the reviewer-facing narrative.
#[derive(Debug, Clone)]
pub struct NarrativeStage {
    service: Arc<dyn AnalysisService>,
}

impl NarrativeStage {
    /// Creates the stage.
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Stage for NarrativeStage {
    type Output = NarrativeContext;

    async fn process(&self, input: &StageInput<'_>) -> Result<NarrativeContext, StageError> {
        let case = input.case;
        let enrichment = input.require_enrichment()?;
        let risk = input.require_risk_assessment()?;

        let narrative = self
            .service
            .complete(
                &request(
                    StageKind::NarrativeContext,
                    case,
                    "You are the investigator writing case context for human reviewers.",
                    "Write the investigation narrative for this alert.".to_string(),
                )
                .with_context(json!({
                    "enrichment_summary": enrichment.summary,
                    "risk_score": risk.overall_risk_score,
                    "risk_narrative": risk.narrative,
                })),
            )
            .await?;

        let executive_summary = format!(
            "{:?} alert for customer {}: {} risk (score {}).",
            case.alert_type,
            case.customer_id,
            risk.risk_level.as_str(),
            risk.overall_risk_score
        );
        let key_findings = risk
            .aggravating_factors
            .iter()
            .chain(&risk.mitigating_factors)
            .take(5)
            .cloned()
            .collect();

        Ok(NarrativeContext {
            executive_summary,
            narrative,
            key_findings,
            confidence_score: (enrichment.data_quality.score() + risk.confidence) / 2.0,
        })
    }
}

/// Maps risk and data quality to a disposition.
#[derive(Debug, Clone)]
pub struct DecisionStage {
    service: Arc<dyn AnalysisService>,
    thresholds: RiskThresholds,
}

impl DecisionStage {
    /// Creates the stage.
    pub fn new(service: Arc<dyn AnalysisService>, thresholds: RiskThresholds) -> Self {
        Self {
            service,
            thresholds,
        }
    }

    /// Chooses a disposition from the risk score and data completeness.
    #[must_use]
    pub fn disposition(&self, risk_score: u8, completeness: f64) -> Disposition {
        let t = &self.thresholds;
        if risk_score >= t.severe_risk {
            Disposition::EscalateSar
        } else if risk_score >= t.high_risk {
            Disposition::EscalateL3
        } else if risk_score > t.auto_clear_max_risk || completeness < t.min_completeness {
            Disposition::EscalateL2
        } else if completeness >= t.auto_clear_completeness {
            Disposition::AutoClear
        } else {
            Disposition::EscalateL2
        }
    }

    /// Weighted blend of data quality and risk confidence, rounded to 2 places.
    #[must_use]
    pub fn confidence(enrichment: &EnrichmentResult, risk: &RiskAssessment) -> f64 {
        let blended = enrichment.data_quality.score() * 0.4 + risk.confidence * 0.6;
        (blended * 100.0).round() / 100.0
    }

    /// Whether a person has to look at the case.
    #[must_use]
    pub fn requires_human_review(&self, disposition: Disposition, confidence: f64) -> bool {
        match disposition {
            Disposition::EscalateL3 | Disposition::EscalateSar | Disposition::BlockTransaction => true,
            _ if confidence < self.thresholds.escalate_l2_confidence => true,
            Disposition::AutoClear => confidence < self.thresholds.auto_clear_confidence,
            Disposition::EscalateL2 => true,
        }
    }

    fn actions(disposition: Disposition) -> Vec<RecommendedAction> {
        if disposition == Disposition::AutoClear {
            vec![RecommendedAction::new(
                "Close alert with documented rationale",
                1,
                "Low risk assessment and high confidence in data",
            )]
        } else {
            vec![
                RecommendedAction::new(
                    "Review alert details and enrichment data",
                    1,
                    "Human review required for disposition decision",
                ),
                RecommendedAction::new(
                    "Verify customer identity and business activities",
                    2,
                    "Ensure accurate risk assessment",
                ),
            ]
        }
    }
}

#[async_trait]
impl Stage for DecisionStage {
    type Output = Decision;

    async fn process(&self, input: &StageInput<'_>) -> Result<Decision, StageError> {
        let case = input.case;
        let enrichment = input.require_enrichment()?;
        let risk = input.require_risk_assessment()?;
        let narrative = input.require_narrative()?;

        let disposition = self.disposition(
            risk.overall_risk_score,
            enrichment.data_quality.completeness,
        );
        let confidence = Self::confidence(enrichment, risk);
        let requires_human = self.requires_human_review(disposition, confidence);

        let rationale = self
            .service
            .complete(
                &request(
                    StageKind::Decision,
                    case,
                    "You are the decision analyst. Write an audit-ready rationale.",
                    format!("Justify disposition {disposition} for this alert."),
                )
                .with_context(json!({
                    "risk_score": risk.overall_risk_score,
                    "risk_level": risk.risk_level.as_str(),
                    "data_completeness": enrichment.data_quality.completeness,
                    "executive_summary": narrative.executive_summary,
                    "compliance_concerns": risk.compliance_concerns,
                })),
            )
            .await?;

        let factors = DecisionFactors {
            primary: risk.aggravating_factors.iter().take(3).cloned().collect(),
            supporting: vec![
                "Data quality assessment".to_string(),
                "Regulatory compliance check".to_string(),
            ],
            contrary: risk.mitigating_factors.iter().take(2).cloned().collect(),
            uncertainty: enrichment.warnings.clone(),
        };

        let mut decision = Decision::new(
            &case.alert_id,
            disposition,
            risk.overall_risk_score,
            confidence,
            rationale,
        )
        .with_factors(factors)
        .with_citations(risk.regulatory_citations.clone())
        .with_human_review(requires_human);
        for action in Self::actions(disposition) {
            decision = decision.with_action(action);
        }

        if requires_human {
            let reviewer = if disposition <= Disposition::EscalateL2 {
                "L2 Compliance Analyst"
            } else {
                "Senior Compliance Officer"
            };
            let priority = disposition.escalation_priority().max(EscalationPriority::Medium);
            decision = decision.with_escalation(
                EscalationDetails::new(
                    format!(
                        "Risk score: {}, Risk level: {}",
                        risk.overall_risk_score,
                        risk.risk_level.as_str()
                    ),
                    priority,
                )
                .with_reviewer(reviewer),
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MockAnalysisService, StaticAnalysisService};
    use crate::errors::AnalysisError;
    use crate::testing::fixtures;

    fn service() -> Arc<dyn AnalysisService> {
        Arc::new(StaticAnalysisService::new())
    }

    fn decision_stage() -> DecisionStage {
        DecisionStage::new(service(), RiskThresholds::default())
    }

    #[test]
    fn test_disposition_thresholds() {
        let stage = decision_stage();

        assert_eq!(stage.disposition(90, 1.0), Disposition::EscalateSar);
        assert_eq!(stage.disposition(85, 1.0), Disposition::EscalateSar);
        assert_eq!(stage.disposition(70, 1.0), Disposition::EscalateL3);
        assert_eq!(stage.disposition(31, 1.0), Disposition::EscalateL2);
        assert_eq!(stage.disposition(20, 0.65), Disposition::EscalateL2);
        assert_eq!(stage.disposition(20, 0.75), Disposition::EscalateL2);
        assert_eq!(stage.disposition(30, 0.80), Disposition::AutoClear);
    }

    #[test]
    fn test_human_review_rules() {
        let stage = decision_stage();

        assert!(stage.requires_human_review(Disposition::EscalateL3, 0.99));
        assert!(stage.requires_human_review(Disposition::AutoClear, 0.60));
        assert!(stage.requires_human_review(Disposition::AutoClear, 0.80));
        assert!(!stage.requires_human_review(Disposition::AutoClear, 0.90));
        assert!(stage.requires_human_review(Disposition::EscalateL2, 0.95));
    }

    #[test]
    fn test_confidence_blend() {
        let enrichment = EnrichmentResult {
            data_quality: DataQuality::new(1.0, 0.8),
            ..fixtures::sample_enrichment()
        };
        let risk = RiskAssessment::new(20, 0.85, "low");

        // 0.4 * 0.9 + 0.6 * 0.85 = 0.87
        assert!((DecisionStage::confidence(&enrichment, &risk) - 0.87).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_enrichment_stage() {
        let case = fixtures::sample_alert();
        let stage = EnrichmentStage::new(service());

        let output = stage.process(&StageInput::new(&case)).await.unwrap();

        assert!(output.sources_used.contains(&"OFAC".to_string()));
        assert!(output.sources_used.contains(&HISTORY_SOURCE.to_string()));
        assert_eq!(output.jurisdiction_risk.as_deref(), Some("LOW"));
        assert!(output.warnings.is_empty());
        assert!(output.data_quality.completeness >= 0.8);
    }

    #[tokio::test]
    async fn test_risk_stage_requires_enrichment() {
        let case = fixtures::sample_alert();
        let stage = RiskScoringStage::new(service());

        let err = stage.process(&StageInput::new(&case)).await.unwrap_err();
        assert_eq!(err, StageError::MissingInput(StageKind::Enrichment));
    }

    #[tokio::test]
    async fn test_near_certain_sanctions_hit_is_severe() {
        let case = Alert::new(AlertType::Sanctions, "C-9").with_match("OFAC", 0.98);
        let enrichment = fixtures::sample_enrichment();
        let input = StageInput {
            enrichment: Some(&enrichment),
            ..StageInput::new(&case)
        };

        let risk = RiskScoringStage::new(service()).process(&input).await.unwrap();

        assert!(risk.overall_risk_score >= 85);
        assert!(!risk.compliance_concerns.is_empty());
        assert!(risk.regulatory_citations.contains(&"31 CFR 1020.320".to_string()));
    }

    #[tokio::test]
    async fn test_analysis_failure_surfaces_as_stage_error() {
        let mut mock = MockAnalysisService::new();
        mock.expect_complete()
            .returning(|_| Err(AnalysisError::Transient("connection reset".into())));
        let case = fixtures::sample_alert();

        let err = EnrichmentStage::new(Arc::new(mock))
            .process(&StageInput::new(&case))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_decision_stage_low_risk_auto_clears() {
        let case = fixtures::sample_alert();
        let enrichment = EnrichmentResult {
            data_quality: DataQuality::new(1.0, 0.9),
            ..fixtures::sample_enrichment()
        };
        let risk = RiskAssessment::new(18, 0.9, "low");
        let narrative = fixtures::sample_narrative();
        let input = StageInput {
            case: &case,
            enrichment: Some(&enrichment),
            risk_assessment: Some(&risk),
            narrative: Some(&narrative),
        };

        let decision = decision_stage().process(&input).await.unwrap();

        assert_eq!(decision.disposition, Disposition::AutoClear);
        assert!(!decision.requires_human_review);
        assert!(decision.escalation_details.is_none());
        assert_eq!(decision.recommended_actions.len(), 1);
    }

    #[tokio::test]
    async fn test_decision_stage_high_risk_escalates() {
        let case = fixtures::sample_alert();
        let enrichment = fixtures::sample_enrichment();
        let risk = RiskAssessment::new(75, 0.85, "high");
        let narrative = fixtures::sample_narrative();
        let input = StageInput {
            case: &case,
            enrichment: Some(&enrichment),
            risk_assessment: Some(&risk),
            narrative: Some(&narrative),
        };

        let decision = decision_stage().process(&input).await.unwrap();

        assert_eq!(decision.disposition, Disposition::EscalateL3);
        assert!(decision.requires_human_review);
        let details = decision.escalation_details.unwrap();
        assert_eq!(details.suggested_reviewer.as_deref(), Some("Senior Compliance Officer"));
    }
}
