//! Fixtures for alerts and stage outputs.

use crate::core::{
    Alert, AlertPriority, AlertType, DataQuality, Decision, Disposition, EnrichmentResult,
    NarrativeContext, RiskAssessment,
};
use crate::stages::{FnStage, Stage, StageInput, StageSet};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use super::ScriptedStage;

/// A low-risk sanctions alert with complete data.
#[must_use]
pub fn sample_alert() -> Alert {
    let mut alert = Alert::new(AlertType::Sanctions, "CUST-0001")
        .with_id("alert-0001")
        .with_priority(AlertPriority::Medium)
        .with_match("OFAC", 0.45)
        .with_jurisdiction("US")
        .with_regulation("BSA")
        .with_payload(json!({"customer_name": "Jane Example", "historical_alert_count": 0}));
    alert.created_at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).single().unwrap_or_else(Utc::now);
    alert
}

/// `n` distinct alerts with ids `alert-0000`, `alert-0001`, ...
#[must_use]
pub fn alert_batch(n: usize) -> Vec<Alert> {
    (0..n)
        .map(|i| sample_alert().with_id(format!("alert-{i:04}")))
        .collect()
}

/// Enrichment output with good data quality.
#[must_use]
pub fn sample_enrichment() -> EnrichmentResult {
    EnrichmentResult {
        summary: "Long-standing retail customer, no adverse history.".to_string(),
        sources_used: vec!["OFAC".to_string(), "internal_alert_history".to_string()],
        historical_alert_count: 0,
        jurisdiction_risk: Some("LOW".to_string()),
        data_quality: DataQuality::new(0.9, 0.9),
        warnings: Vec::new(),
    }
}

/// Risk assessment with the given score and 0.85 confidence.
#[must_use]
pub fn sample_risk(score: u8) -> RiskAssessment {
    RiskAssessment::new(score, 0.85, format!("Risk score {score}"))
}

/// Narrative output.
#[must_use]
pub fn sample_narrative() -> NarrativeContext {
    NarrativeContext {
        executive_summary: "Weak partial name match against OFAC.".to_string(),
        narrative: "The match is on a common surname only.".to_string(),
        key_findings: vec!["Partial name match".to_string()],
        confidence_score: 0.85,
    }
}

/// Decision output for a case.
#[must_use]
pub fn sample_decision(case_id: &str, disposition: Disposition, risk_score: u8) -> Decision {
    Decision::new(case_id, disposition, risk_score, 0.87, "Scripted decision")
}

/// Decision stage that auto-clears whatever case it is given.
#[must_use]
pub fn auto_clear_stage() -> Arc<dyn Stage<Output = Decision>> {
    Arc::new(FnStage::new(|input: &StageInput<'_>| {
        Ok(sample_decision(&input.case.alert_id, Disposition::AutoClear, 20)
            .with_human_review(false))
    }))
}

/// Four scripted stages that always succeed with an auto-clear.
#[must_use]
pub fn scripted_stage_set() -> StageSet {
    StageSet::new(
        Arc::new(ScriptedStage::always(sample_enrichment())),
        Arc::new(ScriptedStage::always(sample_risk(20))),
        Arc::new(ScriptedStage::always(sample_narrative())),
        auto_clear_stage(),
    )
}
