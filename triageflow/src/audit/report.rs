//! Regulator-facing export of a sealed trail.

use super::trail::{AuditSummary, ComplianceCheck, SealedAuditTrail, TimelineEntry};
use crate::errors::AuditError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything an examiner needs to reconstruct how a case was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// The case.
    pub case_id: String,
    /// Summary statistics.
    pub summary: AuditSummary,
    /// All entries, time-ordered.
    pub timeline: Vec<TimelineEntry>,
    /// Risk and decision entries, time-ordered.
    pub decision_chain: Vec<TimelineEntry>,
    /// Distinct data sources.
    pub data_sources: Vec<String>,
    /// Compliance checks performed.
    pub regulatory_compliance: Vec<ComplianceCheck>,
    /// Component versions.
    pub system_metadata: BTreeMap<String, String>,
    /// Hash of the last entry in the chain.
    pub chain_tip: String,
}

impl SealedAuditTrail {
    /// Builds the report for this trail.
    #[must_use]
    pub fn report(&self) -> AuditReport {
        AuditReport {
            case_id: self.case_id().to_string(),
            summary: self.summary(),
            timeline: self.timeline(),
            decision_chain: self.decision_chain(),
            data_sources: self.data_sources(),
            regulatory_compliance: self.compliance_checks(),
            system_metadata: self.system_metadata(),
            chain_tip: self.tip().to_string(),
        }
    }

    /// Serializes the report as pretty JSON.
    ///
    /// The output depends only on the recorded entries, so two trails with
    /// identical entries export byte-identical documents.
    pub fn export_for_regulator(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }
}
