//! The terminal decision produced for every case.

use crate::audit::TimelineEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final disposition, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Close automatically.
    AutoClear,
    /// Level 2 analyst review.
    EscalateL2,
    /// Level 3 / senior analyst review.
    EscalateL3,
    /// Suspicious activity report consideration.
    EscalateSar,
    /// Immediate transaction block.
    BlockTransaction,
}

impl Disposition {
    /// Returns the SCREAMING_SNAKE_CASE label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AutoClear => "AUTO_CLEAR",
            Self::EscalateL2 => "ESCALATE_L2",
            Self::EscalateL3 => "ESCALATE_L3",
            Self::EscalateSar => "ESCALATE_SAR",
            Self::BlockTransaction => "BLOCK_TRANSACTION",
        }
    }

    /// Returns true for every disposition other than auto-clear.
    #[must_use]
    pub fn is_escalation(&self) -> bool {
        !matches!(self, Self::AutoClear)
    }

    /// Escalation priority that matches this disposition.
    #[must_use]
    pub fn escalation_priority(&self) -> EscalationPriority {
        match self {
            Self::AutoClear => EscalationPriority::Low,
            Self::EscalateL2 => EscalationPriority::Medium,
            Self::EscalateL3 => EscalationPriority::High,
            Self::EscalateSar | Self::BlockTransaction => EscalationPriority::Urgent,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationPriority {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Highest urgency.
    Urgent,
}

/// Details attached to decisions that need a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDetails {
    /// Why the case was escalated.
    pub reason: String,
    /// How urgent the review is.
    pub priority: EscalationPriority,
    /// Suggested reviewer role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_reviewer: Option<String>,
}

impl EscalationDetails {
    /// Creates escalation details.
    #[must_use]
    pub fn new(reason: impl Into<String>, priority: EscalationPriority) -> Self {
        Self {
            reason: reason.into(),
            priority,
            suggested_reviewer: None,
        }
    }

    /// Sets the suggested reviewer.
    #[must_use]
    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.suggested_reviewer = Some(reviewer.into());
        self
    }
}

/// A follow-up action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedAction {
    /// What to do.
    pub action: String,
    /// 1 is most important.
    pub priority: u8,
    /// Why.
    pub rationale: String,
}

impl RecommendedAction {
    /// Creates a recommended action.
    #[must_use]
    pub fn new(action: impl Into<String>, priority: u8, rationale: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            priority,
            rationale: rationale.into(),
        }
    }
}

/// Factors that contributed to the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionFactors {
    /// Main drivers.
    #[serde(default)]
    pub primary: Vec<String>,
    /// Supporting evidence.
    #[serde(default)]
    pub supporting: Vec<String>,
    /// Evidence pointing the other way.
    #[serde(default)]
    pub contrary: Vec<String>,
    /// Known unknowns.
    #[serde(default)]
    pub uncertainty: Vec<String>,
}

/// Which terminal path produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// All four stages completed.
    Success,
    /// A stage failed and the decision was synthesized.
    Emergency,
}

/// Terminal output for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The case this decision belongs to.
    pub case_id: String,
    /// Final disposition.
    pub disposition: Disposition,
    /// Risk score in `0..=100`.
    pub risk_score: u8,
    /// Confidence in `[0, 1]`.
    pub confidence_score: f64,
    /// Free-text rationale.
    pub rationale: String,
    /// Whether a human must review the case.
    pub requires_human_review: bool,
    /// Present when the case is escalated to a human.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_details: Option<EscalationDetails>,
    /// Follow-up actions.
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    /// Contributing factors.
    #[serde(default)]
    pub decision_factors: DecisionFactors,
    /// Regulatory citations.
    #[serde(default)]
    pub regulatory_citations: Vec<String>,
    /// Audit timeline, attached by the coordinator.
    #[serde(default)]
    pub audit_trail: Vec<TimelineEntry>,
    /// Total pipeline latency, stamped by the coordinator.
    pub processing_time_ms: u64,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Version of the system that produced the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_version: Option<String>,
    /// Terminal path.
    pub outcome: DecisionOutcome,
}

impl Decision {
    /// Creates a successful decision. Score and confidence are clamped into range.
    #[must_use]
    pub fn new(
        case_id: impl Into<String>,
        disposition: Disposition,
        risk_score: u8,
        confidence_score: f64,
        rationale: impl Into<String>,
    ) -> Self {
        let confidence_score = if confidence_score.is_nan() {
            0.0
        } else {
            confidence_score.clamp(0.0, 1.0)
        };
        Self {
            case_id: case_id.into(),
            disposition,
            risk_score: risk_score.min(100),
            confidence_score,
            rationale: rationale.into(),
            requires_human_review: disposition.is_escalation(),
            escalation_details: None,
            recommended_actions: Vec::new(),
            decision_factors: DecisionFactors::default(),
            regulatory_citations: Vec::new(),
            audit_trail: Vec::new(),
            processing_time_ms: 0,
            timestamp: Utc::now(),
            system_version: None,
            outcome: DecisionOutcome::Success,
        }
    }

    /// Overrides the human review flag.
    #[must_use]
    pub fn with_human_review(mut self, required: bool) -> Self {
        self.requires_human_review = required;
        self
    }

    /// Attaches escalation details and marks the decision for human review.
    #[must_use]
    pub fn with_escalation(mut self, details: EscalationDetails) -> Self {
        self.requires_human_review = true;
        self.escalation_details = Some(details);
        self
    }

    /// Adds a recommended action.
    #[must_use]
    pub fn with_action(mut self, action: RecommendedAction) -> Self {
        self.recommended_actions.push(action);
        self
    }

    /// Sets the decision factors.
    #[must_use]
    pub fn with_factors(mut self, factors: DecisionFactors) -> Self {
        self.decision_factors = factors;
        self
    }

    /// Sets the regulatory citations.
    #[must_use]
    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.regulatory_citations = citations;
        self
    }

    /// Marks the decision as synthesized by the emergency path.
    #[must_use]
    pub(crate) fn into_emergency(mut self) -> Self {
        self.outcome = DecisionOutcome::Emergency;
        self
    }

    /// Stamps latency, audit timeline and system version.
    pub(crate) fn finalize(
        &mut self,
        processing_time_ms: u64,
        audit_trail: Vec<TimelineEntry>,
        system_version: impl Into<String>,
    ) {
        self.processing_time_ms = processing_time_ms;
        self.audit_trail = audit_trail;
        self.system_version = Some(system_version.into());
    }

    /// Returns true if this decision came from the emergency path.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.outcome == DecisionOutcome::Emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_severity_order() {
        assert!(Disposition::AutoClear < Disposition::EscalateL2);
        assert!(Disposition::EscalateL2 < Disposition::EscalateL3);
        assert!(Disposition::EscalateL3 < Disposition::EscalateSar);
        assert!(Disposition::EscalateSar < Disposition::BlockTransaction);
    }

    #[test]
    fn test_decision_clamps_ranges() {
        let decision = Decision::new("c-1", Disposition::AutoClear, 250, 3.0, "ok");
        assert_eq!(decision.risk_score, 100);
        assert!((decision.confidence_score - 1.0).abs() < f64::EPSILON);

        let decision = Decision::new("c-1", Disposition::AutoClear, 10, f64::NAN, "ok");
        assert!(decision.confidence_score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_escalation_forces_review() {
        let decision = Decision::new("c-1", Disposition::AutoClear, 10, 0.9, "ok")
            .with_human_review(false)
            .with_escalation(EscalationDetails::new("odd pattern", EscalationPriority::Low));

        assert!(decision.requires_human_review);
        assert!(decision.escalation_details.is_some());
    }

    #[test]
    fn test_finalize_stamps_metadata() {
        let mut decision = Decision::new("c-1", Disposition::EscalateL2, 45, 0.7, "review");
        decision.finalize(1234, Vec::new(), "0.1.0");

        assert_eq!(decision.processing_time_ms, 1234);
        assert_eq!(decision.system_version.as_deref(), Some("0.1.0"));
        assert!(!decision.is_emergency());
    }

    #[test]
    fn test_disposition_serialize() {
        let json = serde_json::to_string(&Disposition::EscalateSar).unwrap();
        assert_eq!(json, r#""ESCALATE_SAR""#);
        assert_eq!(Disposition::EscalateSar.to_string(), "ESCALATE_SAR");
    }
}
