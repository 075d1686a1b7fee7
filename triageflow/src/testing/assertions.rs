//! Test assertions for decisions.

use crate::core::{Decision, Disposition, EscalationPriority};

/// Asserts that risk and confidence are within their documented ranges.
pub fn assert_decision_in_range(decision: &Decision) {
    assert!(
        decision.risk_score <= 100,
        "Risk score out of range: {}",
        decision.risk_score
    );
    assert!(
        (0.0..=1.0).contains(&decision.confidence_score),
        "Confidence out of range: {}",
        decision.confidence_score
    );
}

/// Asserts that the decision is the default fail-safe decision.
pub fn assert_emergency(decision: &Decision) {
    assert!(
        decision.is_emergency(),
        "Expected an emergency decision, got outcome {:?}",
        decision.outcome
    );
    assert_eq!(decision.disposition, Disposition::EscalateL3);
    assert_eq!(decision.risk_score, 100);
    assert!(decision.confidence_score.abs() < f64::EPSILON);
    assert!(decision.requires_human_review);
    assert_eq!(
        decision.escalation_details.as_ref().map(|d| d.priority),
        Some(EscalationPriority::Urgent),
        "Emergency decisions escalate with URGENT priority"
    );
}

/// Asserts that the attached audit timeline is non-decreasing in time.
pub fn assert_timeline_ordered(decision: &Decision) {
    for pair in decision.audit_trail.windows(2) {
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "Timeline out of order: {} ({}) after {} ({})",
            pair[1].action,
            pair[1].timestamp,
            pair[0].action,
            pair[0].timestamp
        );
    }
}
