//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One of the four fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Gathers historical, media and corporate context for the case.
    Enrichment,
    /// Produces the numeric risk assessment.
    RiskAssessment,
    /// Builds the narrative context for reviewers.
    NarrativeContext,
    /// Produces the disposition decision.
    Decision,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [
        Self::Enrichment,
        Self::RiskAssessment,
        Self::NarrativeContext,
        Self::Decision,
    ];

    /// Returns the stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enrichment => "enrichment",
            Self::RiskAssessment => "risk_assessment",
            Self::NarrativeContext => "narrative_context",
            Self::Decision => "decision",
        }
    }

    /// Returns the zero-based position in the pipeline.
    #[must_use]
    pub const fn position(&self) -> usize {
        match self {
            Self::Enrichment => 0,
            Self::RiskAssessment => 1,
            Self::NarrativeContext => 2,
            Self::Decision => 3,
        }
    }

    /// Returns the stages that must complete before this one.
    #[must_use]
    pub fn predecessors(&self) -> &'static [Self] {
        &Self::ALL[..self.position()]
    }

    /// Default processing timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        match self {
            Self::Enrichment => Duration::from_secs(30),
            Self::RiskAssessment => Duration::from_secs(20),
            Self::NarrativeContext => Duration::from_secs(25),
            Self::Decision => Duration::from_secs(15),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution status of a stage for one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not run for this case.
    #[default]
    Idle,
    /// Stage is currently running.
    Running,
    /// Stage is held back, e.g. waiting out a retry backoff.
    Blocked,
    /// Stage failed.
    Error,
    /// Stage completed successfully.
    Completed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Blocked => write!(f, "blocked"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true while an invocation is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Enrichment.to_string(), "enrichment");
        assert_eq!(StageKind::RiskAssessment.to_string(), "risk_assessment");
        assert_eq!(StageKind::NarrativeContext.to_string(), "narrative_context");
        assert_eq!(StageKind::Decision.to_string(), "decision");
    }

    #[test]
    fn test_stage_kind_order() {
        let mut kinds = vec![
            StageKind::Decision,
            StageKind::Enrichment,
            StageKind::NarrativeContext,
            StageKind::RiskAssessment,
        ];
        kinds.sort();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }

    #[test]
    fn test_predecessors() {
        assert!(StageKind::Enrichment.predecessors().is_empty());
        assert_eq!(
            StageKind::NarrativeContext.predecessors(),
            &[StageKind::Enrichment, StageKind::RiskAssessment]
        );
        assert_eq!(StageKind::Decision.predecessors().len(), 3);
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Error.is_terminal());
        assert!(!StageStatus::Idle.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(StageStatus::Blocked.is_active());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Blocked).unwrap();
        assert_eq!(json, r#""blocked""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Blocked);
    }

    #[test]
    fn test_stage_kind_serialize() {
        let json = serde_json::to_string(&StageKind::NarrativeContext).unwrap();
        assert_eq!(json, r#""narrative_context""#);
    }
}
