//! Core domain model types for triageflow.
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - Stage status and kind enums
//! - The alert case record
//! - Typed stage outputs and the terminal decision

mod alert;
mod decision;
mod outputs;
mod status;

pub use alert::{Alert, AlertPriority, AlertType};
pub use decision::{
    Decision, DecisionFactors, DecisionOutcome, Disposition, EscalationDetails,
    EscalationPriority, RecommendedAction,
};
pub use outputs::{DataQuality, EnrichmentResult, NarrativeContext, RiskAssessment, RiskLevel};
pub use status::{StageKind, StageStatus};
