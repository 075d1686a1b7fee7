//! # Triageflow
//!
//! A fail-safe staged triage pipeline for anti-money-laundering alerts.
//!
//! Every case passes through four fixed stages:
//!
//! - **Enrichment**: customer, jurisdiction and history context
//! - **Risk assessment**: a 0-100 risk score with confidence
//! - **Narrative context**: the reviewer-facing explanation
//! - **Decision**: disposition, escalation and recommended actions
//!
//! Each stage runs under a timeout and retry policy. Any failure ends in an
//! emergency escalation, so every case yields a decision. Every stage output is
//! recorded in a hash-chained audit trail that can be exported for regulators.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use triageflow::prelude::*;
//!
//! let system = TriageSystem::with_reference_stages(
//!     TriageConfig::default(),
//!     Arc::new(StaticAnalysisService::new()),
//! )?;
//!
//! let decision = system.process_case(&alert).await;
//! let outcomes = system.process_batch(alerts).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod analysis;
pub mod audit;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod system;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::{AnalysisRequest, AnalysisService, StaticAnalysisService};
    pub use crate::audit::{AuditReport, AuditTrail, SealedAuditTrail, TimelineEntry};
    pub use crate::config::{EmergencyPolicy, RiskThresholds, StageTimeouts, TriageConfig};
    pub use crate::core::{
        Alert, AlertPriority, AlertType, Decision, Disposition, EnrichmentResult,
        EscalationPriority, NarrativeContext, RiskAssessment, StageKind, StageStatus,
    };
    pub use crate::errors::{StageError, StageFailure, TriageError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{CaseOutcome, PipelineCoordinator, RetryConfig};
    pub use crate::stages::{Stage, StageInput, StageOutput, StageSet};
    pub use crate::system::{SystemStatus, TriageSystem};
    pub use std::sync::Arc;
}
