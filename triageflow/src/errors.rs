//! Error types for the triageflow pipeline.
//!
//! The taxonomy separates what a stage author raises ([`StageError`]) from what
//! the execution wrapper reports upward ([`StageFailure`]). Only the latter is
//! seen by the coordinator, which converts every failure into an emergency
//! decision.

use crate::core::StageKind;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for triageflow operations.
#[derive(Debug, Error)]
pub enum TriageError {
    /// A stage failed after classification by the execution wrapper.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// The audit trail rejected an operation or failed verification.
    #[error("{0}")]
    Audit(#[from] AuditError),

    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The external analysis service failed.
    #[error("{0}")]
    Analysis(#[from] AnalysisError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure classification produced by the stage execution wrapper.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageFailure {
    /// A timeout or transient failure. Retried with backoff.
    #[error("Stage {stage} retryable failure: {message}")]
    Retryable {
        /// The stage that failed.
        stage: StageKind,
        /// Failure description.
        message: String,
    },

    /// A failure that must not be retried. Triggers the emergency path.
    #[error("Stage {stage} critical failure after {attempts} attempt(s): {message}")]
    Critical {
        /// The stage that failed.
        stage: StageKind,
        /// Failure description.
        message: String,
        /// Number of attempts made before giving up.
        attempts: usize,
    },
}

impl StageFailure {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Retryable {
            stage,
            message: message.into(),
        }
    }

    /// Creates a critical failure.
    #[must_use]
    pub fn critical(stage: StageKind, message: impl Into<String>, attempts: usize) -> Self {
        Self::Critical {
            stage,
            message: message.into(),
            attempts,
        }
    }

    /// Converts a retryable failure into a critical one once retries are exhausted.
    #[must_use]
    pub fn escalate(self, attempts: usize) -> Self {
        match self {
            Self::Retryable { stage, message } => Self::Critical {
                stage,
                message,
                attempts,
            },
            critical @ Self::Critical { .. } => critical,
        }
    }

    /// Returns the stage that failed.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Retryable { stage, .. } | Self::Critical { stage, .. } => *stage,
        }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message, .. } | Self::Critical { message, .. } => message,
        }
    }

    /// Returns true if the failure may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Retryable { stage, message } => {
                map.insert("type".to_string(), serde_json::json!("Retryable"));
                map.insert("stage".to_string(), serde_json::json!(stage.as_str()));
                map.insert("message".to_string(), serde_json::json!(message));
            }
            Self::Critical {
                stage,
                message,
                attempts,
            } => {
                map.insert("type".to_string(), serde_json::json!("Critical"));
                map.insert("stage".to_string(), serde_json::json!(stage.as_str()));
                map.insert("message".to_string(), serde_json::json!(message));
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
        }
        map
    }
}

/// Errors raised by stage domain logic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// A transient problem (network, rate limit) worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// A problem that will not go away on retry (malformed output, bad input).
    #[error("{0}")]
    Fatal(String),

    /// A prior stage output the stage depends on was not supplied.
    #[error("missing input from stage {0}")]
    MissingInput(StageKind),
}

impl StageError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if this error should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        Self::Fatal(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fatal(format!("malformed stage payload: {err}"))
    }
}

impl From<AnalysisError> for StageError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Transient(message) => Self::Transient(message),
            AnalysisError::Fatal(message) => Self::Fatal(message),
        }
    }
}

/// Errors returned by the external analysis service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// Network trouble, timeouts, server-side errors.
    #[error("Analysis call failed transiently: {0}")]
    Transient(String),

    /// Malformed request or rejected input.
    #[error("Analysis call rejected: {0}")]
    Fatal(String),
}

/// Errors related to the audit trail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    /// An entry's `previous_hash` does not match the preceding entry.
    #[error("Broken audit chain at entry {position}")]
    BrokenChain {
        /// Sequence number of the offending entry.
        position: u64,
    },

    /// An entry's stored hash does not match its recomputed hash.
    #[error("Audit hash mismatch at entry {position}: {field}")]
    HashMismatch {
        /// Sequence number of the offending entry.
        position: u64,
        /// Which hash did not match.
        field: String,
    },

    /// No entry exists with the given sequence number.
    #[error("Unknown audit entry: {0}")]
    UnknownEntry(u64),

    /// The payload could not be canonicalized.
    #[error("Audit serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when configuration is invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid configuration: {field}: {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Extracts the message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_retryable_to_critical() {
        let failure = StageFailure::retryable(StageKind::RiskAssessment, "timed out");
        assert!(failure.is_retryable());

        let escalated = failure.escalate(3);
        assert!(!escalated.is_retryable());
        assert_eq!(escalated.stage(), StageKind::RiskAssessment);
        assert!(escalated.to_string().contains("after 3 attempt(s)"));
        assert!(escalated.to_string().contains("timed out"));
    }

    #[test]
    fn test_escalate_keeps_critical() {
        let failure = StageFailure::critical(StageKind::Decision, "bad output", 1);
        assert_eq!(failure.clone().escalate(5), failure);
    }

    #[test]
    fn test_stage_failure_to_dict() {
        let failure = StageFailure::critical(StageKind::Enrichment, "boom", 2);
        let dict = failure.to_dict();

        assert_eq!(dict.get("type").unwrap(), "Critical");
        assert_eq!(dict.get("stage").unwrap(), "enrichment");
        assert_eq!(dict.get("attempts").unwrap(), 2);
    }

    #[test]
    fn test_analysis_error_maps_to_stage_error() {
        let transient: StageError = AnalysisError::Transient("503".into()).into();
        assert!(transient.is_transient());

        let fatal: StageError = AnalysisError::Fatal("400".into()).into();
        assert!(!fatal.is_transient());
    }

    #[test]
    fn test_anyhow_maps_to_fatal() {
        let err: StageError = anyhow::anyhow!("unparseable response").into();
        assert_eq!(err, StageError::Fatal("unparseable response".to_string()));
    }

    #[test]
    fn test_triage_error_from_config() {
        let err: TriageError = ConfigError::new("max_concurrent_cases", "must be >= 1").into();
        assert!(err.to_string().contains("max_concurrent_cases"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
