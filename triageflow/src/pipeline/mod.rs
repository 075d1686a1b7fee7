//! Case orchestration.
//!
//! This module provides:
//! - The per-case coordinator and its fail-safe emergency path
//! - Bounded concurrent batch processing
//! - Retry policy and backoff

mod batch;
mod coordinator;
mod retry;
mod state;

pub use batch::{AdmissionGate, AdmissionPermit, BatchRunner, BatchSummary, CaseOutcome};
pub use coordinator::{CaseRecord, PipelineCoordinator};
pub use retry::{
    BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryFailure, RetryState,
    Retryable, should_retry, with_retry,
};
pub use state::CaseState;
