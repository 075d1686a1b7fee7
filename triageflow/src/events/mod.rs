//! Lifecycle event sinks.
//!
//! Stage runners and the coordinator report lifecycle transitions to an
//! [`EventSink`]. Emission never fails and never blocks the pipeline.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A stage attempt began.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage attempt failed and will be retried.
    pub const STAGE_RETRYING: &str = "stage.retrying";
    /// A stage completed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed for good.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A case reached a successful decision.
    pub const CASE_DECIDED: &str = "case.decided";
    /// A case fell back to the emergency decision.
    pub const CASE_EMERGENCY: &str = "case.emergency";
    /// A batch finished.
    pub const BATCH_COMPLETED: &str = "batch.completed";
}
