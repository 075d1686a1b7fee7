//! Testing utilities for triageflow pipelines.
//!
//! This module provides:
//! - Fixtures for alerts and stage outputs
//! - Stage doubles (scripted, slow, failing, panicking, concurrency probe)
//! - Assertions over decisions

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_decision_in_range, assert_emergency, assert_timeline_ordered};
pub use fixtures::{alert_batch, sample_alert};
pub use mocks::{ConcurrencyProbe, FailingStage, PanickingStage, ScriptedStage, SlowStage};
