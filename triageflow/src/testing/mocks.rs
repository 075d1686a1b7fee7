//! Stage doubles for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::StageError;
use crate::stages::{Stage, StageInput, StageOutput};

/// Returns scripted results in order, repeating the last one once the
/// script runs out.
#[derive(Debug)]
pub struct ScriptedStage<O: StageOutput> {
    script: Mutex<Vec<Result<O, StageError>>>,
    last: Mutex<Option<Result<O, StageError>>>,
    calls: AtomicUsize,
}

impl<O: StageOutput> ScriptedStage<O> {
    /// Creates a stage that plays back `script`.
    #[must_use]
    pub fn new(mut script: Vec<Result<O, StageError>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a stage that always returns `output`.
    #[must_use]
    pub fn always(output: O) -> Self {
        Self::new(vec![Ok(output)])
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<O: StageOutput> Stage for ScriptedStage<O> {
    type Output = O;

    async fn process(&self, _input: &StageInput<'_>) -> Result<O, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop();
        let mut last = self.last.lock();
        if let Some(result) = next {
            *last = Some(result);
        }
        last.clone()
            .unwrap_or_else(|| Err(StageError::fatal("scripted stage has an empty script")))
    }
}

/// Sleeps before returning its output. Used to trigger timeouts.
#[derive(Debug)]
pub struct SlowStage<O: StageOutput> {
    output: O,
    delay: Duration,
    calls: AtomicUsize,
}

impl<O: StageOutput> SlowStage<O> {
    /// Creates a stage that answers after `delay`.
    #[must_use]
    pub fn new(output: O, delay: Duration) -> Self {
        Self {
            output,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<O: StageOutput> Stage for SlowStage<O> {
    type Output = O;

    async fn process(&self, _input: &StageInput<'_>) -> Result<O, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Always fails with the same error.
#[derive(Debug)]
pub struct FailingStage<O> {
    error: StageError,
    calls: AtomicUsize,
    _output: std::marker::PhantomData<fn() -> O>,
}

impl<O: StageOutput> FailingStage<O> {
    /// Creates a stage failing with `error`.
    #[must_use]
    pub fn new(error: StageError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
            _output: std::marker::PhantomData,
        }
    }

    /// Fails with a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StageError::transient(message))
    }

    /// Fails with a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StageError::fatal(message))
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<O: StageOutput> Stage for FailingStage<O> {
    type Output = O;

    async fn process(&self, _input: &StageInput<'_>) -> Result<O, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Panics when the case id matches, succeeds otherwise.
#[derive(Debug)]
pub struct PanickingStage<O: StageOutput> {
    case_id: String,
    output: O,
}

impl<O: StageOutput> PanickingStage<O> {
    /// Creates a stage that panics only for `case_id`.
    #[must_use]
    pub fn for_case(case_id: impl Into<String>, output: O) -> Self {
        Self {
            case_id: case_id.into(),
            output,
        }
    }
}

#[async_trait]
impl<O: StageOutput> Stage for PanickingStage<O> {
    type Output = O;

    async fn process(&self, input: &StageInput<'_>) -> Result<O, StageError> {
        if input.case.alert_id == self.case_id {
            panic!("stage panicked on case {}", self.case_id);
        }
        Ok(self.output.clone())
    }
}

/// Records how many cases are inside the stage at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyProbe<O: StageOutput> {
    output: O,
    hold: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl<O: StageOutput> ConcurrencyProbe<O> {
    /// Creates a probe that holds each case for `hold`.
    #[must_use]
    pub fn new(output: O, hold: Duration) -> Self {
        Self {
            output,
            hold,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of concurrent cases observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Cases inside the stage right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<O: StageOutput> Stage for ConcurrencyProbe<O> {
    type Output = O;

    async fn process(&self, _input: &StageInput<'_>) -> Result<O, StageError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EnrichmentResult, RiskAssessment};
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_scripted_stage_repeats_last() {
        let stage = ScriptedStage::new(vec![
            Err(StageError::transient("busy")),
            Ok(RiskAssessment::new(10, 0.9, "fine")),
        ]);
        let alert = fixtures::sample_alert();
        let input = StageInput::new(&alert);

        assert!(stage.process(&input).await.is_err());
        assert!(stage.process(&input).await.is_ok());
        assert!(stage.process(&input).await.is_ok());
        assert_eq!(stage.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_stage_counts_calls() {
        let stage = FailingStage::<EnrichmentResult>::transient("down");
        let alert = fixtures::sample_alert();

        let err = stage.process(&StageInput::new(&alert)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(stage.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_probe_tracks_peak() {
        let probe = ConcurrencyProbe::new(fixtures::sample_enrichment(), Duration::from_millis(20));
        let alerts = fixtures::alert_batch(3);

        let runs = alerts.iter().map(|a| {
            let probe = probe.clone();
            async move { probe.process(&StageInput::new(a)).await }
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(probe.peak(), 3);
        assert_eq!(probe.active(), 0);
    }
}
