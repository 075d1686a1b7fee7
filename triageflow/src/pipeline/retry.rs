//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Only failures that classify themselves as retryable are retried; anything
//! else is returned immediately together with the attempt count.

use crate::errors::StageFailure;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 10000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Returns true if the operation may be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for StageFailure {
    fn is_retryable(&self) -> bool {
        StageFailure::is_retryable(self)
    }
}

/// State tracking for retry operations.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Number of failed attempts so far.
    pub attempt: usize,
    /// Previous delays for decorrelated jitter.
    previous_delays: HashMap<String, u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and returns true if more attempts remain.
    pub fn increment(&mut self, config: &RetryConfig) -> bool {
        self.attempt += 1;
        !self.is_exhausted(config)
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&mut self, key: &str, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.attempt.saturating_sub(1);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(retry).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(retry as u64 + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delays.get(key).copied().unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let new_delay = if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delays.insert(key.to_string(), new_delay);
                new_delay
            }
        };

        Duration::from_millis(jittered)
    }

    /// Returns true if retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempt >= config.max_attempts.max(1)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Records a failure and decides whether to try again.
#[must_use]
pub fn should_retry(
    state: &mut RetryState,
    config: &RetryConfig,
    key: &str,
    retryable: bool,
) -> RetryDecision {
    if !retryable {
        state.attempt += 1;
        return RetryDecision::NotRetryable;
    }
    if !state.increment(config) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(state.calculate_delay(key, config))
}

/// Final failure of [`with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// The last error seen.
    pub error: E,
    /// How many attempts were made.
    pub attempts: usize,
    /// True if the error was retryable but attempts ran out.
    pub exhausted: bool,
}

/// Executes an operation with retry logic.
///
/// `on_retry` is called with the upcoming attempt number, the delay and the
/// error, before sleeping.
pub async fn with_retry<T, E, F, Fut, R>(
    config: &RetryConfig,
    key: &str,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
    R: FnMut(usize, Duration, &E),
{
    let mut state = RetryState::new();

    loop {
        match operation(state.attempt + 1).await {
            Ok(result) => return Ok(result),
            Err(e) => match should_retry(&mut state, config, key, e.is_retryable()) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        key,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after error"
                    );
                    on_retry(state.attempt + 1, delay, &e);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(RetryFailure {
                        error: e,
                        attempts: state.attempt,
                        exhausted: true,
                    });
                }
                RetryDecision::NotRetryable => {
                    return Err(RetryFailure {
                        error: e,
                        attempts: state.attempt,
                        exhausted: false,
                    });
                }
            },
        }
    }
}
