//! Explicit configuration handed to every component at construction.
//!
//! Values load from JSON (missing fields fall back to defaults) and can be
//! overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `TRIAGEFLOW_MAX_CONCURRENT_CASES` | [`TriageConfig::max_concurrent_cases`] |
//! | `TRIAGEFLOW_STAGE_TIMEOUT_SECS` | every entry of [`TriageConfig::timeouts`] |
//! | `TRIAGEFLOW_MAX_RETRIES` | [`RetryConfig::max_attempts`] |

use crate::core::{Disposition, EscalationPriority, StageKind};
use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Environment variable overriding the batch concurrency limit.
pub const ENV_MAX_CONCURRENT_CASES: &str = "TRIAGEFLOW_MAX_CONCURRENT_CASES";
/// Environment variable overriding every stage timeout, in seconds.
pub const ENV_STAGE_TIMEOUT_SECS: &str = "TRIAGEFLOW_STAGE_TIMEOUT_SECS";
/// Environment variable overriding the retry attempt limit.
pub const ENV_MAX_RETRIES: &str = "TRIAGEFLOW_MAX_RETRIES";

/// Per-stage processing timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    /// Enrichment timeout.
    pub enrichment_ms: u64,
    /// Risk assessment timeout.
    pub risk_assessment_ms: u64,
    /// Narrative context timeout.
    pub narrative_context_ms: u64,
    /// Decision timeout.
    pub decision_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        let ms = |kind: StageKind| u64::try_from(kind.default_timeout().as_millis()).unwrap_or(u64::MAX);
        Self {
            enrichment_ms: ms(StageKind::Enrichment),
            risk_assessment_ms: ms(StageKind::RiskAssessment),
            narrative_context_ms: ms(StageKind::NarrativeContext),
            decision_ms: ms(StageKind::Decision),
        }
    }
}

impl StageTimeouts {
    /// Uses the same timeout for every stage.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        Self {
            enrichment_ms: ms,
            risk_assessment_ms: ms,
            narrative_context_ms: ms,
            decision_ms: ms,
        }
    }

    /// Returns the timeout for a stage.
    #[must_use]
    pub fn for_stage(&self, kind: StageKind) -> Duration {
        Duration::from_millis(match kind {
            StageKind::Enrichment => self.enrichment_ms,
            StageKind::RiskAssessment => self.risk_assessment_ms,
            StageKind::NarrativeContext => self.narrative_context_ms,
            StageKind::Decision => self.decision_ms,
        })
    }

    /// Sets the timeout for one stage.
    #[must_use]
    pub fn with_stage(mut self, kind: StageKind, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match kind {
            StageKind::Enrichment => self.enrichment_ms = ms,
            StageKind::RiskAssessment => self.risk_assessment_ms = ms,
            StageKind::NarrativeContext => self.narrative_context_ms = ms,
            StageKind::Decision => self.decision_ms = ms,
        }
        self
    }
}

/// Thresholds used by the decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Minimum confidence for an auto-clear without human review.
    pub auto_clear_confidence: f64,
    /// Below this confidence every decision needs human review.
    pub escalate_l2_confidence: f64,
    /// Highest risk score that may still be auto-cleared.
    pub auto_clear_max_risk: u8,
    /// Risk score at or above which the case goes to L3.
    pub high_risk: u8,
    /// Risk score at or above which the case goes to SAR review.
    pub severe_risk: u8,
    /// Completeness below which a case cannot be cleared.
    pub min_completeness: f64,
    /// Completeness required for an auto-clear.
    pub auto_clear_completeness: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            auto_clear_confidence: 0.85,
            escalate_l2_confidence: 0.70,
            auto_clear_max_risk: 30,
            high_risk: 70,
            severe_risk: 85,
            min_completeness: 0.70,
            auto_clear_completeness: 0.80,
        }
    }
}

/// How the coordinator builds the fail-safe decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyPolicy {
    /// Disposition of the emergency decision.
    pub disposition: Disposition,
    /// Escalation priority of the emergency decision.
    pub priority: EscalationPriority,
    /// Let a completed risk assessment raise the disposition above
    /// [`EmergencyPolicy::disposition`].
    pub upgrade_from_partial: bool,
}

impl Default for EmergencyPolicy {
    fn default() -> Self {
        Self {
            disposition: Disposition::EscalateL3,
            priority: EscalationPriority::Urgent,
            upgrade_from_partial: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Retry policy for retryable stage failures.
    pub retry: RetryConfig,
    /// Per-stage timeouts.
    pub timeouts: StageTimeouts,
    /// Upper bound on cases inside the pipeline at once.
    pub max_concurrent_cases: usize,
    /// Decision thresholds.
    pub thresholds: RiskThresholds,
    /// Emergency decision policy.
    pub emergency: EmergencyPolicy,
    /// Version stamped onto decisions.
    pub system_version: String,
    /// Component versions recorded in audit entries.
    pub component_versions: BTreeMap<String, String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let component_versions = ["models_version", "agents_version"]
            .into_iter()
            .map(|k| (k.to_string(), version.clone()))
            .collect();
        Self {
            retry: RetryConfig::default(),
            timeouts: StageTimeouts::default(),
            max_concurrent_cases: 10,
            thresholds: RiskThresholds::default(),
            emergency: EmergencyPolicy::default(),
            system_version: version,
            component_versions,
        }
    }
}

impl TriageConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::new("<document>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_CASES) {
            self.max_concurrent_cases = parse_env(ENV_MAX_CONCURRENT_CASES, &value)?;
        }
        if let Some(value) = lookup(ENV_STAGE_TIMEOUT_SECS) {
            let secs: u64 = parse_env(ENV_STAGE_TIMEOUT_SECS, &value)?;
            self.timeouts = StageTimeouts::uniform(Duration::from_secs(secs));
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_attempts = parse_env(ENV_MAX_RETRIES, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_cases == 0 {
            return Err(ConfigError::new("max_concurrent_cases", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::new("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::new(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        for kind in StageKind::ALL {
            if self.timeouts.for_stage(kind).is_zero() {
                return Err(ConfigError::new(
                    format!("timeouts.{kind}"),
                    "must be greater than zero",
                ));
            }
        }

        let t = &self.thresholds;
        for (field, value) in [
            ("thresholds.auto_clear_confidence", t.auto_clear_confidence),
            ("thresholds.escalate_l2_confidence", t.escalate_l2_confidence),
            ("thresholds.min_completeness", t.min_completeness),
            ("thresholds.auto_clear_completeness", t.auto_clear_completeness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::new(field, "must be within [0, 1]"));
            }
        }
        if !(t.auto_clear_max_risk < t.high_risk && t.high_risk <= t.severe_risk && t.severe_risk <= 100) {
            return Err(ConfigError::new(
                "thresholds",
                "risk thresholds must satisfy auto_clear_max_risk < high_risk <= severe_risk <= 100",
            ));
        }
        if !self.emergency.disposition.is_escalation() {
            return Err(ConfigError::new(
                "emergency.disposition",
                "the emergency decision must escalate",
            ));
        }
        if self.system_version.trim().is_empty() {
            return Err(ConfigError::new("system_version", "must not be empty"));
        }
        Ok(())
    }

    /// Component versions recorded by every audit entry, including the system version.
    #[must_use]
    pub fn versions(&self) -> BTreeMap<String, String> {
        let mut versions = self.component_versions.clone();
        versions.insert("system_version".to_string(), self.system_version.clone());
        versions
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the batch concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_cases(mut self, limit: usize) -> Self {
        self.max_concurrent_cases = limit;
        self
    }

    /// Sets the decision thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sets the emergency policy.
    #[must_use]
    pub fn with_emergency(mut self, emergency: EmergencyPolicy) -> Self {
        self.emergency = emergency;
        self
    }

    /// Sets the system version.
    #[must_use]
    pub fn with_system_version(mut self, version: impl Into<String>) -> Self {
        self.system_version = version.into();
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::new(key, format!("cannot parse {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TriageConfig::default();

        assert_eq!(config.max_concurrent_cases, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeouts.for_stage(StageKind::Enrichment), Duration::from_secs(30));
        assert_eq!(config.timeouts.for_stage(StageKind::Decision), Duration::from_secs(15));
        assert_eq!(config.emergency.disposition, Disposition::EscalateL3);
        assert!(!config.emergency.upgrade_from_partial);
        assert!(config.validate().is_ok());

        let versions = config.versions();
        assert_eq!(versions.len(), 3);
        assert!(versions.contains_key("system_version"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = TriageConfig::from_json_str(
            r#"{"max_concurrent_cases": 4, "retry": {"max_attempts": 2}, "timeouts": {"decision_ms": 500}}"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_cases, 4);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.timeouts.for_stage(StageKind::Decision), Duration::from_millis(500));
        assert_eq!(config.timeouts.for_stage(StageKind::Enrichment), Duration::from_secs(30));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = TriageConfig::from_json_str(r#"{"max_concurrent_cases": 0}"#).unwrap_err();
        assert_eq!(err.field, "max_concurrent_cases");

        let err = TriageConfig::from_json_str("not json").unwrap_err();
        assert_eq!(err.field, "<document>");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_MAX_CONCURRENT_CASES, "3"),
            (ENV_STAGE_TIMEOUT_SECS, "5"),
            (ENV_MAX_RETRIES, "6"),
        ]
        .into_iter()
        .collect();

        let config = TriageConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.max_concurrent_cases, 3);
        assert_eq!(config.retry.max_attempts, 6);
        for kind in StageKind::ALL {
            assert_eq!(config.timeouts.for_stage(kind), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_env_override_parse_error() {
        let err = TriageConfig::default()
            .with_overrides_from(|k| (k == ENV_MAX_RETRIES).then(|| "many".to_string()))
            .unwrap_err();
        assert_eq!(err.field, ENV_MAX_RETRIES);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let thresholds = RiskThresholds {
            high_risk: 90,
            severe_risk: 80,
            ..RiskThresholds::default()
        };
        assert!(TriageConfig::default().with_thresholds(thresholds).validate().is_err());

        let emergency = EmergencyPolicy {
            disposition: Disposition::AutoClear,
            ..EmergencyPolicy::default()
        };
        assert!(TriageConfig::default().with_emergency(emergency).validate().is_err());
    }
}
