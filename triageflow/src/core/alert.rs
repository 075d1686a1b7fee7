//! The case record flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of screening alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Sanctions list match.
    Sanctions,
    /// Politically exposed person.
    Pep,
    /// Adverse media hit.
    AdverseMedia,
    /// Transaction monitoring.
    Transaction,
    /// Periodic KYC review.
    KycOngoing,
}

/// Priority assigned by the upstream screening engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    /// Low priority.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
    /// Critical priority.
    Critical,
}

/// A compliance alert.
///
/// The pipeline core only relies on [`Alert::alert_id`] and
/// [`Alert::created_at`]; everything else is consumed by stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable unique identifier.
    pub alert_id: String,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
    /// Alert type.
    pub alert_type: AlertType,
    /// Alert priority.
    #[serde(default)]
    pub priority: AlertPriority,
    /// Customer the alert concerns.
    pub customer_id: String,
    /// Screening match scores in `[0, 1]`.
    #[serde(default)]
    pub match_scores: Vec<f64>,
    /// Screening data sources (e.g. "OFAC").
    #[serde(default)]
    pub data_sources: Vec<String>,
    /// Jurisdiction of the reporting institution.
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Applicable regulations (e.g. "BSA").
    #[serde(default)]
    pub applicable_regulations: Vec<String>,
    /// Opaque upstream payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Alert {
    /// Creates a new alert with a generated id.
    #[must_use]
    pub fn new(alert_type: AlertType, customer_id: impl Into<String>) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            alert_type,
            priority: AlertPriority::default(),
            customer_id: customer_id.into(),
            match_scores: Vec::new(),
            data_sources: Vec::new(),
            jurisdiction: None,
            applicable_regulations: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the alert id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.alert_id = id.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: AlertPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a screening match.
    #[must_use]
    pub fn with_match(mut self, source: impl Into<String>, score: f64) -> Self {
        let source = source.into();
        if !self.data_sources.contains(&source) {
            self.data_sources.push(source);
        }
        self.match_scores.push(score.clamp(0.0, 1.0));
        self
    }

    /// Sets the jurisdiction.
    #[must_use]
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// Adds an applicable regulation.
    #[must_use]
    pub fn with_regulation(mut self, regulation: impl Into<String>) -> Self {
        self.applicable_regulations.push(regulation.into());
        self
    }

    /// Sets the opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns the highest screening match score, or 0 without matches.
    #[must_use]
    pub fn max_match_score(&self) -> f64 {
        self.match_scores.iter().copied().fold(0.0, f64::max)
    }
}
