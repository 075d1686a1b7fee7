//! Typed outputs of the first three stages.

use serde::{Deserialize, Serialize};

/// Data quality measures reported by enrichment, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    /// How complete the gathered data is.
    pub completeness: f64,
    /// How reliable the sources are.
    pub reliability: f64,
}

impl DataQuality {
    /// Creates clamped data quality measures.
    #[must_use]
    pub fn new(completeness: f64, reliability: f64) -> Self {
        Self {
            completeness: completeness.clamp(0.0, 1.0),
            reliability: reliability.clamp(0.0, 1.0),
        }
    }

    /// Average of completeness and reliability.
    #[must_use]
    pub fn score(&self) -> f64 {
        (self.completeness + self.reliability) / 2.0
    }
}

impl Default for DataQuality {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Output of the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Free-text summary.
    pub summary: String,
    /// Sources consulted.
    #[serde(default)]
    pub sources_used: Vec<String>,
    /// Number of earlier alerts for the same customer.
    #[serde(default)]
    pub historical_alert_count: u32,
    /// Jurisdiction risk label (LOW, MEDIUM, HIGH).
    #[serde(default)]
    pub jurisdiction_risk: Option<String>,
    /// Data quality measures.
    pub data_quality: DataQuality,
    /// Non-fatal warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Risk level bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// 0 to 30.
    Low,
    /// 31 to 60.
    Medium,
    /// 61 to 80.
    High,
    /// 81 to 100.
    Severe,
}

impl RiskLevel {
    /// Buckets a 0..=100 score.
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=30 => Self::Low,
            31..=60 => Self::Medium,
            61..=80 => Self::High,
            _ => Self::Severe,
        }
    }

    /// Returns the SCREAMING_SNAKE_CASE label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Severe => "SEVERE",
        }
    }
}

/// Output of the risk assessment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Overall score in `0..=100`.
    pub overall_risk_score: u8,
    /// Bucketed level.
    pub risk_level: RiskLevel,
    /// Confidence in the assessment, `[0, 1]`.
    pub confidence: f64,
    /// Free-text narrative.
    pub narrative: String,
    /// Factors that lower risk.
    #[serde(default)]
    pub mitigating_factors: Vec<String>,
    /// Factors that raise risk.
    #[serde(default)]
    pub aggravating_factors: Vec<String>,
    /// Regulatory citations.
    #[serde(default)]
    pub regulatory_citations: Vec<String>,
    /// Compliance concerns raised.
    #[serde(default)]
    pub compliance_concerns: Vec<String>,
}

impl RiskAssessment {
    /// Creates an assessment with the level derived from the score.
    #[must_use]
    pub fn new(score: u8, confidence: f64, narrative: impl Into<String>) -> Self {
        let score = score.min(100);
        Self {
            overall_risk_score: score,
            risk_level: RiskLevel::from_score(score),
            confidence: confidence.clamp(0.0, 1.0),
            narrative: narrative.into(),
            mitigating_factors: Vec::new(),
            aggravating_factors: Vec::new(),
            regulatory_citations: Vec::new(),
            compliance_concerns: Vec::new(),
        }
    }
}

/// Output of the narrative context stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeContext {
    /// Short summary for reviewers.
    pub executive_summary: String,
    /// Longer narrative.
    #[serde(default)]
    pub narrative: String,
    /// Key findings.
    #[serde(default)]
    pub key_findings: Vec<String>,
    /// Confidence in the narrative, `[0, 1]`.
    pub confidence_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_buckets() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(31), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(81), RiskLevel::Severe);
        assert_eq!(RiskLevel::from_score(255), RiskLevel::Severe);
    }

    #[test]
    fn test_risk_assessment_clamps() {
        let assessment = RiskAssessment::new(140, 1.5, "x");
        assert_eq!(assessment.overall_risk_score, 100);
        assert_eq!(assessment.risk_level, RiskLevel::Severe);
        assert!((assessment.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_data_quality_score() {
        let quality = DataQuality::new(0.8, 0.6);
        assert!((quality.score() - 0.7).abs() < 1e-9);
    }
}
