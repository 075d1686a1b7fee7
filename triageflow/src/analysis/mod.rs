//! Boundary to the external analysis (LLM) capability.
//!
//! Stages hand a structured [`AnalysisRequest`] to an [`AnalysisService`] and
//! get free text back. The service decides whether a failure is worth
//! retrying; the stage runner acts on that classification.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpAnalysisService;

use crate::core::StageKind;
use crate::errors::AnalysisError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

/// A structured prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Stage issuing the request.
    pub stage: StageKind,
    /// Case under review.
    pub case_id: String,
    /// Role instructions.
    pub system_prompt: String,
    /// The question.
    pub prompt: String,
    /// Structured data the prompt refers to.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl AnalysisRequest {
    /// Creates a request without context data.
    #[must_use]
    pub fn new(stage: StageKind, case_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            stage,
            case_id: case_id.into(),
            system_prompt: String::new(),
            prompt: prompt.into(),
            context: serde_json::Value::Null,
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Sets the context data.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Given a structured prompt, returns text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisService: Send + Sync + Debug {
    /// Completes a request.
    async fn complete(&self, request: &AnalysisRequest) -> Result<String, AnalysisError>;
}

/// Returns canned text per stage. Never fails.
#[derive(Debug, Default)]
pub struct StaticAnalysisService {
    responses: HashMap<StageKind, String>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl StaticAnalysisService {
    /// Creates a service that echoes a generic summary for every stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response for one stage.
    #[must_use]
    pub fn with_response(mut self, stage: StageKind, text: impl Into<String>) -> Self {
        self.responses.insert(stage, text.into());
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AnalysisService for StaticAnalysisService {
    async fn complete(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        self.requests.lock().push(request.clone());
        Ok(self.responses.get(&request.stage).cloned().unwrap_or_else(|| {
            format!(
                "Automated {} analysis for case {}.",
                request.stage, request.case_id
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_service_responses() {
        let service = StaticAnalysisService::new()
            .with_response(StageKind::RiskAssessment, "Elevated exposure.");

        let risk = AnalysisRequest::new(StageKind::RiskAssessment, "a-1", "assess");
        let other = AnalysisRequest::new(StageKind::Enrichment, "a-1", "enrich");

        assert_eq!(service.complete(&risk).await.unwrap(), "Elevated exposure.");
        assert_eq!(
            service.complete(&other).await.unwrap(),
            "Automated enrichment analysis for case a-1."
        );
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_service_transient_error() {
        let mut mock = MockAnalysisService::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(AnalysisError::Transient("429 Too Many Requests".into())));

        let request = AnalysisRequest::new(StageKind::Decision, "a-2", "decide");
        let err = mock.complete(&request).await.unwrap_err();
        assert_eq!(err, AnalysisError::Transient("429 Too Many Requests".into()));
    }
}
