//! HTTP-backed analysis service.

use super::{AnalysisRequest, AnalysisService};
use crate::errors::AnalysisError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(alias = "output_text", alias = "completion")]
    text: String,
}

/// Posts requests as JSON to a completion endpoint.
///
/// The endpoint receives the serialized [`AnalysisRequest`] and must answer
/// with `{"text": "..."}`. Connection failures, timeouts, 429 and 5xx
/// responses are transient; other 4xx responses and malformed bodies are fatal.
#[derive(Debug, Clone)]
pub struct HttpAnalysisService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnalysisService {
    /// Creates a service with a request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    /// Sets a bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn complete(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                AnalysisError::Transient(e.to_string())
            } else {
                AnalysisError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} returned {status}: {body}", self.endpoint);
            tracing::warn!(
                case_id = %request.case_id,
                stage = %request.stage,
                status = status.as_u16(),
                "Analysis request rejected"
            );
            return Err(
                if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    AnalysisError::Transient(message)
                } else {
                    AnalysisError::Fatal(message)
                },
            );
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Fatal(format!("malformed analysis response: {e}")))?;
        Ok(parsed.text)
    }
}
