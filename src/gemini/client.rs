use std::time::Duration;

use reqwest::Client;

use super::error::LlmError;
use super::types::{ApiErrorEnvelope, GenerateContentRequest, GenerateContentResponse};

const API_URL: &str = "https://generativelanguage.googleapis.com";

/// Anything that can answer a `generateContent` request.
///
/// The gateway is generic over this so tests can swap in canned responses.
pub trait ContentGenerator {
    async fn generate(
        &self,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, LlmError>;
}

pub struct GeminiClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

impl ContentGenerator for GeminiClient {
    async fn generate(
        &self,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, LlmError> {
        let response = self
            .client
            .post(self.endpoint(&req.model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let raw = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let body = serde_json::from_str::<ApiErrorEnvelope>(&raw).ok();

            let exhausted = body
                .as_ref()
                .is_some_and(|b| b.error.status == "RESOURCE_EXHAUSTED");
            let message = body.map(|b| b.error.message).unwrap_or(raw);

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || exhausted {
                tracing::debug!(status = status.as_u16(), "gemini quota exhausted");
                return Err(LlmError::RateLimited {
                    retry_after_ms,
                    message,
                });
            }
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<GenerateContentResponse>().await?;
        Ok(body)
    }
}
