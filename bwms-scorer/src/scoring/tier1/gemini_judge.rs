// Tier 1: Gemini Judge
//
// Concept: Score one review with a Gemini model through generateContent
//
// API Documentation: https://ai.google.dev/api/generate-content

use super::context_builder::JudgePayload;
use super::provider::{ProviderClient, RawCompletion};
use super::ModelJudge;
use crate::config::ProviderConfig;
use crate::scoring::types::{BucketTable, JudgeError, ModelJudgeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

/// generateContent response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiResponse {
    pub(crate) fn text(self) -> Result<String, JudgeError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(JudgeError::Malformed(format!("prompt blocked: {}", reason)));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| JudgeError::Malformed("response has no candidates".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(JudgeError::Malformed("candidate blocked by safety filter".to_string()));
        }

        Ok(candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default())
    }
}

/// Gemini judge
pub struct GeminiJudge {
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    buckets: BucketTable,
    client: ProviderClient,
}

impl GeminiJudge {
    pub fn new(
        config: &ProviderConfig,
        api_key: String,
        buckets: BucketTable,
        request_timeout: Duration,
    ) -> Result<Self, JudgeError> {
        Ok(Self {
            model: config.model.clone(),
            api_key,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url(),
                config.model
            ),
            max_tokens: config.max_tokens,
            buckets,
            client: ProviderClient::new(config.requests_per_minute, request_timeout)?,
        })
    }

    fn request<'a>(&'a self, payload: &'a JudgePayload) -> GenerateRequest<'a> {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: &payload.system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &payload.user }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait::async_trait]
impl ModelJudge for GeminiJudge {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
        tracing::debug!(review_id = %payload.review_id, model = %self.model, "Querying Gemini judge");

        let request = self
            .client
            .http()
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(payload));

        let response: GeminiResponse = self.client.send_json(request).await?;
        RawCompletion::Gemini(response).normalize(self.name(), &self.model, &self.buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::models::review::ContentTier;
    use crate::scoring::tier1::context_builder::TextSource;

    #[test]
    fn test_request_shape() {
        let config = ProviderConfig {
            kind: ProviderKind::Gemini,
            model: "gemini-test".to_string(),
            base_url: None,
            api_key: None,
            requests_per_minute: 10,
            max_tokens: 300,
            enabled: true,
        };
        let judge = GeminiJudge::new(&config, "key".into(), BucketTable::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            judge.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-test:generateContent"
        );

        let payload = JudgePayload {
            review_id: "r".to_string(),
            prompt_version: "v1".to_string(),
            system: "sys".to_string(),
            user: "usr".to_string(),
            content_tier: ContentTier::Complete,
            text_source: TextSource::FullText,
            includes_aggregator_context: false,
        };
        let body = serde_json::to_value(judge.request(&payload)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 300);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_blocked_prompt_is_malformed() {
        let response: GeminiResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "OTHER"}}"#).unwrap();
        assert!(matches!(response.text(), Err(JudgeError::Malformed(_))));
    }

    #[test]
    fn test_parts_concatenated() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "ab"}, {"text": "cd"}]}, "finishReason": "STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(response.text().unwrap(), "abcd");
    }
}
