// Tier 1: OpenAI Judge
//
// Concept: Score one review with a GPT model through the Chat Completions API
//
// JSON mode is requested so the completion is a bare object; the shared
// parser still tolerates fences and prose for compatible endpoints that ignore it.

use super::context_builder::JudgePayload;
use super::provider::{ProviderClient, RawCompletion};
use super::ModelJudge;
use crate::config::ProviderConfig;
use crate::scoring::types::{BucketTable, JudgeError, ModelJudgeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat Completions response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiResponse {
    pub(crate) fn text(self) -> Result<String, JudgeError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| JudgeError::Malformed("response has no choices".to_string()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(JudgeError::Malformed(format!("model refused: {}", refusal)));
        }
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::debug!("OpenAI completion hit the token limit");
        }
        Ok(choice.message.content.unwrap_or_default())
    }
}

/// GPT judge
pub struct OpenAiJudge {
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    buckets: BucketTable,
    client: ProviderClient,
}

impl OpenAiJudge {
    pub fn new(
        config: &ProviderConfig,
        api_key: String,
        buckets: BucketTable,
        request_timeout: Duration,
    ) -> Result<Self, JudgeError> {
        Ok(Self {
            model: config.model.clone(),
            api_key,
            endpoint: format!("{}/v1/chat/completions", config.base_url()),
            max_tokens: config.max_tokens,
            buckets,
            client: ProviderClient::new(config.requests_per_minute, request_timeout)?,
        })
    }

    fn request<'a>(&'a self, payload: &'a JudgePayload) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &payload.system,
                },
                ChatMessage {
                    role: "user",
                    content: &payload.user,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        }
    }
}

#[async_trait::async_trait]
impl ModelJudge for OpenAiJudge {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
        tracing::debug!(review_id = %payload.review_id, model = %self.model, "Querying OpenAI judge");

        let request = self
            .client
            .http()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(payload));

        let response: OpenAiResponse = self.client.send_json(request).await?;
        RawCompletion::OpenAi(response).normalize(self.name(), &self.model, &self.buckets)
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
            kind: ProviderKind::OpenAi,
            model: "gpt-test".to_string(),
            base_url: None,
            api_key: None,
            requests_per_minute: 10,
            max_tokens: 256,
            enabled: true,
        };
        let judge = OpenAiJudge::new(&config, "key".into(), BucketTable::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(judge.endpoint, "https://api.openai.com/v1/chat/completions");

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
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_no_choices_is_malformed() {
        let response: OpenAiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(response.text(), Err(JudgeError::Malformed(_))));
    }

    #[test]
    fn test_refusal_is_malformed() {
        let response: OpenAiResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": null, "refusal": "cannot comply"}}]}"#,
        )
        .unwrap();
        assert!(matches!(response.text(), Err(JudgeError::Malformed(_))));
    }
}
