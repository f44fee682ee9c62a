// Tier 1: Anthropic Judge
//
// Concept: Score one review with a Claude model through the Messages API
//
// API Documentation: https://docs.anthropic.com/en/api/messages

use super::context_builder::JudgePayload;
use super::provider::{ProviderClient, RawCompletion};
use super::ModelJudge;
use crate::config::ProviderConfig;
use crate::scoring::types::{BucketTable, JudgeError, ModelJudgeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Messages API response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicResponse {
    pub(crate) fn text(self) -> Result<String, JudgeError> {
        if self.stop_reason.as_deref() == Some("refusal") {
            return Err(JudgeError::Malformed("model refused to answer".to_string()));
        }
        let text: String = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        Ok(text)
    }
}

/// Claude judge
pub struct AnthropicJudge {
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    buckets: BucketTable,
    client: ProviderClient,
}

impl AnthropicJudge {
    pub fn new(
        config: &ProviderConfig,
        api_key: String,
        buckets: BucketTable,
        request_timeout: Duration,
    ) -> Result<Self, JudgeError> {
        Ok(Self {
            model: config.model.clone(),
            api_key,
            endpoint: format!("{}/v1/messages", config.base_url()),
            max_tokens: config.max_tokens,
            buckets,
            client: ProviderClient::new(config.requests_per_minute, request_timeout)?,
        })
    }

    fn request<'a>(&'a self, payload: &'a JudgePayload) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: &payload.system,
            messages: vec![Message {
                role: "user",
                content: &payload.user,
            }],
        }
    }
}

#[async_trait::async_trait]
impl ModelJudge for AnthropicJudge {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
        tracing::debug!(review_id = %payload.review_id, model = %self.model, "Querying Anthropic judge");

        let request = self
            .client
            .http()
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request(payload));

        let response: AnthropicResponse = self.client.send_json(request).await?;
        RawCompletion::Anthropic(response).normalize(self.name(), &self.model, &self.buckets)
    }
}
