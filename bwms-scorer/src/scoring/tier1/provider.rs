// Tier 1: Provider plumbing shared by the judge adapters
//
// Concept: One rate-limited HTTP client per judge, and one normalization path
// from a provider's raw completion to a `ModelJudgeResult`
//
// Provider response shapes live in a tagged union (`RawCompletion`) so that
// nothing past this module ever handles provider-specific JSON.

use super::anthropic_judge::AnthropicResponse;
use super::gemini_judge::GeminiResponse;
use super::openai_judge::OpenAiResponse;
use super::response_parser::parse_judge_response;
use crate::scoring::types::{BucketTable, JudgeError, ModelJudgeResult};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;

/// Longest error body kept on an `Http` failure
const ERROR_BODY_LIMIT: usize = 300;

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Raw completion as returned by one provider
#[derive(Debug, Clone)]
pub enum RawCompletion {
    Anthropic(AnthropicResponse),
    OpenAi(OpenAiResponse),
    Gemini(GeminiResponse),
}

impl RawCompletion {
    /// Completion text the model produced
    pub fn into_text(self) -> Result<String, JudgeError> {
        let text = match self {
            Self::Anthropic(response) => response.text(),
            Self::OpenAi(response) => response.text(),
            Self::Gemini(response) => response.text(),
        }?;
        if text.trim().is_empty() {
            return Err(JudgeError::Malformed("empty completion text".to_string()));
        }
        Ok(text)
    }

    /// Normalize into the shared judge result shape
    pub fn normalize(
        self,
        judge: &str,
        model: &str,
        buckets: &BucketTable,
    ) -> Result<ModelJudgeResult, JudgeError> {
        let text = self.into_text()?;
        let verdict = parse_judge_response(&text, buckets)?;
        Ok(ModelJudgeResult {
            judge: judge.to_string(),
            model: model.to_string(),
            verdict,
        })
    }
}

/// Rate-limited HTTP client for one provider
pub struct ProviderClient {
    client: Client,
    rate_limiter: DirectRateLimiter,
    request_timeout: Duration,
}

impl ProviderClient {
    /// Create a client allowing `requests_per_minute` calls
    ///
    /// `request_timeout` bounds the HTTP exchange; the retry policy applies
    /// its own per-attempt timeout on top, which also covers the rate-limit wait.
    pub fn new(requests_per_minute: u32, request_timeout: Duration) -> Result<Self, JudgeError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(bwms_common::config::get_user_agent())
            .build()
            .map_err(|e| JudgeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            request_timeout,
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Wait for a rate-limit permit, send, and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, JudgeError> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await.map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(JudgeError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Http {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| JudgeError::Malformed(format!("unexpected response body: {}", e)))
    }

    fn map_transport(&self, err: reqwest::Error) -> JudgeError {
        if err.is_timeout() {
            JudgeError::Timeout(self.request_timeout)
        } else {
            JudgeError::Transport(err.to_string())
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(limit).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::types::{Bucket, JudgeVerdict};

    #[test]
    fn test_each_provider_shape_normalizes_identically() {
        let body = r#"{\"bucket\": \"Positive\", \"score\": 77, \"confidence\": \"high\", \"rationale\": \"warm\"}"#;

        let anthropic: AnthropicResponse = serde_json::from_str(&format!(
            r#"{{"content": [{{"type": "text", "text": "{}"}}], "stop_reason": "end_turn"}}"#,
            body
        ))
        .unwrap();
        let openai: OpenAiResponse = serde_json::from_str(&format!(
            r#"{{"choices": [{{"message": {{"role": "assistant", "content": "{}"}}}}]}}"#,
            body
        ))
        .unwrap();
        let gemini: GeminiResponse = serde_json::from_str(&format!(
            r#"{{"candidates": [{{"content": {{"parts": [{{"text": "{}"}}]}}}}]}}"#,
            body
        ))
        .unwrap();

        let table = BucketTable::default();
        let verdicts: Vec<JudgeVerdict> = [
            RawCompletion::Anthropic(anthropic),
            RawCompletion::OpenAi(openai),
            RawCompletion::Gemini(gemini),
        ]
        .into_iter()
        .map(|raw| raw.normalize("judge", "model", &table).unwrap().verdict)
        .collect();

        for verdict in &verdicts {
            assert!(matches!(
                verdict,
                JudgeVerdict::Scored { bucket: Bucket::Positive, .. }
            ));
        }
        assert_eq!(verdicts[0], verdicts[1]);
        assert_eq!(verdicts[1], verdicts[2]);
    }

    #[test]
    fn test_empty_completion_is_malformed() {
        let openai: OpenAiResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "  "}}]}"#).unwrap();
        assert!(matches!(
            RawCompletion::OpenAi(openai).into_text(),
            Err(JudgeError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncate_error_body() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }

    #[test]
    fn test_client_builds_with_zero_rpm() {
        assert!(ProviderClient::new(0, Duration::from_secs(5)).is_ok());
    }
}
