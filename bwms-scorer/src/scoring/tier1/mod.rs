// Tier 1: Independent Signal Sources
//
// Each module in this tier is an independent concept with one purpose.
// Judges run concurrently per review and return normalized verdicts; the
// explicit-rating extractor runs locally with no network access.
//
// Contract: every judge implements `ModelJudge`
//   input:  JudgePayload (built once per review by the context builder)
//   output: ModelJudgeResult (provider shapes never leave the adapter)

pub mod anthropic_judge;
pub mod context_builder;
pub mod explicit_rating;
pub mod gemini_judge;
pub mod judge_prompt;
pub mod openai_judge;
pub mod provider;
pub mod response_parser;

pub use context_builder::{ContextBuilder, JudgePayload, TextSource};
pub use explicit_rating::{ExplicitRatingExtractor, LetterGradeTable};

use crate::config::{ProviderKind, ScorerConfig};
use crate::scoring::types::{JudgeError, JudgeOutcome, ModelJudgeResult};
use crate::utils::retry::RetryPolicy;
use std::sync::Arc;

/// One LLM judge
///
/// # Example
/// ```ignore
/// #[async_trait::async_trait]
/// impl ModelJudge for FixedJudge {
///     fn name(&self) -> &str { "fixed" }
///     fn model(&self) -> &str { "fixed-1" }
///
///     async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
///         Ok(self.verdict.clone())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ModelJudge: Send + Sync {
    /// Adapter name for provenance ("anthropic", "openai", "gemini")
    fn name(&self) -> &str;

    /// Provider model identifier
    fn model(&self) -> &str;

    /// Score one review
    ///
    /// # Errors
    /// `JudgeError` for adapter-level failures only. A deliberate refusal to
    /// score is a successful `ModelJudgeResult` carrying a rejection.
    async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError>;
}

/// The set of judges applied to every review, plus the retry policy wrapping them
#[derive(Clone)]
pub struct JudgePanel {
    judges: Vec<Arc<dyn ModelJudge>>,
    retry: RetryPolicy,
}

impl JudgePanel {
    pub fn new(judges: Vec<Arc<dyn ModelJudge>>, retry: RetryPolicy) -> Self {
        Self { judges, retry }
    }

    pub fn len(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    pub fn judge_names(&self) -> Vec<String> {
        self.judges.iter().map(|j| j.name().to_string()).collect()
    }

    /// Call every judge concurrently and wait for all of them
    ///
    /// A slow or failing judge never cancels the others; each call is bounded
    /// by the retry policy's per-attempt timeout.
    pub async fn score(&self, payload: &JudgePayload) -> Vec<JudgeOutcome> {
        let calls = self.judges.iter().map(|judge| {
            let judge = Arc::clone(judge);
            async move {
                let (attempts, result) = self
                    .retry
                    .run(judge.name(), || judge.judge(payload))
                    .await;
                JudgeOutcome {
                    judge: judge.name().to_string(),
                    model: judge.model().to_string(),
                    attempts,
                    result,
                }
            }
        });
        futures::future::join_all(calls).await
    }
}

/// Build the configured judges, skipping any without an API key
pub fn build_judges(config: &ScorerConfig) -> Vec<Arc<dyn ModelJudge>> {
    let mut judges: Vec<Arc<dyn ModelJudge>> = Vec::new();
    let timeout = config.judges.timeout();

    for provider in config.judges.providers.iter().filter(|p| p.enabled) {
        let name = provider.kind.judge_name();
        let Some(api_key) = provider.resolve_api_key() else {
            tracing::warn!(
                judge = name,
                env_var = provider.kind.api_key_env_var(),
                "No API key configured; judge disabled"
            );
            continue;
        };

        let built: Result<Arc<dyn ModelJudge>, JudgeError> = match provider.kind {
            ProviderKind::Anthropic => {
                anthropic_judge::AnthropicJudge::new(provider, api_key, config.buckets, timeout)
                    .map(|j| Arc::new(j) as Arc<dyn ModelJudge>)
            }
            ProviderKind::OpenAi => {
                openai_judge::OpenAiJudge::new(provider, api_key, config.buckets, timeout)
                    .map(|j| Arc::new(j) as Arc<dyn ModelJudge>)
            }
            ProviderKind::Gemini => {
                gemini_judge::GeminiJudge::new(provider, api_key, config.buckets, timeout)
                    .map(|j| Arc::new(j) as Arc<dyn ModelJudge>)
            }
        };

        match built {
            Ok(judge) => {
                tracing::info!(judge = name, model = %provider.model, "Judge enabled");
                judges.push(judge);
            }
            Err(e) => tracing::error!(judge = name, error = %e, "Failed to initialize judge"),
        }
    }

    judges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::review::ContentTier;
    use crate::scoring::types::{Bucket, Confidence, JudgeVerdict};
    use std::time::Duration;

    struct StaticJudge {
        name: &'static str,
        outcome: Result<ModelJudgeResult, JudgeError>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ModelJudge for StaticJudge {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "static"
        }

        async fn judge(&self, _payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    fn scored(name: &str, score: f64) -> ModelJudgeResult {
        ModelJudgeResult {
            judge: name.to_string(),
            model: "static".to_string(),
            verdict: JudgeVerdict::Scored {
                bucket: Bucket::Positive,
                score,
                confidence: Confidence::High,
                rationale: String::new(),
                key_quote: None,
                clamped: false,
            },
        }
    }

    fn payload() -> JudgePayload {
        JudgePayload {
            review_id: "show/review".to_string(),
            prompt_version: "v1".to_string(),
            system: String::new(),
            user: String::new(),
            content_tier: ContentTier::Complete,
            text_source: TextSource::FullText,
            includes_aggregator_context: false,
        }
    }

    #[tokio::test]
    async fn test_slow_judge_does_not_block_others() {
        let retry = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(100),
        };
        let judges: Vec<Arc<dyn ModelJudge>> = vec![
            Arc::new(StaticJudge {
                name: "fast-a",
                outcome: Ok(scored("fast-a", 78.0)),
                delay: Duration::ZERO,
            }),
            Arc::new(StaticJudge {
                name: "hung",
                outcome: Ok(scored("hung", 80.0)),
                delay: Duration::from_secs(10),
            }),
            Arc::new(StaticJudge {
                name: "fast-b",
                outcome: Ok(scored("fast-b", 76.0)),
                delay: Duration::ZERO,
            }),
        ];
        let panel = JudgePanel::new(judges, retry);

        let outcomes = panel.score(&payload()).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(JudgeError::Timeout(_))));
        assert!(outcomes[2].result.is_ok());
        assert_eq!(outcomes[1].judge, "hung");
    }

    #[test]
    fn test_disabled_providers_are_not_built() {
        let mut config = ScorerConfig::default();
        for provider in &mut config.judges.providers {
            provider.enabled = false;
            provider.api_key = Some("configured".to_string());
        }
        assert!(build_judges(&config).is_empty());
    }

    #[test]
    fn test_configured_key_builds_judge() {
        let mut config = ScorerConfig::default();
        for provider in &mut config.judges.providers {
            provider.api_key = Some("configured".to_string());
        }
        let names: Vec<String> = build_judges(&config)
            .iter()
            .map(|j| j.name().to_string())
            .collect();
        assert_eq!(names, vec!["anthropic", "openai", "gemini"]);
    }
}
