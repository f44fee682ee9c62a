//! Configuration for bwms-scorer
//!
//! Everything that recalibration touches lives here rather than in code:
//! prompt version, judge models, the bucket table, the letter-grade table,
//! thumb mapping, ensemble thresholds and the validation-gate limits.
//!
//! File resolution: `--config` → `BWMS_CONFIG` → `<config_dir>/bwms/bwms-scorer.toml`
//! → compiled defaults.

use crate::models::review::ThumbDirection;
use crate::scoring::types::{Bucket, BucketTable};
use bwms_common::config::{load_or_default, resolve_config_path, resolve_secret, LoggingConfig};
use bwms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "BWMS_CONFIG";

/// Module name used for the per-user config file
pub const MODULE_NAME: &str = "bwms-scorer";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Prompt/schema version stamped on every score this configuration produces
    pub prompt_version: String,
    /// Root of the review corpus (`<corpus_root>/<showId>/<review>.json`)
    pub corpus_root: PathBuf,
    /// Checkpoint database
    pub database_path: PathBuf,
    pub logging: LoggingConfig,
    pub judges: JudgesConfig,
    pub buckets: BucketTable,
    /// Letter grade → 0–100 score
    pub letter_grades: BTreeMap<String, f64>,
    pub thumbs: ThumbConfig,
    pub ensemble: EnsembleConfig,
    pub confidence: ConfidenceConfig,
    pub gate: GateConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            prompt_version: "v1".to_string(),
            corpus_root: PathBuf::from("data/reviews"),
            database_path: PathBuf::from("bwms-scorer.db"),
            logging: LoggingConfig::default(),
            judges: JudgesConfig::default(),
            buckets: BucketTable::default(),
            letter_grades: default_letter_grades(),
            thumbs: ThumbConfig::default(),
            ensemble: EnsembleConfig::default(),
            confidence: ConfidenceConfig::default(),
            gate: GateConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Default letter-grade table (A+ = 97 down to F = 20)
pub fn default_letter_grades() -> BTreeMap<String, f64> {
    [
        ("A+", 97.0),
        ("A", 93.0),
        ("A-", 89.0),
        ("B+", 84.0),
        ("B", 80.0),
        ("B-", 75.0),
        ("C+", 69.0),
        ("C", 65.0),
        ("C-", 60.0),
        ("D+", 54.0),
        ("D", 48.0),
        ("D-", 40.0),
        ("F", 20.0),
    ]
    .into_iter()
    .map(|(grade, score)| (grade.to_string(), score))
    .collect()
}

/// LLM provider families with an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(alias = "open_ai")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Adapter name recorded on every `ModelJudgeResult`
    pub fn judge_name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

/// One judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overridden by the provider's environment variable when set
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_requests_per_minute() -> u32 {
    50
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    fn new(kind: ProviderKind, model: &str) -> Self {
        Self {
            kind,
            model: model.to_string(),
            base_url: None,
            api_key: None,
            requests_per_minute: default_requests_per_minute(),
            max_tokens: default_max_tokens(),
            enabled: true,
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
    }

    /// API key: environment variable first, then TOML
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(self.kind.api_key_env_var(), self.api_key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgesConfig {
    /// Per-attempt timeout for one judge call
    pub timeout_secs: u64,
    pub providers: Vec<ProviderConfig>,
}

impl Default for JudgesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            providers: vec![
                ProviderConfig::new(ProviderKind::Anthropic, "claude-sonnet-4-5"),
                ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o"),
                ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash"),
            ],
        }
    }
}

impl JudgesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bucket each aggregator thumb corresponds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbConfig {
    pub up: Bucket,
    pub meh: Bucket,
    pub down: Bucket,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            up: Bucket::Positive,
            meh: Bucket::Mixed,
            down: Bucket::Negative,
        }
    }
}

impl ThumbConfig {
    pub fn bucket_for(&self, thumb: ThumbDirection) -> Bucket {
        match thumb {
            ThumbDirection::Up => self.up,
            ThumbDirection::Meh => self.meh,
            ThumbDirection::Down => self.down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Max pairwise spread tolerated under unanimous bucket agreement
    pub unanimous_spread_threshold: f64,
    /// Dissent at least this many bucket steps away flags a majority verdict
    pub majority_dissent_steps: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            unanimous_spread_threshold: 15.0,
            majority_dissent_steps: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Shorter full text forces low confidence
    pub min_full_text_chars: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_full_text_chars: 100,
        }
    }
}

/// Batch validation-gate thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum fraction of multi-judge reviews where two or more judges agree
    pub agreement_floor: f64,
    /// Maximum mean score spread among agreeing judges
    pub spread_ceiling: f64,
    /// Maximum fraction of scored reviews flagged needsReview
    pub needs_review_ceiling: f64,
    /// Maximum fraction of judge calls that failed
    pub failure_ceiling: f64,
    /// Metrics computed over fewer samples are reported but not gated
    pub min_sample: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            agreement_floor: 0.55,
            spread_ceiling: 12.0,
            needs_review_ceiling: 0.5,
            failure_ceiling: 0.25,
            min_sample: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    /// Reviews scored concurrently within a batch
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 200,
            concurrency: 4,
        }
    }
}

/// Bounded retry schedule applied to every judge call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

impl ScorerConfig {
    /// Resolve and load the configuration file, then validate it
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, MODULE_NAME);
        let config: ScorerConfig = load_or_default(path.as_deref())?;
        config.validate()?;
        info!(
            prompt_version = %config.prompt_version,
            corpus_root = %config.corpus_root.display(),
            "Scorer configuration ready"
        );
        Ok(config)
    }

    /// Reject inconsistent tables and out-of-range thresholds
    pub fn validate(&self) -> Result<()> {
        if self.prompt_version.trim().is_empty() {
            return Err(Error::Config("prompt_version must not be empty".to_string()));
        }

        self.buckets
            .validate()
            .map_err(|e| Error::Config(format!("[buckets] {}", e)))?;

        if self.letter_grades.is_empty() {
            return Err(Error::Config("[letter_grades] must not be empty".to_string()));
        }
        for (grade, score) in &self.letter_grades {
            if !(0.0..=100.0).contains(score) {
                return Err(Error::Config(format!(
                    "[letter_grades] {} = {} is outside 0-100",
                    grade, score
                )));
            }
        }

        if self.ensemble.unanimous_spread_threshold < 0.0 {
            return Err(Error::Config(
                "[ensemble] unanimous_spread_threshold must be non-negative".to_string(),
            ));
        }
        if self.ensemble.majority_dissent_steps == 0 || self.ensemble.majority_dissent_steps > 4 {
            return Err(Error::Config(
                "[ensemble] majority_dissent_steps must be between 1 and 4".to_string(),
            ));
        }

        for (name, rate) in [
            ("agreement_floor", self.gate.agreement_floor),
            ("needs_review_ceiling", self.gate.needs_review_ceiling),
            ("failure_ceiling", self.gate.failure_ceiling),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!(
                    "[gate] {} must be between 0 and 1, got {}",
                    name, rate
                )));
            }
        }
        if self.gate.spread_ceiling < 0.0 {
            return Err(Error::Config("[gate] spread_ceiling must be non-negative".to_string()));
        }

        if self.batch.size == 0 || self.batch.concurrency == 0 {
            return Err(Error::Config(
                "[batch] size and concurrency must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("[retry] max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("[retry] multiplier must be at least 1.0".to_string()));
        }

        if self.judges.timeout_secs == 0 {
            return Err(Error::Config("[judges] timeout_secs must be at least 1".to_string()));
        }
        for provider in &self.judges.providers {
            if provider.model.trim().is_empty() {
                return Err(Error::Config(format!(
                    "[judges] {} provider has no model",
                    provider.kind.judge_name()
                )));
            }
            if provider.requests_per_minute == 0 {
                return Err(Error::Config(format!(
                    "[judges] {} requests_per_minute must be at least 1",
                    provider.kind.judge_name()
                )));
            }
        }

        let enabled = self.judges.providers.iter().filter(|p| p.enabled).count();
        if enabled < 3 {
            warn!(
                enabled,
                "Fewer than three judges enabled; every review will be reconciled in degraded mode"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScorerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.size, 200);
        assert_eq!(config.judges.providers.len(), 3);
        assert_eq!(config.letter_grades.get("A+"), Some(&97.0));
        assert_eq!(config.letter_grades.get("F"), Some(&20.0));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            prompt_version = "v5.1"

            [gate]
            agreement_floor = 0.6

            [[judges.providers]]
            kind = "openai"
            model = "gpt-4.1"
        "#;
        let config: ScorerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.prompt_version, "v5.1");
        assert_eq!(config.gate.agreement_floor, 0.6);
        assert_eq!(config.gate.failure_ceiling, 0.25);
        assert_eq!(config.judges.providers.len(), 1);
        assert_eq!(config.judges.providers[0].requests_per_minute, 50);
        assert!(config.judges.providers[0].enabled);
        assert_eq!(config.buckets, BucketTable::default());
    }

    #[test]
    fn test_invalid_gate_rejected() {
        let mut config = ScorerConfig::default();
        config.gate.agreement_floor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bucket_table_rejected() {
        let mut config = ScorerConfig::default();
        config.buckets.mixed_max = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_default_and_override() {
        let mut provider = ProviderConfig::new(ProviderKind::Anthropic, "m");
        assert_eq!(provider.base_url(), "https://api.anthropic.com");
        provider.base_url = Some("http://localhost:8080/".to_string());
        assert_eq!(provider.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_thumb_mapping() {
        let thumbs = ThumbConfig::default();
        assert_eq!(thumbs.bucket_for(ThumbDirection::Up), Bucket::Positive);
        assert_eq!(thumbs.bucket_for(ThumbDirection::Meh), Bucket::Mixed);
        assert_eq!(thumbs.bucket_for(ThumbDirection::Down), Bucket::Negative);
    }
}
