// Shared Types and Data Contracts
//
// This module defines the explicit data contracts between the three tiers of
// the scoring pipeline. Provider-specific response shapes never appear here:
// every judge adapter normalizes into `ModelJudgeResult` before anything
// downstream sees it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Buckets and the score range table
// ============================================================================

/// Verdict bucket, ordered from most negative to most positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    Pan,
    Negative,
    Mixed,
    Positive,
    Rave,
}

impl Bucket {
    /// All buckets in ascending order
    pub const ALL: [Bucket; 5] = [
        Bucket::Pan,
        Bucket::Negative,
        Bucket::Mixed,
        Bucket::Positive,
        Bucket::Rave,
    ];

    /// 0 (Pan) through 4 (Rave)
    pub fn ordinal(self) -> usize {
        match self {
            Self::Pan => 0,
            Self::Negative => 1,
            Self::Mixed => 2,
            Self::Positive => 3,
            Self::Rave => 4,
        }
    }

    /// Number of bucket steps between two buckets
    pub fn step_distance(self, other: Bucket) -> usize {
        self.ordinal().abs_diff(other.ordinal())
    }

    /// Canonical label ("Rave", "Positive", ...)
    pub fn label(self) -> &'static str {
        match self {
            Self::Pan => "Pan",
            Self::Negative => "Negative",
            Self::Mixed => "Mixed",
            Self::Positive => "Positive",
            Self::Rave => "Rave",
        }
    }

    /// Coerce a provider-supplied bucket name to the canonical bucket
    ///
    /// Case, whitespace and punctuation are ignored ("  POSITIVE.", "rave!").
    pub fn from_label(raw: &str) -> Option<Bucket> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "rave" => Some(Self::Rave),
            "positive" => Some(Self::Positive),
            "mixed" => Some(Self::Mixed),
            "negative" => Some(Self::Negative),
            "pan" => Some(Self::Pan),
            _ => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Contiguous, non-overlapping bucket ranges covering 0–100
///
/// Each field is the inclusive upper bound of its bucket; Rave always ends
/// at 100. Loaded from configuration so recalibration needs no code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTable {
    pub pan_max: u8,
    pub negative_max: u8,
    pub mixed_max: u8,
    pub positive_max: u8,
}

impl Default for BucketTable {
    fn default() -> Self {
        Self {
            pan_max: 34,
            negative_max: 54,
            mixed_max: 69,
            positive_max: 84,
        }
    }
}

impl BucketTable {
    /// Check bounds are strictly increasing inside (0, 100)
    pub fn validate(&self) -> Result<(), String> {
        let bounds = [self.pan_max, self.negative_max, self.mixed_max, self.positive_max];
        if bounds[0] == 0 {
            return Err("pan_max must be greater than 0".to_string());
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("bucket bounds must be strictly increasing: {:?}", bounds));
        }
        if self.positive_max >= 100 {
            return Err("positive_max must be below 100".to_string());
        }
        Ok(())
    }

    /// Closed score range owned by `bucket`
    pub fn range(&self, bucket: Bucket) -> (f64, f64) {
        let (lo, hi) = match bucket {
            Bucket::Pan => (0, self.pan_max),
            Bucket::Negative => (self.pan_max + 1, self.negative_max),
            Bucket::Mixed => (self.negative_max + 1, self.mixed_max),
            Bucket::Positive => (self.mixed_max + 1, self.positive_max),
            Bucket::Rave => (self.positive_max + 1, 100),
        };
        (f64::from(lo), f64::from(hi))
    }

    /// Canonical score → bucket mapping
    ///
    /// Fractional scores belong to the bucket containing their floor, so
    /// 54.5 is Negative and 55.0 is Mixed.
    pub fn bucket_for(&self, score: f64) -> Bucket {
        let s = score.clamp(0.0, 100.0).floor();
        if s <= f64::from(self.pan_max) {
            Bucket::Pan
        } else if s <= f64::from(self.negative_max) {
            Bucket::Negative
        } else if s <= f64::from(self.mixed_max) {
            Bucket::Mixed
        } else if s <= f64::from(self.positive_max) {
            Bucket::Positive
        } else {
            Bucket::Rave
        }
    }

    /// True when `score` lies inside the closed range of `bucket`
    pub fn contains(&self, bucket: Bucket, score: f64) -> bool {
        let (lo, hi) = self.range(bucket);
        score >= lo && score <= hi
    }

    /// Clamp `score` into the range of `bucket`
    pub fn clamp_to(&self, bucket: Bucket, score: f64) -> f64 {
        let (lo, hi) = self.range(bucket);
        score.clamp(lo, hi)
    }

    /// Midpoint of a bucket's range
    pub fn midpoint(&self, bucket: Bucket) -> f64 {
        let (lo, hi) = self.range(bucket);
        ((lo + hi) / 2.0).round()
    }
}

// ============================================================================
// Tier 1 Outputs: Judge verdicts
// ============================================================================

/// Judge self-reported confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_label(raw: &str) -> Option<Confidence> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "med" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Why a judge refused to score the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Review is about a different show
    WrongShow,
    /// Off-Broadway/touring/other production of the same title
    WrongProduction,
    /// Press release, cast listing, plot summary
    NotAReview,
    /// Nav menus, error pages, ad copy
    GarbageText,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 4] = [
        RejectionReason::WrongShow,
        RejectionReason::WrongProduction,
        RejectionReason::NotAReview,
        RejectionReason::GarbageText,
    ];

    /// Lower value wins when rejection reasons tie
    pub fn precedence(self) -> u8 {
        match self {
            Self::WrongShow => 0,
            Self::WrongProduction => 1,
            Self::NotAReview => 2,
            Self::GarbageText => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WrongShow => "wrong_show",
            Self::WrongProduction => "wrong_production",
            Self::NotAReview => "not_a_review",
            Self::GarbageText => "garbage_text",
        }
    }

    pub fn from_label(raw: &str) -> Option<RejectionReason> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "wrong_show" => Some(Self::WrongShow),
            "wrong_production" => Some(Self::WrongProduction),
            "not_a_review" => Some(Self::NotAReview),
            "garbage_text" | "garbage" => Some(Self::GarbageText),
            _ => None,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized verdict from one judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JudgeVerdict {
    /// Judge scored the review
    #[serde(rename_all = "camelCase")]
    Scored {
        bucket: Bucket,
        score: f64,
        confidence: Confidence,
        rationale: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_quote: Option<String>,
        /// Score was outside the bucket range and clamped into it
        #[serde(default)]
        clamped: bool,
    },
    /// Judge deliberately declined to score
    #[serde(rename_all = "camelCase")]
    Rejected {
        reason: RejectionReason,
        rationale: String,
    },
}

/// One judge's opinion of one review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJudgeResult {
    /// Adapter name ("anthropic", "openai", "gemini")
    pub judge: String,
    /// Provider model identifier
    pub model: String,
    #[serde(flatten)]
    pub verdict: JudgeVerdict,
}

impl ModelJudgeResult {
    /// (bucket, score, confidence) for a scored verdict
    pub fn scored(&self) -> Option<(Bucket, f64, Confidence)> {
        match &self.verdict {
            JudgeVerdict::Scored {
                bucket,
                score,
                confidence,
                ..
            } => Some((*bucket, *score, *confidence)),
            JudgeVerdict::Rejected { .. } => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectionReason> {
        match &self.verdict {
            JudgeVerdict::Rejected { reason, .. } => Some(*reason),
            JudgeVerdict::Scored { .. } => None,
        }
    }
}

/// Adapter-level judge failure (distinct from a deliberate rejection)
#[derive(Debug, Clone, thiserror::Error)]
pub enum JudgeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed judge output: {0}")]
    Malformed(String),

    #[error("no API key configured for {0}")]
    MissingApiKey(String),
}

impl JudgeError {
    /// Transient failures get another attempt under the retry policy
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited | Self::Malformed(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey(_) => false,
        }
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Http { .. } => "http",
            Self::Malformed(_) => "malformed",
            Self::MissingApiKey(_) => "missing_api_key",
        }
    }
}

/// Result of calling one judge through the retry policy
#[derive(Debug, Clone)]
pub struct JudgeOutcome {
    pub judge: String,
    pub model: String,
    pub attempts: u32,
    pub result: Result<ModelJudgeResult, JudgeError>,
}

// ============================================================================
// Tier 2 Outputs: Ensemble
// ============================================================================

/// How the judges agreed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AgreementLevel {
    Unanimous,
    Majority,
    NoConsensus,
    /// Fewer than three judges produced a usable score
    Degraded { judges: usize },
}

impl AgreementLevel {
    pub fn tag(&self) -> String {
        match self {
            Self::Unanimous => "unanimous".to_string(),
            Self::Majority => "majority".to_string(),
            Self::NoConsensus => "no-consensus".to_string(),
            Self::Degraded { judges } => format!("degraded-{}-model", judges),
        }
    }
}

impl fmt::Display for AgreementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl From<AgreementLevel> for String {
    fn from(level: AgreementLevel) -> Self {
        level.tag()
    }
}

impl TryFrom<String> for AgreementLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "unanimous" => Ok(Self::Unanimous),
            "majority" => Ok(Self::Majority),
            "no-consensus" => Ok(Self::NoConsensus),
            other => other
                .strip_prefix("degraded-")
                .and_then(|rest| rest.strip_suffix("-model"))
                .and_then(|n| n.parse().ok())
                .map(|judges| Self::Degraded { judges })
                .ok_or_else(|| format!("unknown agreement level: {}", other)),
        }
    }
}

/// Reconciled opinion across all judges for one review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub final_bucket: Bucket,
    pub final_score: f64,
    pub agreement_level: AgreementLevel,
    /// Lowest confidence among the judges whose scores were used
    pub confidence: Confidence,
    pub needs_review: bool,
    /// Max pairwise spread among the scores used for `final_score`
    pub score_spread: f64,
    /// Full audit trail, including dissenters and rejections
    pub model_results: Vec<ModelJudgeResult>,
}

/// Output of the ensemble reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EnsembleOutcome {
    Scored(EnsembleResult),
    /// Two or more judges rejected the input
    #[serde(rename_all = "camelCase")]
    Rejected {
        reason: RejectionReason,
        rejections: usize,
        model_results: Vec<ModelJudgeResult>,
    },
    /// No judge produced a usable score; the review needs a rescore
    #[serde(rename_all = "camelCase")]
    Unscored { model_results: Vec<ModelJudgeResult> },
}

impl EnsembleOutcome {
    pub fn result(&self) -> Option<&EnsembleResult> {
        match self {
            Self::Scored(result) => Some(result),
            _ => None,
        }
    }
}

// ============================================================================
// Explicit ratings
// ============================================================================

/// Literal rating format found in review text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExplicitRatingKind {
    Stars,
    OutOf,
    Slash,
    LetterGrade,
}

/// Author-assigned rating extracted from review text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitRating {
    pub kind: ExplicitRatingKind,
    /// Matched text ("★★★★☆", "3 out of 4", "B+")
    pub matched: String,
    /// Normalized 0–100 score
    pub score: f64,
}

// ============================================================================
// Final output: scored review
// ============================================================================

/// Which layer of the scoring hierarchy produced the final number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScoreSource {
    #[serde(rename = "explicit-stars")]
    ExplicitStars,
    #[serde(rename = "explicit-outOf")]
    ExplicitOutOf,
    #[serde(rename = "explicit-slash")]
    ExplicitSlash,
    #[serde(rename = "explicit-letterGrade")]
    ExplicitLetterGrade,
    #[serde(rename = "humanOverride")]
    HumanOverride,
    #[serde(rename = "ensemble-high-confidence")]
    EnsembleHighConfidence,
    #[serde(rename = "ensemble-medium-confidence")]
    EnsembleMediumConfidence,
    #[serde(rename = "ensemble-thumb-confirmed")]
    EnsembleThumbConfirmed,
    #[serde(rename = "thumb-override")]
    ThumbOverride,
    #[serde(rename = "ensemble-low-confidence")]
    EnsembleLowConfidence,
    #[serde(rename = "thumb-only")]
    ThumbOnly,
}

impl ScoreSource {
    pub const ALL: [ScoreSource; 11] = [
        ScoreSource::ExplicitStars,
        ScoreSource::ExplicitOutOf,
        ScoreSource::ExplicitSlash,
        ScoreSource::ExplicitLetterGrade,
        ScoreSource::HumanOverride,
        ScoreSource::EnsembleHighConfidence,
        ScoreSource::EnsembleMediumConfidence,
        ScoreSource::EnsembleThumbConfirmed,
        ScoreSource::ThumbOverride,
        ScoreSource::EnsembleLowConfidence,
        ScoreSource::ThumbOnly,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::ExplicitStars => "explicit-stars",
            Self::ExplicitOutOf => "explicit-outOf",
            Self::ExplicitSlash => "explicit-slash",
            Self::ExplicitLetterGrade => "explicit-letterGrade",
            Self::HumanOverride => "humanOverride",
            Self::EnsembleHighConfidence => "ensemble-high-confidence",
            Self::EnsembleMediumConfidence => "ensemble-medium-confidence",
            Self::EnsembleThumbConfirmed => "ensemble-thumb-confirmed",
            Self::ThumbOverride => "thumb-override",
            Self::EnsembleLowConfidence => "ensemble-low-confidence",
            Self::ThumbOnly => "thumb-only",
        }
    }

    pub fn from_tag(tag: &str) -> Option<ScoreSource> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }

    pub fn for_explicit(kind: ExplicitRatingKind) -> ScoreSource {
        match kind {
            ExplicitRatingKind::Stars => Self::ExplicitStars,
            ExplicitRatingKind::OutOf => Self::ExplicitOutOf,
            ExplicitRatingKind::Slash => Self::ExplicitSlash,
            ExplicitRatingKind::LetterGrade => Self::ExplicitLetterGrade,
        }
    }
}

impl fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Persisted outcome for one review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredReview {
    pub final_score: f64,
    pub final_bucket: Bucket,
    pub score_source: ScoreSource,
    pub prompt_version: String,
    /// Effective confidence after the text-length downgrade
    pub confidence: Confidence,
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_rating: Option<ExplicitRating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<EnsembleResult>,
    pub scored_at: DateTime<Utc>,
    #[serde(default)]
    pub previous_score: Option<f64>,
    #[serde(default)]
    pub previous_version: Option<String>,
    #[serde(default)]
    pub previous_source: Option<ScoreSource>,
}

/// Final decision of the hierarchy resolver for one review
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Scored(Box<ScoredReview>),
    Rejected { reason: RejectionReason },
    /// No signal produced a score; the review is flagged for rescoring
    Unscored { reason: String },
}

impl Resolution {
    pub fn scored(&self) -> Option<&ScoredReview> {
        match self {
            Self::Scored(scored) => Some(scored),
            _ => None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("Review store error: {0}")]
    Store(#[from] bwms_common::Error),

    #[error("Invalid review record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run state error: {0}")]
    RunState(String),
}

pub type ScoringResult<T> = Result<T, ScoringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_ranges() {
        let table = BucketTable::default();
        assert_eq!(table.range(Bucket::Pan), (0.0, 34.0));
        assert_eq!(table.range(Bucket::Negative), (35.0, 54.0));
        assert_eq!(table.range(Bucket::Mixed), (55.0, 69.0));
        assert_eq!(table.range(Bucket::Positive), (70.0, 84.0));
        assert_eq!(table.range(Bucket::Rave), (85.0, 100.0));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_every_integer_score_has_exactly_one_bucket() {
        let table = BucketTable::default();
        for score in 0..=100 {
            let s = f64::from(score);
            let owners: Vec<Bucket> = Bucket::ALL
                .into_iter()
                .filter(|b| table.contains(*b, s))
                .collect();
            assert_eq!(owners.len(), 1, "score {} owned by {:?}", score, owners);
            assert_eq!(owners[0], table.bucket_for(s));
        }
    }

    #[test]
    fn test_fractional_scores_use_floor() {
        let table = BucketTable::default();
        assert_eq!(table.bucket_for(54.5), Bucket::Negative);
        assert_eq!(table.bucket_for(55.0), Bucket::Mixed);
        assert_eq!(table.bucket_for(46.5), Bucket::Negative);
        assert_eq!(table.bucket_for(-3.0), Bucket::Pan);
        assert_eq!(table.bucket_for(140.0), Bucket::Rave);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let overlapping = BucketTable {
            pan_max: 40,
            negative_max: 40,
            mixed_max: 69,
            positive_max: 84,
        };
        assert!(overlapping.validate().is_err());

        let saturated = BucketTable {
            positive_max: 100,
            ..BucketTable::default()
        };
        assert!(saturated.validate().is_err());
    }

    #[test]
    fn test_bucket_coercion() {
        assert_eq!(Bucket::from_label("  POSITIVE. "), Some(Bucket::Positive));
        assert_eq!(Bucket::from_label("rave!"), Some(Bucket::Rave));
        assert_eq!(Bucket::from_label("Pan"), Some(Bucket::Pan));
        assert_eq!(Bucket::from_label("lukewarm"), None);
        assert_eq!(Bucket::Pan.step_distance(Bucket::Positive), 3);
    }

    #[test]
    fn test_agreement_level_tags() {
        assert_eq!(AgreementLevel::NoConsensus.tag(), "no-consensus");
        assert_eq!(AgreementLevel::Degraded { judges: 2 }.tag(), "degraded-2-model");
        assert_eq!(
            AgreementLevel::try_from("degraded-1-model".to_string()),
            Ok(AgreementLevel::Degraded { judges: 1 })
        );
        let json = serde_json::to_string(&AgreementLevel::Majority).unwrap();
        assert_eq!(json, "\"majority\"");
    }

    #[test]
    fn test_score_source_tags_round_trip() {
        for source in ScoreSource::ALL {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source.tag()));
            assert_eq!(ScoreSource::from_tag(source.tag()), Some(source));
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(JudgeError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(JudgeError::Malformed("x".into()).is_retryable());
        assert!(JudgeError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(JudgeError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!JudgeError::Http { status: 401, body: String::new() }.is_retryable());
        assert!(!JudgeError::MissingApiKey("openai".into()).is_retryable());
    }

    #[test]
    fn test_judge_result_serialization_shape() {
        let result = ModelJudgeResult {
            judge: "openai".to_string(),
            model: "gpt-4o".to_string(),
            verdict: JudgeVerdict::Rejected {
                reason: RejectionReason::GarbageText,
                rationale: "404 page".to_string(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"], "garbage_text");
        let back: ModelJudgeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
