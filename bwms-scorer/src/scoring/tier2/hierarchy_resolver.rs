// Tier 2: Scoring Hierarchy Resolution
//
// Concept: Pick the one signal that produces a review's final score, and say which
// Synchronization: Accepts ReviewRecord + ScoringSignals, outputs Resolution
//
// Gates (before any signal is considered):
//   invalid tier or no text → rejected (garbage_text)
//   ensemble rejection consensus → rejected
//
// Priority (first applicable wins):
//   1. explicit rating in the text
//   2. human override
//   3. ensemble at high/medium effective confidence
//   4. thumb cross-check of a low-confidence ensemble (confirm or override)
//   5. low-confidence ensemble with no thumb
//   6. thumb alone when no judge produced a score
//
// This is the only writer of `scoreSource`.

use crate::config::{ConfidenceConfig, ThumbConfig};
use crate::models::review::{ContentTier, HumanOverride, ReviewRecord, ThumbDirection};
use crate::scoring::types::{
    Bucket, BucketTable, Confidence, EnsembleOutcome, EnsembleResult, ExplicitRating,
    RejectionReason, Resolution, ScoreSource, ScoredReview,
};
use chrono::Utc;

/// Explicit rating this many steps from the ensemble bucket is flagged for audit
const EXPLICIT_DISAGREEMENT_STEPS: usize = 2;

/// Every signal available for one review
#[derive(Debug, Clone, Default)]
pub struct ScoringSignals {
    pub explicit_rating: Option<ExplicitRating>,
    pub human_override: Option<HumanOverride>,
    pub ensemble: Option<EnsembleOutcome>,
    /// Plurality thumb across aggregators
    pub thumb: Option<ThumbDirection>,
}

impl ScoringSignals {
    /// Signals carried by the record itself (override and thumbs)
    pub fn from_record(record: &ReviewRecord) -> Self {
        Self {
            explicit_rating: None,
            human_override: record.human_override.clone(),
            ensemble: None,
            thumb: record.thumb_consensus(),
        }
    }
}

/// Scoring hierarchy resolver (Tier 2 concept)
#[derive(Debug, Clone, Copy)]
pub struct HierarchyResolver {
    buckets: BucketTable,
    thumbs: ThumbConfig,
    confidence: ConfidenceConfig,
}

impl HierarchyResolver {
    pub fn new(buckets: BucketTable, thumbs: ThumbConfig, confidence: ConfidenceConfig) -> Self {
        Self {
            buckets,
            thumbs,
            confidence,
        }
    }

    /// Confidence the hierarchy actually uses for an ensemble result
    ///
    /// Missing or very short full text, or excerpt/stub content, cannot
    /// support more than low confidence whatever the judges reported.
    pub fn effective_confidence(&self, record: &ReviewRecord, reported: Confidence) -> Confidence {
        let short_text = record.full_text_chars() < self.confidence.min_full_text_chars;
        let thin_tier = matches!(
            record.effective_tier(),
            ContentTier::Excerpt | ContentTier::Stub | ContentTier::Invalid
        );
        if short_text || thin_tier {
            Confidence::Low
        } else {
            reported
        }
    }

    /// Resolve the final score for one review
    pub fn resolve(&self, record: &ReviewRecord, signals: ScoringSignals, prompt_version: &str) -> Resolution {
        if record.effective_tier() == ContentTier::Invalid || !record.has_extractable_text() {
            return Resolution::Rejected {
                reason: RejectionReason::GarbageText,
            };
        }

        let ensemble = match signals.ensemble {
            Some(EnsembleOutcome::Rejected { reason, .. }) => return Resolution::Rejected { reason },
            Some(EnsembleOutcome::Scored(result)) => Some(result),
            Some(EnsembleOutcome::Unscored { .. }) | None => None,
        };

        let draft = ResolutionDraft::new(record, prompt_version, ensemble.clone());

        // 1. Explicit rating
        if let Some(rating) = signals.explicit_rating {
            let bucket = self.buckets.bucket_for(rating.score);
            let disagrees = ensemble
                .as_ref()
                .is_some_and(|e| e.final_bucket.step_distance(bucket) >= EXPLICIT_DISAGREEMENT_STEPS);
            if disagrees {
                tracing::debug!(
                    review_id = %record.id,
                    explicit = rating.score,
                    "Explicit rating far from ensemble verdict"
                );
            }
            let source = ScoreSource::for_explicit(rating.kind);
            let score = rating.score;
            return draft
                .with_explicit(rating)
                .finish(score, bucket, source, Confidence::High, disagrees);
        }

        // 2. Human override
        if let Some(human) = signals.human_override {
            let score = human.score.clamp(0.0, 100.0);
            return draft.finish(
                score,
                self.buckets.bucket_for(score),
                ScoreSource::HumanOverride,
                Confidence::High,
                false,
            );
        }

        let thumb = signals.thumb;

        let Some(ensemble) = ensemble else {
            // 6. Thumb alone
            return match thumb {
                Some(thumb) => {
                    let bucket = self.thumbs.bucket_for(thumb);
                    draft.finish(
                        self.buckets.midpoint(bucket),
                        bucket,
                        ScoreSource::ThumbOnly,
                        Confidence::Low,
                        false,
                    )
                }
                None => Resolution::Unscored {
                    reason: "no judge produced a usable score and no aggregator thumb exists".to_string(),
                },
            };
        };

        let confidence = self.effective_confidence(record, ensemble.confidence);

        // 3. Ensemble at high/medium confidence
        match confidence {
            Confidence::High => {
                return draft.finish(
                    ensemble.final_score,
                    ensemble.final_bucket,
                    ScoreSource::EnsembleHighConfidence,
                    confidence,
                    ensemble.needs_review,
                )
            }
            Confidence::Medium => {
                return draft.finish(
                    ensemble.final_score,
                    ensemble.final_bucket,
                    ScoreSource::EnsembleMediumConfidence,
                    confidence,
                    ensemble.needs_review,
                )
            }
            Confidence::Low => {}
        }

        match thumb {
            // 4. Thumb cross-check
            Some(thumb) if thumb_direction(ensemble.final_bucket) == thumb => draft.finish(
                ensemble.final_score,
                ensemble.final_bucket,
                ScoreSource::EnsembleThumbConfirmed,
                Confidence::Low,
                ensemble.needs_review,
            ),
            Some(thumb) => {
                let bucket = self.thumbs.bucket_for(thumb);
                tracing::debug!(
                    review_id = %record.id,
                    ensemble = %ensemble.final_bucket,
                    thumb = %bucket,
                    "Aggregator thumb overrides low-confidence ensemble"
                );
                draft.finish(
                    self.buckets.midpoint(bucket),
                    bucket,
                    ScoreSource::ThumbOverride,
                    Confidence::Low,
                    true,
                )
            }
            // 5. Low-confidence ensemble, nothing to cross-check
            None => draft.finish(
                ensemble.final_score,
                ensemble.final_bucket,
                ScoreSource::EnsembleLowConfidence,
                Confidence::Low,
                ensemble.needs_review,
            ),
        }
    }
}

/// Which way a bucket leans, in thumb terms
pub fn thumb_direction(bucket: Bucket) -> ThumbDirection {
    match bucket {
        Bucket::Rave | Bucket::Positive => ThumbDirection::Up,
        Bucket::Mixed => ThumbDirection::Meh,
        Bucket::Negative | Bucket::Pan => ThumbDirection::Down,
    }
}

/// Fields shared by every scored resolution of one review
struct ResolutionDraft {
    prompt_version: String,
    ensemble: Option<EnsembleResult>,
    explicit_rating: Option<ExplicitRating>,
    previous: Option<ScoredReview>,
}

impl ResolutionDraft {
    fn new(record: &ReviewRecord, prompt_version: &str, ensemble: Option<EnsembleResult>) -> Self {
        Self {
            prompt_version: prompt_version.to_string(),
            ensemble,
            explicit_rating: None,
            // A review rejected since its last score keeps that score as superseded
            previous: record.scoring.clone().or_else(|| record.superseded_score.clone()),
        }
    }

    fn with_explicit(mut self, rating: ExplicitRating) -> Self {
        self.explicit_rating = Some(rating);
        self
    }

    fn finish(
        self,
        score: f64,
        bucket: Bucket,
        source: ScoreSource,
        confidence: Confidence,
        needs_review: bool,
    ) -> Resolution {
        Resolution::Scored(Box::new(ScoredReview {
            final_score: score,
            final_bucket: bucket,
            score_source: source,
            prompt_version: self.prompt_version,
            confidence,
            needs_review,
            explicit_rating: self.explicit_rating,
            ensemble: self.ensemble,
            scored_at: Utc::now(),
            previous_score: self.previous.as_ref().map(|p| p.final_score),
            previous_version: self.previous.as_ref().map(|p| p.prompt_version.clone()),
            previous_source: self.previous.as_ref().map(|p| p.score_source),
        }))
    }
}
