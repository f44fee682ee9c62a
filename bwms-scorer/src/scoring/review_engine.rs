// Per-Review Scoring Engine
//
// Coordinates the tiers for one review and isolates its failures.
//
// Phases (per review):
// 1. Gate: invalid tier or no text → rejected as garbage_text, no judge called
// 2. Tier 1: build payload once, run every judge concurrently; extract explicit rating
// 3. Tier 2: reconcile judge verdicts, resolve the hierarchy
// 4. Stats for the Tier 3 batch gate
//
// Nothing here writes to the corpus; the batch rescorer commits results
// only after the batch passes validation.

use crate::config::ScorerConfig;
use crate::models::review::{ContentTier, ReviewId, ReviewRecord};
use crate::scoring::tier1::{
    build_judges, ContextBuilder, ExplicitRatingExtractor, JudgePanel, LetterGradeTable,
};
use crate::scoring::tier2::{EnsembleReconciler, HierarchyResolver, ScoringSignals};
use crate::scoring::tier3::ReviewStats;
use crate::scoring::types::{
    EnsembleOutcome, ExplicitRating, JudgeOutcome, RejectionReason, Resolution,
};
use crate::utils::retry::RetryPolicy;
use std::time::Instant;

/// Everything produced while scoring one review
#[derive(Debug, Clone)]
pub struct ReviewScoring {
    pub review_id: ReviewId,
    pub outcomes: Vec<JudgeOutcome>,
    pub ensemble: Option<EnsembleOutcome>,
    pub explicit_rating: Option<ExplicitRating>,
    pub resolution: Resolution,
    pub stats: ReviewStats,
    pub duration_ms: u64,
}

/// Per-review scoring engine
#[derive(Clone)]
pub struct ReviewEngine {
    context: ContextBuilder,
    panel: JudgePanel,
    reconciler: EnsembleReconciler,
    extractor: ExplicitRatingExtractor,
    resolver: HierarchyResolver,
}

impl ReviewEngine {
    /// Engine over an explicit judge panel
    pub fn new(config: &ScorerConfig, panel: JudgePanel) -> Self {
        Self {
            context: ContextBuilder::new(&config.prompt_version, &config.buckets),
            panel,
            reconciler: EnsembleReconciler::new(config.ensemble, config.buckets),
            extractor: ExplicitRatingExtractor::new(LetterGradeTable::new(&config.letter_grades)),
            resolver: HierarchyResolver::new(config.buckets, config.thumbs, config.confidence),
        }
    }

    /// Engine over the judges configured with API keys
    pub fn from_config(config: &ScorerConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry, config.judges.timeout());
        Self::new(config, JudgePanel::new(build_judges(config), retry))
    }

    /// Engine without judges, for re-resolving signals already on a record
    pub fn offline(config: &ScorerConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry, config.judges.timeout());
        Self::new(config, JudgePanel::new(Vec::new(), retry))
    }

    pub fn prompt_version(&self) -> &str {
        self.context.prompt_version()
    }

    pub fn judge_names(&self) -> Vec<String> {
        self.panel.judge_names()
    }

    /// First explicit rating in the full text, else in any excerpt
    pub fn explicit_rating(&self, record: &ReviewRecord) -> Option<ExplicitRating> {
        record
            .full_text()
            .and_then(|text| self.extractor.extract(text))
            .or_else(|| {
                record
                    .aggregator_excerpts
                    .values()
                    .find_map(|excerpt| self.extractor.extract(excerpt))
            })
    }

    /// Re-run the hierarchy without calling judges
    ///
    /// Uses the ensemble stored with the current score, the text's explicit
    /// rating, the override and the thumbs. A standing rejection stays a
    /// rejection. The resolution keeps the prompt version of the score it
    /// replaces so an override edit never makes a review look freshly scored.
    pub fn resolve_offline(&self, record: &ReviewRecord) -> Resolution {
        if record.scoring.is_none() {
            if let Some(rejection) = &record.quality.rejection {
                return Resolution::Rejected {
                    reason: rejection.reason,
                };
            }
        }

        let mut signals = ScoringSignals::from_record(record);
        signals.explicit_rating = self.explicit_rating(record);
        signals.ensemble = record
            .scoring
            .as_ref()
            .and_then(|s| s.ensemble.clone())
            .map(EnsembleOutcome::Scored);

        let prompt_version = record
            .scoring
            .as_ref()
            .map_or(self.prompt_version(), |s| s.prompt_version.as_str());
        self.resolver.resolve(record, signals, prompt_version)
    }

    /// Score one review
    ///
    /// Never fails: adapter errors degrade the ensemble, and a record that
    /// cannot be judged resolves to a rejection or `Unscored`.
    pub async fn score(&self, record: &ReviewRecord) -> ReviewScoring {
        let started = Instant::now();
        let prompt_version = self.prompt_version().to_string();

        if record.effective_tier() == ContentTier::Invalid || !record.has_extractable_text() {
            tracing::debug!(review_id = %record.id, "No judgeable text; rejecting as garbage_text");
            return ReviewScoring {
                review_id: record.id.clone(),
                outcomes: Vec::new(),
                ensemble: None,
                explicit_rating: None,
                resolution: Resolution::Rejected {
                    reason: RejectionReason::GarbageText,
                },
                stats: ReviewStats::default(),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        let payload = match self.context.build(record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(review_id = %record.id, error = %e, "Failed to build judge payload");
                return ReviewScoring {
                    review_id: record.id.clone(),
                    outcomes: Vec::new(),
                    ensemble: None,
                    explicit_rating: None,
                    resolution: Resolution::Unscored {
                        reason: e.to_string(),
                    },
                    stats: ReviewStats::default(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let outcomes = self.panel.score(&payload).await;
        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                tracing::warn!(
                    review_id = %record.id,
                    judge = %outcome.judge,
                    attempts = outcome.attempts,
                    error = %e,
                    "Judge failed"
                );
            }
        }

        let answered = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect();
        let ensemble = self.reconciler.reconcile(answered);
        let explicit_rating = self.explicit_rating(record);

        let mut signals = ScoringSignals::from_record(record);
        signals.explicit_rating = explicit_rating.clone();
        signals.ensemble = Some(ensemble.clone());

        let resolution = self.resolver.resolve(record, signals, &prompt_version);
        let stats = ReviewStats::from_outcomes(&outcomes, &resolution);

        match &resolution {
            Resolution::Scored(scored) => tracing::debug!(
                review_id = %record.id,
                score = scored.final_score,
                bucket = %scored.final_bucket,
                source = %scored.score_source,
                needs_review = scored.needs_review,
                "Review scored"
            ),
            Resolution::Rejected { reason } => {
                tracing::info!(review_id = %record.id, reason = %reason, "Review rejected by judges")
            }
            Resolution::Unscored { reason } => {
                tracing::warn!(review_id = %record.id, reason = %reason, "Review left unscored")
            }
        }

        ReviewScoring {
            review_id: record.id.clone(),
            outcomes,
            ensemble: Some(ensemble),
            explicit_rating,
            resolution,
            stats,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
