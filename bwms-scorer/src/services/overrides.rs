//! Editor overrides
//!
//! Setting or clearing an override re-resolves the review from the signals
//! it already carries; no judge is called.

use bwms_common::{Error, Result};
use chrono::Utc;

use crate::models::review::{HumanOverride, ReviewRecord};
use crate::scoring::review_engine::ReviewEngine;
use crate::scoring::types::{Resolution, ScoreSource};
use crate::services::review_store::ReviewStore;

/// Set an editor override on a review and re-resolve its score
///
/// # Errors
/// `InvalidInput` when `score` is outside 0–100, `NotFound` for an unknown review.
pub async fn set_override(
    engine: &ReviewEngine,
    store: &ReviewStore,
    review_id: &str,
    score: f64,
    note: Option<String>,
    set_by: Option<String>,
) -> Result<ReviewRecord> {
    if !(0.0..=100.0).contains(&score) {
        return Err(Error::InvalidInput(format!(
            "Override score must be between 0 and 100, got {}",
            score
        )));
    }

    let mut record = store.load(review_id).await?;
    record.human_override = Some(HumanOverride {
        score,
        note,
        set_by,
        set_at: Some(Utc::now()),
    });
    reresolve(engine, &mut record);
    store.save(&record).await?;

    tracing::info!(review_id = %record.id, score, "Human override set");
    Ok(record)
}

/// Remove an editor override and re-resolve its score
pub async fn clear_override(engine: &ReviewEngine, store: &ReviewStore, review_id: &str) -> Result<ReviewRecord> {
    let mut record = store.load(review_id).await?;
    if record.human_override.take().is_none() {
        tracing::info!(review_id = %record.id, "No human override to clear");
        return Ok(record);
    }
    reresolve(engine, &mut record);
    store.save(&record).await?;

    tracing::info!(review_id = %record.id, "Human override cleared");
    Ok(record)
}

fn reresolve(engine: &ReviewEngine, record: &mut ReviewRecord) {
    let resolution = engine.resolve_offline(record);
    match &resolution {
        Resolution::Rejected { reason } => {
            tracing::warn!(
                review_id = %record.id,
                reason = %reason,
                "Review stays rejected; the override applies once it is rescored cleanly"
            );
        }
        Resolution::Unscored { .. } => {
            // The only score left is the cleared override itself
            if record
                .scoring
                .as_ref()
                .is_some_and(|s| s.score_source == ScoreSource::HumanOverride)
            {
                record.superseded_score = record.scoring.take();
            }
            record.apply_resolution(&resolution, engine.prompt_version());
        }
        Resolution::Scored(_) => {
            let version = record
                .scoring
                .as_ref()
                .map_or_else(|| engine.prompt_version().to_string(), |s| s.prompt_version.clone());
            record.apply_resolution(&resolution, &version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScorerConfig;
    use crate::models::review::ContentTier;
    use crate::scoring::types::RejectionReason;

    fn engine() -> ReviewEngine {
        ReviewEngine::offline(&ScorerConfig::default())
    }

    async fn seeded_store() -> (tempfile::TempDir, ReviewStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReviewStore::new(dir.path());
        let mut record = ReviewRecord::new("show", "outlet", "Critic");
        record.full_text = Some("An evening of uneven pleasures.".repeat(10));
        record.content_tier = Some(ContentTier::Complete);
        store.save(&record).await.unwrap();
        (dir, store, record.id)
    }

    #[tokio::test]
    async fn test_set_and_clear() {
        let (_dir, store, id) = seeded_store().await;
        let engine = engine();

        let record = set_override(&engine, &store, &id, 62.0, Some("editor call".into()), Some("ed".into()))
            .await
            .unwrap();
        let scoring = record.scoring.as_ref().unwrap();
        assert_eq!(scoring.score_source, ScoreSource::HumanOverride);
        assert_eq!(scoring.final_score, 62.0);
        assert!(!record.needs_rescore);

        let reloaded = store.load(&id).await.unwrap();
        assert_eq!(reloaded.human_override.as_ref().unwrap().note.as_deref(), Some("editor call"));

        // Nothing else can score it: the override score is set aside, flagged for rescore
        let cleared = clear_override(&engine, &store, &id).await.unwrap();
        assert!(cleared.human_override.is_none());
        assert!(cleared.needs_rescore);
        assert!(cleared.scoring.is_none());
        assert_eq!(cleared.superseded_score.as_ref().map(|s| s.final_score), Some(62.0));
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let (_dir, store, id) = seeded_store().await;
        assert!(matches!(
            set_override(&engine(), &store, &id, 101.0, None, None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_review_keeps_rejection() {
        let (_dir, store, id) = seeded_store().await;
        let mut record = store.load(&id).await.unwrap();
        record.quality.apply_rejection(RejectionReason::WrongShow, "v1");
        store.save(&record).await.unwrap();

        let record = set_override(&engine(), &store, &id, 90.0, None, None).await.unwrap();
        assert!(record.scoring.is_none());
        assert!(record.human_override.is_some());
        assert!(record.quality.show_mismatch);
    }
}
