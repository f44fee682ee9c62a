//! Run rollback
//!
//! Restores every committed review of a run to the snapshot staged before
//! its batch was written. A review that has since been rescored under a
//! different prompt version is left alone.

use bwms_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::runs::{self, RunItem};
use crate::models::rescore_run::RunState;
use crate::models::review::{ReviewId, ReviewRecord};
use crate::services::review_store::ReviewStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackSummary {
    pub restored: usize,
    /// (review id, why it was left alone)
    pub skipped: Vec<(ReviewId, String)>,
}

/// Roll back every committed batch of a finished run
///
/// # Errors
/// `NotFound` for an unknown run, `InvalidInput` when the run is still
/// active or already rolled back.
pub async fn rollback_run(pool: &SqlitePool, store: &ReviewStore, run_id: Uuid) -> Result<RollbackSummary> {
    let mut run = runs::load_run(pool, run_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Rescore run not found: {}", run_id)))?;

    if !run.state.can_transition_to(RunState::RolledBack) {
        return Err(Error::InvalidInput(format!(
            "Run {} is {}; only halted, completed or interrupted runs can be rolled back",
            run_id, run.state
        )));
    }

    let items = runs::committed_items(pool, run_id).await?;
    tracing::info!(run_id = %run_id, items = items.len(), "Rolling back run");

    let mut summary = RollbackSummary::default();
    let mut restored_ids = Vec::with_capacity(items.len());

    for item in items {
        match restore_item(store, &run.prompt_version, item).await {
            Ok(Ok(review_id)) => {
                summary.restored += 1;
                restored_ids.push(review_id);
            }
            Ok(Err(skipped)) => {
                tracing::warn!(review_id = %skipped.0, reason = %skipped.1, "Not rolled back");
                summary.skipped.push(skipped);
            }
            Err(e) => return Err(e),
        }
    }

    runs::mark_rolled_back(pool, run_id, &restored_ids).await?;
    run.transition_to(RunState::RolledBack);
    runs::save_run(pool, &run).await?;

    tracing::info!(
        run_id = %run_id,
        restored = summary.restored,
        skipped = summary.skipped.len(),
        "Run rolled back"
    );
    Ok(summary)
}

/// Outer error aborts the rollback; inner error skips one review
async fn restore_item(
    store: &ReviewStore,
    prompt_version: &str,
    item: RunItem,
) -> Result<std::result::Result<ReviewId, (ReviewId, String)>> {
    let Some(prior) = item.prior_state else {
        return Ok(Err((item.review_id, "no snapshot was staged".to_string())));
    };

    let mut record = match store.load(&item.review_id).await {
        Ok(record) => record,
        Err(Error::NotFound(_)) => return Ok(Err((item.review_id, "review file is gone".to_string()))),
        Err(e) => return Err(e),
    };

    if let Some(version) = written_version(&record).filter(|v| *v != prompt_version) {
        return Ok(Err((
            item.review_id,
            format!("rescored since under prompt {}", version),
        )));
    }

    record.restore(prior);
    store.save(&record).await?;
    Ok(Ok(item.review_id))
}

/// Prompt version of whatever the pipeline last wrote to the record
fn written_version(record: &ReviewRecord) -> Option<&str> {
    match (&record.scoring, &record.quality.rejection) {
        (Some(scoring), _) => Some(scoring.prompt_version.as_str()),
        (None, Some(rejection)) => Some(rejection.prompt_version.as_str()),
        (None, None) => None,
    }
}
