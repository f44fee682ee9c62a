//! Rescoring run persistence
//!
//! Checkpoints are written after every committed batch so a resumed run
//! never re-scores a batch that already reached the corpus.

use bwms_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::rescore_run::{RescoreRun, RunSelector, RunState};
use crate::models::review::{ReviewId, ScoringSnapshot};
use crate::scoring::tier3::{BatchMetrics, GateVerdict};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Status of one review within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Committed,
    RolledBack,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(Error::Internal(format!("Unknown run item status: {}", other))),
        }
    }
}

/// One review frozen into a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunItem {
    pub position: usize,
    pub review_id: ReviewId,
    pub batch_index: usize,
    pub status: ItemStatus,
    /// "scored", "rejected" or "unscored" once committed
    pub outcome: Option<String>,
    /// Scoring fields before this run touched the record
    pub prior_state: Option<ScoringSnapshot>,
}

/// Gate result stored for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMetricsRow {
    pub batch_index: usize,
    pub metrics: BatchMetrics,
    pub verdict: GateVerdict,
    pub recorded_at: DateTime<Utc>,
}

fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

/// Insert or update a run
pub async fn save_run(pool: &SqlitePool, run: &RescoreRun) -> Result<()> {
    // Prepare all data before touching the database
    let run_id = run.run_id.to_string();
    let selector = serde_json::to_string(&run.selector)?;
    let batch_size = run.batch_size as i64;
    let total_reviews = run.total_reviews as i64;
    let batches_committed = run.batches_committed as i64;
    let started_at = run.started_at.to_rfc3339();
    let updated_at = run.updated_at.to_rfc3339();
    let ended_at = run.ended_at.map(|dt| dt.to_rfc3339());

    retry_on_lock("save_run", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO rescore_runs (
                run_id, prompt_version, selector, batch_size, dry_run, state,
                total_reviews, batches_committed, halt_reason,
                started_at, updated_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                state = excluded.state,
                total_reviews = excluded.total_reviews,
                batches_committed = excluded.batches_committed,
                halt_reason = excluded.halt_reason,
                updated_at = excluded.updated_at,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&run_id)
        .bind(&run.prompt_version)
        .bind(&selector)
        .bind(batch_size)
        .bind(run.dry_run)
        .bind(run.state.as_str())
        .bind(total_reviews)
        .bind(batches_committed)
        .bind(&run.halt_reason)
        .bind(&started_at)
        .bind(&updated_at)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok::<(), Error>(())
    })
    .await
}

fn run_from_row(row: &SqliteRow) -> Result<RescoreRun> {
    let run_id: String = row.try_get("run_id")?;
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let selector: String = row.try_get("selector")?;
    let selector: RunSelector = serde_json::from_str(&selector)?;

    let state: String = row.try_get("state")?;
    let state = RunState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown run state: {}", state)))?;

    let started_at: String = row.try_get("started_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;

    Ok(RescoreRun {
        run_id,
        prompt_version: row.try_get("prompt_version")?,
        selector,
        batch_size: row.try_get::<i64, _>("batch_size")? as usize,
        dry_run: row.try_get("dry_run")?,
        state,
        total_reviews: row.try_get::<i64, _>("total_reviews")? as usize,
        batches_committed: row.try_get::<i64, _>("batches_committed")? as usize,
        halt_reason: row.try_get("halt_reason")?,
        started_at: parse_time(&started_at, "started_at")?,
        updated_at: parse_time(&updated_at, "updated_at")?,
        ended_at: ended_at
            .as_deref()
            .map(|s| parse_time(s, "ended_at"))
            .transpose()?,
    })
}

const RUN_COLUMNS: &str = "run_id, prompt_version, selector, batch_size, dry_run, state, \
     total_reviews, batches_committed, halt_reason, started_at, updated_at, ended_at";

/// Load a run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<RescoreRun>> {
    let row = sqlx::query(&format!("SELECT {} FROM rescore_runs WHERE run_id = ?", RUN_COLUMNS))
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Mark runs left mid-flight by a dead process as interrupted
///
/// A process that dies mid-batch leaves its run in a working state; such a
/// run will never progress on its own but can be resumed.
pub async fn mark_stale_runs_interrupted(pool: &SqlitePool) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE rescore_runs
        SET state = 'INTERRUPTED', updated_at = ?, ended_at = ?
        WHERE state NOT IN ('HALTED', 'COMPLETED', 'INTERRUPTED', 'ROLLED_BACK')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Freeze the ordered review list of a new run
pub async fn insert_run_items(
    pool: &SqlitePool,
    run_id: Uuid,
    review_ids: &[ReviewId],
    batch_size: usize,
) -> Result<()> {
    let run_id = run_id.to_string();
    let batch_size = batch_size.max(1);

    retry_on_lock("insert_run_items", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for (position, review_id) in review_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO run_items (run_id, position, review_id, batch_index) VALUES (?, ?, ?, ?)",
            )
            .bind(&run_id)
            .bind(position as i64)
            .bind(review_id)
            .bind((position / batch_size) as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok::<(), Error>(())
    })
    .await
}

fn item_from_row(row: &SqliteRow) -> Result<RunItem> {
    let status: String = row.try_get("status")?;
    let prior_state: Option<String> = row.try_get("prior_state")?;
    Ok(RunItem {
        position: row.try_get::<i64, _>("position")? as usize,
        review_id: row.try_get("review_id")?,
        batch_index: row.try_get::<i64, _>("batch_index")? as usize,
        status: ItemStatus::parse(&status)?,
        outcome: row.try_get("outcome")?,
        prior_state: prior_state
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

/// Items of one batch, in run order
pub async fn load_batch_items(pool: &SqlitePool, run_id: Uuid, batch_index: usize) -> Result<Vec<RunItem>> {
    let rows = sqlx::query(
        r#"
        SELECT position, review_id, batch_index, status, outcome, prior_state
        FROM run_items
        WHERE run_id = ? AND batch_index = ?
        ORDER BY position
        "#,
    )
    .bind(run_id.to_string())
    .bind(batch_index as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// Items committed by a run, in run order
pub async fn committed_items(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<RunItem>> {
    let rows = sqlx::query(
        r#"
        SELECT position, review_id, batch_index, status, outcome, prior_state
        FROM run_items
        WHERE run_id = ? AND status = 'committed'
        ORDER BY position
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// Record pre-commit snapshots for a batch about to be written
///
/// An existing snapshot is kept: if an earlier attempt at this batch died
/// part-way through writing files, the first snapshot is the true prior state.
pub async fn stage_snapshots(
    pool: &SqlitePool,
    run_id: Uuid,
    snapshots: &[(ReviewId, ScoringSnapshot)],
) -> Result<()> {
    let run_id = run_id.to_string();
    let encoded = snapshots
        .iter()
        .map(|(id, snapshot)| Ok::<_, Error>((id.as_str(), serde_json::to_string(snapshot)?)))
        .collect::<Result<Vec<_>>>()?;

    retry_on_lock("stage_snapshots", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for (review_id, snapshot) in &encoded {
            sqlx::query(
                r#"
                UPDATE run_items
                SET prior_state = COALESCE(prior_state, ?)
                WHERE run_id = ? AND review_id = ? AND status = 'pending'
                "#,
            )
            .bind(snapshot)
            .bind(&run_id)
            .bind(review_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok::<(), Error>(())
    })
    .await
}

/// Mark a batch committed and advance the run checkpoint in one transaction
pub async fn commit_batch(
    pool: &SqlitePool,
    run: &RescoreRun,
    batch_index: usize,
    outcomes: &[(ReviewId, &'static str)],
) -> Result<()> {
    let run_id = run.run_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("commit_batch", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for (review_id, outcome) in outcomes {
            sqlx::query(
                r#"
                UPDATE run_items
                SET status = 'committed', outcome = ?, committed_at = ?
                WHERE run_id = ? AND batch_index = ? AND review_id = ?
                "#,
            )
            .bind(*outcome)
            .bind(&now)
            .bind(&run_id)
            .bind(batch_index as i64)
            .bind(review_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "UPDATE rescore_runs SET batches_committed = ?, state = ?, updated_at = ? WHERE run_id = ?",
        )
        .bind(run.batches_committed as i64)
        .bind(run.state.as_str())
        .bind(&now)
        .bind(&run_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok::<(), Error>(())
    })
    .await
}

/// Flag rolled-back items
pub async fn mark_rolled_back(pool: &SqlitePool, run_id: Uuid, review_ids: &[ReviewId]) -> Result<()> {
    let run_id = run_id.to_string();
    retry_on_lock("mark_rolled_back", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for review_id in review_ids {
            sqlx::query("UPDATE run_items SET status = 'rolled_back' WHERE run_id = ? AND review_id = ?")
                .bind(&run_id)
                .bind(review_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok::<(), Error>(())
    })
    .await
}

/// Store gate metrics for one batch (replaces an earlier attempt)
pub async fn save_batch_metrics(
    pool: &SqlitePool,
    run_id: Uuid,
    batch_index: usize,
    metrics: &BatchMetrics,
    verdict: &GateVerdict,
) -> Result<()> {
    let run_id = run_id.to_string();
    let metrics = serde_json::to_string(metrics)?;
    let breaches = serde_json::to_string(&verdict.breaches)?;
    let now = Utc::now().to_rfc3339();

    retry_on_lock("save_batch_metrics", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO batch_metrics (run_id, batch_index, metrics, passed, breaches, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id, batch_index) DO UPDATE SET
                metrics = excluded.metrics,
                passed = excluded.passed,
                breaches = excluded.breaches,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(&run_id)
        .bind(batch_index as i64)
        .bind(&metrics)
        .bind(verdict.passed())
        .bind(&breaches)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok::<(), Error>(())
    })
    .await
}

pub async fn load_batch_metrics(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<BatchMetricsRow>> {
    let rows = sqlx::query(
        r#"
        SELECT batch_index, metrics, breaches, recorded_at
        FROM batch_metrics
        WHERE run_id = ?
        ORDER BY batch_index
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let metrics: String = row.try_get("metrics")?;
            let breaches: String = row.try_get("breaches")?;
            let recorded_at: String = row.try_get("recorded_at")?;
            Ok::<_, Error>(BatchMetricsRow {
                batch_index: row.try_get::<i64, _>("batch_index")? as usize,
                metrics: serde_json::from_str(&metrics)?,
                verdict: GateVerdict {
                    breaches: serde_json::from_str(&breaches)?,
                },
                recorded_at: parse_time(&recorded_at, "recorded_at")?,
            })
        })
        .collect()
}
