//! Checkpoint database for rescoring runs
//!
//! SQLite file holding run state, the frozen review list of each run, and
//! per-batch gate metrics. The review corpus itself stays in JSON files.

pub mod runs;

use bwms_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the file (and parent directory) when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create run tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rescore_runs (
            run_id TEXT PRIMARY KEY,
            prompt_version TEXT NOT NULL,
            selector TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            dry_run INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL,
            total_reviews INTEGER NOT NULL DEFAULT 0,
            batches_committed INTEGER NOT NULL DEFAULT 0,
            halt_reason TEXT,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_items (
            run_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            review_id TEXT NOT NULL,
            batch_index INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            outcome TEXT,
            prior_state TEXT,
            committed_at TEXT,
            PRIMARY KEY (run_id, position),
            FOREIGN KEY (run_id) REFERENCES rescore_runs(run_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_items_batch ON run_items(run_id, batch_index)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_metrics (
            run_id TEXT NOT NULL,
            batch_index INTEGER NOT NULL,
            metrics TEXT NOT NULL,
            passed INTEGER NOT NULL,
            breaches TEXT NOT NULL DEFAULT '[]',
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (run_id, batch_index),
            FOREIGN KEY (run_id) REFERENCES rescore_runs(run_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (rescore_runs, run_items, batch_metrics)");

    Ok(())
}
