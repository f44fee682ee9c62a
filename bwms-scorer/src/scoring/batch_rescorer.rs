// Batch Rescorer
//
// Applies the current prompt version to a frozen list of reviews, one batch at a time.
//
// Per batch:
//   LOADING_BATCH     load the batch's records from the corpus
//   SCORING_BATCH     score reviews concurrently (bounded worker pool)
//   VALIDATING_BATCH  compute gate metrics; a breach halts the run here
//   COMMITTING_BATCH  snapshot prior values, write records, advance the checkpoint
//
// Nothing is written to the corpus before the gate passes, so a halted batch
// leaves every prior score untouched. A dry run validates every batch and
// never commits.

use bwms_common::events::{EventBus, RescoreEvent};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::GateConfig;
use crate::db::runs;
use crate::models::rescore_run::{RescoreRun, RunSelector, RunState};
use crate::models::review::{ReviewId, ReviewRecord, ScoringSnapshot};
use crate::scoring::review_engine::{ReviewEngine, ReviewScoring};
use crate::scoring::tier3::{BatchMetrics, BatchValidator, GateVerdict, ReviewStats};
use crate::scoring::types::{Resolution, ScoringError, ScoringResult};
use crate::services::review_store::ReviewStore;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// Validation gate failed on `batch_index`
    Halted { batch_index: usize, reason: String },
    Interrupted,
}

/// Summary of one processed batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_index: usize,
    pub reviews: usize,
    pub scored: usize,
    pub rejected: usize,
    pub unscored: usize,
    pub metrics: BatchMetrics,
    pub verdict: GateVerdict,
    pub committed: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RescoreRun,
    pub outcome: RunOutcome,
    pub batches: Vec<BatchReport>,
}

/// Checkpointed batch rescorer
pub struct BatchRescorer {
    engine: ReviewEngine,
    store: ReviewStore,
    pool: SqlitePool,
    validator: BatchValidator,
    concurrency: usize,
    events: Option<EventBus>,
    cancel_token: CancellationToken,
}

impl BatchRescorer {
    pub fn new(
        engine: ReviewEngine,
        store: ReviewStore,
        pool: SqlitePool,
        gate: GateConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            engine,
            store,
            pool,
            validator: BatchValidator::new(gate),
            concurrency: concurrency.max(1),
            events: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    fn emit(&self, event: RescoreEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }

    /// Freeze the selected reviews into a new run and process it
    pub async fn start(&self, selector: RunSelector, batch_size: usize, dry_run: bool) -> ScoringResult<RunReport> {
        let prompt_version = self.engine.prompt_version().to_string();
        let review_ids = self.store.select(&selector, &prompt_version).await?;

        let mut run = RescoreRun::new(&prompt_version, selector, batch_size, dry_run);
        run.total_reviews = review_ids.len();

        runs::save_run(&self.pool, &run).await?;
        runs::insert_run_items(&self.pool, run.run_id, &review_ids, run.batch_size).await?;

        tracing::info!(
            run_id = %run.run_id,
            prompt_version = %run.prompt_version,
            selector = %run.selector,
            reviews = run.total_reviews,
            batches = run.total_batches(),
            dry_run,
            "Rescore run created"
        );

        self.drive(run).await
    }

    /// Continue a halted or interrupted run at its first uncommitted batch
    ///
    /// # Errors
    /// `RunState` when the run is unknown, already finished, or was created
    /// under a different prompt version.
    pub async fn resume(&self, run_id: Uuid) -> ScoringResult<RunReport> {
        let mut run = runs::load_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| ScoringError::RunState(format!("Run {} not found", run_id)))?;

        if run.prompt_version != self.engine.prompt_version() {
            return Err(ScoringError::RunState(format!(
                "Run {} was created for prompt version {}, current is {}",
                run_id,
                run.prompt_version,
                self.engine.prompt_version()
            )));
        }
        if matches!(run.state, RunState::Completed | RunState::RolledBack) {
            return Err(ScoringError::RunState(format!(
                "Run {} is {} and cannot be resumed",
                run_id, run.state
            )));
        }

        tracing::info!(
            run_id = %run.run_id,
            from_batch = run.batches_committed,
            previous_state = %run.state,
            "Resuming rescore run"
        );
        run.transition_to(RunState::Idle);
        run.halt_reason = None;
        self.drive(run).await
    }

    async fn drive(&self, mut run: RescoreRun) -> ScoringResult<RunReport> {
        let total_batches = run.total_batches();
        let first_batch = run.batches_committed;

        run.transition_to(RunState::LoadingBatch);
        runs::save_run(&self.pool, &run).await?;
        self.emit(RescoreEvent::RunStarted {
            run_id: run.run_id,
            prompt_version: run.prompt_version.clone(),
            total_reviews: run.total_reviews,
            total_batches,
            resumed_from_batch: first_batch,
            dry_run: run.dry_run,
            timestamp: Utc::now(),
        });

        let mut batches = Vec::new();

        for batch_index in first_batch..total_batches {
            if self.cancel_token.is_cancelled() {
                return self.interrupt(run, batches).await;
            }

            // LOADING_BATCH
            let mut records = self.load_batch(&run, batch_index).await?;
            self.emit(RescoreEvent::BatchLoaded {
                run_id: run.run_id,
                batch_index,
                reviews: records.len(),
            });

            // SCORING_BATCH
            run.transition_to(RunState::ScoringBatch);
            runs::save_run(&self.pool, &run).await?;
            let started = Instant::now();
            let Some(scorings) = self.score_batch(&records).await else {
                tracing::info!(run_id = %run.run_id, batch_index, "Cancelled mid-batch; batch discarded");
                return self.interrupt(run, batches).await;
            };
            let (scored, rejected, unscored) = count_outcomes(&scorings);
            self.emit(RescoreEvent::BatchScored {
                run_id: run.run_id,
                batch_index,
                scored,
                rejected,
                unscored,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            // VALIDATING_BATCH
            run.transition_to(RunState::ValidatingBatch);
            let stats: Vec<ReviewStats> = scorings.values().map(|s| s.stats.clone()).collect();
            let metrics = BatchMetrics::compute(&stats);
            let verdict = self.validator.evaluate(&metrics);
            runs::save_batch_metrics(&self.pool, run.run_id, batch_index, &metrics, &verdict).await?;
            self.emit(RescoreEvent::BatchValidated {
                run_id: run.run_id,
                batch_index,
                agreement_rate: metrics.agreement_rate.value,
                average_spread: metrics.average_spread.value,
                needs_review_rate: metrics.needs_review_rate.value,
                failure_rate: metrics.failure_rate.value,
                passed: verdict.passed(),
            });

            let mut report = BatchReport {
                batch_index,
                reviews: records.len(),
                scored,
                rejected,
                unscored,
                metrics,
                verdict,
                committed: false,
            };

            if !report.verdict.passed() {
                let reason = format!("batch {}: {}", batch_index, report.verdict.summary());
                tracing::error!(run_id = %run.run_id, batch_index, reason = %reason, "Validation gate failed; halting run");
                run.halt(reason.clone());
                runs::save_run(&self.pool, &run).await?;
                self.emit(RescoreEvent::RunHalted {
                    run_id: run.run_id,
                    batch_index,
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                batches.push(report);
                return Ok(RunReport {
                    run,
                    outcome: RunOutcome::Halted { batch_index, reason },
                    batches,
                });
            }

            if run.dry_run {
                tracing::info!(run_id = %run.run_id, batch_index, "Dry run: batch validated, not committed");
                run.transition_to(RunState::LoadingBatch);
                batches.push(report);
                continue;
            }

            // COMMITTING_BATCH
            run.transition_to(RunState::CommittingBatch);
            runs::save_run(&self.pool, &run).await?;
            self.commit_batch(&mut run, batch_index, &mut records, &scorings).await?;
            report.committed = true;
            batches.push(report);
            self.emit(RescoreEvent::BatchCommitted {
                run_id: run.run_id,
                batch_index,
                batches_committed: run.batches_committed,
                total_batches,
            });
        }

        run.transition_to(RunState::Completed);
        runs::save_run(&self.pool, &run).await?;
        tracing::info!(
            run_id = %run.run_id,
            batches_committed = run.batches_committed,
            dry_run = run.dry_run,
            "Rescore run completed"
        );
        self.emit(RescoreEvent::RunCompleted {
            run_id: run.run_id,
            batches_committed: run.batches_committed,
            timestamp: Utc::now(),
        });

        Ok(RunReport {
            run,
            outcome: RunOutcome::Completed,
            batches,
        })
    }

    async fn load_batch(&self, run: &RescoreRun, batch_index: usize) -> ScoringResult<Vec<ReviewRecord>> {
        let items = runs::load_batch_items(&self.pool, run.run_id, batch_index).await?;
        let mut records = Vec::with_capacity(items.len());

        for item in items {
            match self.store.load(&item.review_id).await {
                Ok(mut record) => {
                    // A previous attempt died while writing this batch
                    if let Some(snapshot) = item.prior_state {
                        tracing::warn!(review_id = %record.id, "Restoring record left by an incomplete commit");
                        record.restore(snapshot);
                    }
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!(review_id = %item.review_id, error = %e, "Review missing from corpus; skipped");
                }
            }
        }

        Ok(records)
    }

    /// Score a batch; `None` when cancelled before every review finished
    async fn score_batch(&self, records: &[ReviewRecord]) -> Option<HashMap<ReviewId, ReviewScoring>> {
        let cancel_token = &self.cancel_token;
        let results: Vec<Option<ReviewScoring>> = stream::iter(records)
            .map(|record| async move {
                if cancel_token.is_cancelled() {
                    return None;
                }
                Some(self.engine.score(record).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        if cancel_token.is_cancelled() {
            return None;
        }
        results
            .into_iter()
            .map(|s| s.map(|s| (s.review_id.clone(), s)))
            .collect()
    }

    async fn commit_batch(
        &self,
        run: &mut RescoreRun,
        batch_index: usize,
        records: &mut [ReviewRecord],
        scorings: &HashMap<ReviewId, ReviewScoring>,
    ) -> ScoringResult<()> {
        let snapshots: Vec<(ReviewId, ScoringSnapshot)> =
            records.iter().map(|r| (r.id.clone(), r.snapshot())).collect();
        runs::stage_snapshots(&self.pool, run.run_id, &snapshots).await?;

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            let Some(scoring) = scorings.get(&record.id) else {
                continue;
            };
            record.apply_resolution(&scoring.resolution, &run.prompt_version);
            self.store.save(record).await?;
            outcomes.push((record.id.clone(), outcome_tag(&scoring.resolution)));
        }

        run.batches_committed = batch_index + 1;
        run.transition_to(RunState::LoadingBatch);
        runs::commit_batch(&self.pool, run, batch_index, &outcomes).await?;

        tracing::info!(
            run_id = %run.run_id,
            batch_index,
            reviews = outcomes.len(),
            "Batch committed"
        );
        Ok(())
    }

    async fn interrupt(&self, mut run: RescoreRun, batches: Vec<BatchReport>) -> ScoringResult<RunReport> {
        run.transition_to(RunState::Interrupted);
        runs::save_run(&self.pool, &run).await?;
        tracing::warn!(
            run_id = %run.run_id,
            batches_committed = run.batches_committed,
            "Rescore run interrupted; resume with --resume"
        );
        self.emit(RescoreEvent::RunInterrupted {
            run_id: run.run_id,
            batches_committed: run.batches_committed,
            timestamp: Utc::now(),
        });
        Ok(RunReport {
            run,
            outcome: RunOutcome::Interrupted,
            batches,
        })
    }
}

fn outcome_tag(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::Scored(_) => "scored",
        Resolution::Rejected { .. } => "rejected",
        Resolution::Unscored { .. } => "unscored",
    }
}

fn count_outcomes(scorings: &HashMap<ReviewId, ReviewScoring>) -> (usize, usize, usize) {
    scorings
        .values()
        .fold((0, 0, 0), |(s, r, u), scoring| match scoring.resolution {
            Resolution::Scored(_) => (s + 1, r, u),
            Resolution::Rejected { .. } => (s, r + 1, u),
            Resolution::Unscored { .. } => (s, r, u + 1),
        })
}
