//! bwms-scorer - Review scoring CLI
//!
//! Rescoring runs, rollback, audit, editor overrides and calibration over
//! the review corpus.
//!
//! Exit codes: 0 success, 2 validation gate halted the run, 3 interrupted,
//! 1 any other error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use bwms_common::config::LoggingConfig;
use bwms_common::events::{EventBus, RescoreEvent};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use bwms_scorer::db;
use bwms_scorer::models::RunSelector;
use bwms_scorer::services::audit::AuditReport;
use bwms_scorer::services::calibration::{self, DEFAULT_SET_SIZE};
use bwms_scorer::services::{overrides, rollback_run};
use bwms_scorer::{BatchRescorer, ReviewEngine, ReviewStore, RunOutcome, RunReport, ScorerConfig};

const EXIT_HALTED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 3;

/// Command-line arguments for bwms-scorer
#[derive(Parser, Debug)]
#[command(name = "bwms-scorer")]
#[command(about = "Ensemble LLM scoring for critic reviews")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides BWMS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rescore reviews under the configured prompt version
    Rescore(RescoreArgs),
    /// Restore every review committed by a run
    Rollback {
        #[arg(long = "run")]
        run_id: Uuid,
    },
    /// Summarize score sources across the corpus
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Manage editor overrides
    #[command(subcommand)]
    Override(OverrideCommand),
    /// Build or measure the calibration set
    #[command(subcommand)]
    Calibrate(CalibrateCommand),
}

#[derive(Args, Debug)]
struct RescoreArgs {
    #[arg(long)]
    batch_size: Option<usize>,
    /// Reviews scored concurrently
    #[arg(long)]
    concurrency: Option<usize>,
    /// Reviews never scored under the current prompt version or flagged for rescore
    #[arg(long, conflicts_with_all = ["all", "show"])]
    outdated: bool,
    #[arg(long, conflicts_with = "show")]
    all: bool,
    /// Only these shows
    #[arg(long, num_args = 1..)]
    show: Vec<String>,
    /// Score and validate without writing anything back
    #[arg(long)]
    dry_run: bool,
    /// Continue a halted or interrupted run
    #[arg(long, conflicts_with_all = ["outdated", "all", "show", "dry_run", "batch_size"])]
    resume: Option<Uuid>,
}

impl RescoreArgs {
    fn selector(&self) -> Option<RunSelector> {
        if self.all {
            Some(RunSelector::All)
        } else if !self.show.is_empty() {
            Some(RunSelector::Shows {
                show_ids: self.show.clone(),
            })
        } else if self.outdated {
            Some(RunSelector::Outdated)
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
enum OverrideCommand {
    Set {
        #[arg(long)]
        review: String,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        by: Option<String>,
    },
    Clear {
        #[arg(long)]
        review: String,
    },
}

#[derive(Subcommand, Debug)]
enum CalibrateCommand {
    Build {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SET_SIZE)]
        size: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Replace an existing set
        #[arg(long)]
        force: bool,
    },
    Measure {
        #[arg(long)]
        set: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ScorerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bwms-scorer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("bwms-scorer: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "Caused by");
            }
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG, else the configured level, else info
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn run(command: Command, config: ScorerConfig) -> Result<ExitCode> {
    let store = ReviewStore::new(&config.corpus_root);

    match command {
        Command::Rescore(args) => rescore(args, &config, store).await,

        Command::Rollback { run_id } => {
            let pool = open_database(&config).await?;
            let summary = rollback_run(&pool, &store, run_id)
                .await
                .with_context(|| format!("Rollback of run {} failed", run_id))?;
            println!("Restored {} reviews", summary.restored);
            for (review_id, reason) in &summary.skipped {
                println!("  skipped {}: {}", review_id, reason);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Audit { json } => {
            let load = store.load_all().await.context("Failed to read corpus")?;
            let mut report = AuditReport::from_records(&load.records);
            report.unreadable = load.errors.len();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Override(command) => {
            let engine = ReviewEngine::offline(&config);
            let record = match command {
                OverrideCommand::Set {
                    review,
                    score,
                    note,
                    by,
                } => overrides::set_override(&engine, &store, &review, score, note, by).await?,
                OverrideCommand::Clear { review } => {
                    overrides::clear_override(&engine, &store, &review).await?
                }
            };
            match &record.scoring {
                Some(scoring) => println!(
                    "{}: {:.1} ({}, {})",
                    record.id, scoring.final_score, scoring.final_bucket, scoring.score_source
                ),
                None => println!("{}: unscored", record.id),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Calibrate(CalibrateCommand::Build {
            out,
            size,
            seed,
            force,
        }) => {
            let load = store.load_all().await.context("Failed to read corpus")?;
            let set = calibration::build_calibration_set(&load.records, &config.buckets, size, seed);
            if set.len() < size {
                warn!(requested = size, drawn = set.len(), "Corpus has fewer scored reviews than requested");
            }
            calibration::write_calibration_set(&set, &out, force)?;
            println!(
                "Wrote {} reviews to {} (fingerprint {})",
                set.len(),
                out.display(),
                set.fingerprint
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Calibrate(CalibrateCommand::Measure { set }) => {
            let engine = judging_engine(&config)?;
            let set = calibration::load_calibration_set(&set)
                .with_context(|| format!("Failed to load calibration set {}", set.display()))?;
            let report = calibration::measure(&engine, &store, &set, config.batch.concurrency).await?;
            print!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
    }
}

enum RunPlan {
    Start(RunSelector),
    Resume(Uuid),
}

async fn rescore(args: RescoreArgs, config: &ScorerConfig, store: ReviewStore) -> Result<ExitCode> {
    let plan = match (args.resume, args.selector()) {
        (Some(run_id), _) => RunPlan::Resume(run_id),
        (None, Some(selector)) => RunPlan::Start(selector),
        (None, None) => {
            bail!("Choose which reviews to rescore: --outdated, --all, --show ID... or --resume RUN_ID")
        }
    };

    let pool = open_database(config).await?;
    let engine = judging_engine(config)?;

    let events = EventBus::new(100);
    let logger = tokio::spawn(log_events(events.subscribe()));

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after in-flight reviews");
            ctrl_c_token.cancel();
        }
    });

    let rescorer = BatchRescorer::new(
        engine,
        store,
        pool,
        config.gate,
        args.concurrency.unwrap_or(config.batch.concurrency),
    )
    .with_events(events)
    .with_cancellation(cancel_token);

    let report = match plan {
        RunPlan::Resume(run_id) => rescorer.resume(run_id).await,
        RunPlan::Start(selector) => {
            rescorer
                .start(selector, args.batch_size.unwrap_or(config.batch.size), args.dry_run)
                .await
        }
    }
    .context("Rescore run failed")?;

    // Closing the bus lets the logger drain and exit
    drop(rescorer);
    let _ = logger.await;

    print_run_report(&report);
    Ok(match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Halted { .. } => ExitCode::from(EXIT_HALTED),
        RunOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    })
}

async fn open_database(config: &ScorerConfig) -> Result<sqlx::SqlitePool> {
    let pool = db::init_database_pool(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let stale = db::runs::mark_stale_runs_interrupted(&pool).await?;
    if stale > 0 {
        warn!(runs = stale, "Marked runs left active by a previous process as interrupted");
    }
    Ok(pool)
}

fn judging_engine(config: &ScorerConfig) -> Result<ReviewEngine> {
    let engine = ReviewEngine::from_config(config);
    if engine.judge_names().is_empty() {
        bail!("No judge has an API key; set ANTHROPIC_API_KEY, OPENAI_API_KEY or GEMINI_API_KEY");
    }
    info!(judges = ?engine.judge_names(), prompt_version = %engine.prompt_version(), "Judges ready");
    Ok(engine)
}

async fn log_events(mut rx: broadcast::Receiver<RescoreEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &RescoreEvent) {
    match event {
        RescoreEvent::RunStarted {
            run_id,
            prompt_version,
            total_reviews,
            total_batches,
            resumed_from_batch,
            dry_run,
            ..
        } => info!(
            %run_id,
            %prompt_version,
            total_reviews,
            total_batches,
            resumed_from_batch,
            dry_run,
            "Run started"
        ),
        RescoreEvent::BatchLoaded {
            batch_index, reviews, ..
        } => info!(batch_index, reviews, "Batch loaded"),
        RescoreEvent::BatchScored {
            batch_index,
            scored,
            rejected,
            unscored,
            duration_ms,
            ..
        } => info!(batch_index, scored, rejected, unscored, duration_ms, "Batch scored"),
        RescoreEvent::BatchValidated {
            batch_index,
            agreement_rate,
            average_spread,
            needs_review_rate,
            failure_rate,
            passed,
            ..
        } => info!(
            batch_index,
            ?agreement_rate,
            ?average_spread,
            ?needs_review_rate,
            ?failure_rate,
            passed,
            "Batch validated"
        ),
        RescoreEvent::BatchCommitted {
            batch_index,
            batches_committed,
            total_batches,
            ..
        } => info!(batch_index, batches_committed, total_batches, "Batch committed"),
        RescoreEvent::RunHalted {
            run_id,
            batch_index,
            reason,
            ..
        } => warn!(%run_id, batch_index, %reason, "Run halted by validation gate"),
        RescoreEvent::RunCompleted {
            run_id,
            batches_committed,
            ..
        } => info!(%run_id, batches_committed, "Run completed"),
        RescoreEvent::RunInterrupted {
            run_id,
            batches_committed,
            ..
        } => warn!(%run_id, batches_committed, "Run interrupted"),
    }
}

fn print_run_report(report: &RunReport) {
    let run = &report.run;
    println!(
        "Run {} [{}] prompt {}: {} reviews, {}/{} batches committed{}",
        run.run_id,
        run.state,
        run.prompt_version,
        run.total_reviews,
        run.batches_committed,
        run.total_batches(),
        if run.dry_run { " (dry run)" } else { "" }
    );
    for batch in &report.batches {
        println!(
            "  batch {:>3}: {} reviews, {} scored, {} rejected, {} unscored, gate {}{}",
            batch.batch_index,
            batch.reviews,
            batch.scored,
            batch.rejected,
            batch.unscored,
            if batch.verdict.passed() { "passed" } else { "FAILED" },
            if batch.committed { ", committed" } else { "" }
        );
    }
    match &report.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Halted { batch_index, reason } => {
            println!("Halted at batch {}: {}", batch_index, reason);
            println!("Resume with: bwms-scorer rescore --resume {}", run.run_id);
        }
        RunOutcome::Interrupted => {
            println!("Interrupted. Resume with: bwms-scorer rescore --resume {}", run.run_id);
        }
    }
}
