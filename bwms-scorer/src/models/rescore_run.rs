//! Rescoring run state machine
//!
//! A run walks the corpus in fixed-size batches:
//! IDLE → LOADING_BATCH → SCORING_BATCH → VALIDATING_BATCH → COMMITTING_BATCH → LOADING_BATCH …
//! A failed validation gate ends the run in HALTED; nothing of that batch is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Rescoring run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    LoadingBatch,
    ScoringBatch,
    ValidatingBatch,
    CommittingBatch,
    /// Validation gate failed; needs human intervention
    Halted,
    Completed,
    /// Stopped by the operator between reviews; resumable
    Interrupted,
    /// Every committed batch was restored to its prior values
    RolledBack,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::LoadingBatch => "LOADING_BATCH",
            Self::ScoringBatch => "SCORING_BATCH",
            Self::ValidatingBatch => "VALIDATING_BATCH",
            Self::CommittingBatch => "COMMITTING_BATCH",
            Self::Halted => "HALTED",
            Self::Completed => "COMPLETED",
            Self::Interrupted => "INTERRUPTED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(raw: &str) -> Option<RunState> {
        [
            Self::Idle,
            Self::LoadingBatch,
            Self::ScoringBatch,
            Self::ValidatingBatch,
            Self::CommittingBatch,
            Self::Halted,
            Self::Completed,
            Self::Interrupted,
            Self::RolledBack,
        ]
        .into_iter()
        .find(|s| s.as_str() == raw)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Halted | Self::Completed | Self::Interrupted | Self::RolledBack
        )
    }

    /// Legal successor states
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, LoadingBatch) => true,
            (LoadingBatch, ScoringBatch | Completed) => true,
            (ScoringBatch, ValidatingBatch) => true,
            (ValidatingBatch, CommittingBatch | Halted) => true,
            // Dry runs skip the commit
            (ValidatingBatch, LoadingBatch) => true,
            (CommittingBatch, LoadingBatch) => true,
            // Resume
            (Interrupted | Halted, Idle) => true,
            (Halted | Completed | Interrupted, RolledBack) => true,
            (state, Interrupted) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reviews a run covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunSelector {
    /// Reviews never scored, scored under another prompt version, or flagged needsRescore
    Outdated,
    All,
    Shows { show_ids: Vec<String> },
}

impl fmt::Display for RunSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outdated => f.write_str("outdated"),
            Self::All => f.write_str("all"),
            Self::Shows { show_ids } => write!(f, "shows:{}", show_ids.join(",")),
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTransition {
    pub run_id: Uuid,
    pub old_state: RunState,
    pub new_state: RunState,
    pub transitioned_at: DateTime<Utc>,
}

/// One rescoring run (persisted in `rescore_runs`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescoreRun {
    pub run_id: Uuid,
    pub prompt_version: String,
    pub selector: RunSelector,
    pub batch_size: usize,
    pub dry_run: bool,
    pub state: RunState,
    pub total_reviews: usize,
    pub batches_committed: usize,
    pub halt_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RescoreRun {
    pub fn new(prompt_version: &str, selector: RunSelector, batch_size: usize, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            prompt_version: prompt_version.to_string(),
            selector,
            batch_size: batch_size.max(1),
            dry_run,
            state: RunState::Idle,
            total_reviews: 0,
            batches_committed: 0,
            halt_reason: None,
            started_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn total_batches(&self) -> usize {
        self.total_reviews.div_ceil(self.batch_size)
    }

    /// Next batch to load, or `None` when every batch is done
    pub fn next_batch(&self) -> Option<usize> {
        (self.batches_committed < self.total_batches()).then_some(self.batches_committed)
    }

    /// Transition to a new state
    ///
    /// Illegal transitions are logged and still applied; callers drive the
    /// machine in a fixed order, so a warning here means a logic error
    /// rather than bad input.
    pub fn transition_to(&mut self, new_state: RunState) -> RunTransition {
        if !self.state.can_transition_to(new_state) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %self.state,
                to = %new_state,
                "Unexpected run state transition"
            );
        }

        let now = Utc::now();
        let transition = RunTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: now,
        };
        self.state = new_state;
        self.updated_at = now;

        if new_state.is_terminal() {
            self.ended_at = Some(now);
        } else {
            self.ended_at = None;
        }

        transition
    }

    pub fn halt(&mut self, reason: String) -> RunTransition {
        self.halt_reason = Some(reason);
        self.transition_to(RunState::Halted)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_arithmetic() {
        let mut run = RescoreRun::new("v2", RunSelector::All, 200, false);
        assert_eq!(run.total_batches(), 0);
        assert_eq!(run.next_batch(), None);

        run.total_reviews = 401;
        assert_eq!(run.total_batches(), 3);
        assert_eq!(run.next_batch(), Some(0));

        run.batches_committed = 3;
        assert_eq!(run.next_batch(), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = RescoreRun::new("v2", RunSelector::Outdated, 10, false);
        for state in [
            RunState::LoadingBatch,
            RunState::ScoringBatch,
            RunState::ValidatingBatch,
            RunState::CommittingBatch,
            RunState::LoadingBatch,
            RunState::Completed,
        ] {
            assert!(run.state.can_transition_to(state), "{} → {}", run.state, state);
            run.transition_to(state);
        }
        assert!(run.is_terminal());
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn test_halt_records_reason() {
        let mut run = RescoreRun::new("v2", RunSelector::All, 10, false);
        run.transition_to(RunState::LoadingBatch);
        run.transition_to(RunState::ScoringBatch);
        run.transition_to(RunState::ValidatingBatch);
        let transition = run.halt("agreement_rate 0.400 breaches 0.550".to_string());
        assert_eq!(transition.old_state, RunState::ValidatingBatch);
        assert_eq!(run.state, RunState::Halted);
        assert!(!RunState::Halted.can_transition_to(RunState::LoadingBatch));
    }

    #[test]
    fn test_state_names_round_trip() {
        for name in ["IDLE", "SCORING_BATCH", "HALTED", "ROLLED_BACK"] {
            assert_eq!(RunState::parse(name).map(RunState::as_str), Some(name));
        }
        assert_eq!(
            serde_json::to_string(&RunState::ValidatingBatch).unwrap(),
            "\"VALIDATING_BATCH\""
        );
    }
}
