//! Data models for bwms-scorer
//!
//! - Review records as stored in the corpus
//! - Rescoring run state machine
//! - Calibration sets

pub mod calibration;
pub mod rescore_run;
pub mod review;

pub use calibration::{CalibrationEntry, CalibrationSet};
pub use rescore_run::{RescoreRun, RunSelector, RunState, RunTransition};
pub use review::{
    ContentTier, HumanOverride, QualityFlags, ReviewId, ReviewRecord, ScoringSnapshot, ThumbDirection,
};
