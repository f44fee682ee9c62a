//! bwms-scorer library interface
//!
//! Scores critic reviews with an ensemble of LLM judges and commits them to
//! the corpus in validated, checkpointed batches.

pub mod config;
pub mod db;
pub mod models;
pub mod scoring;
pub mod services;
pub mod utils;

pub use crate::config::ScorerConfig;
pub use crate::scoring::batch_rescorer::{BatchRescorer, RunOutcome, RunReport};
pub use crate::scoring::review_engine::ReviewEngine;
pub use crate::services::ReviewStore;
