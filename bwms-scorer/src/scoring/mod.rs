// Review scoring pipeline
//
// Tier architecture:
// - Each tier consists of independent concepts (modules with one purpose)
// - Explicit synchronizations (data contracts in `types`) between tiers
// - Every decision is traceable through `scoreSource` and the stored ensemble

//! # Review Scoring Pipeline
//!
//! ## Tier 1: Independent Signal Sources
//! - `context_builder` - One judge payload per review
//! - `anthropic_judge`, `openai_judge`, `gemini_judge` - Provider adapters behind `ModelJudge`
//! - `response_parser` - Tolerant parsing of judge output into a verdict
//! - `explicit_rating` - Stars, "out of", slash and letter-grade ratings in the text
//!
//! ## Tier 2: Reconciliation & Resolution
//! - `ensemble_reconciler` - Bucket-first agreement across judges
//! - `hierarchy_resolver` - Which signal produces the final score
//!
//! ## Tier 3: Batch Validation
//! - `batch_validator` - Gate metrics and thresholds for one batch
//!
//! ## Orchestration
//! - `review_engine` - Tiers 1-2 for one review, with failure isolation
//! - `batch_rescorer` - Checkpointed batch state machine with the Tier 3 gate

pub mod tier1;
pub mod tier2;
pub mod tier3;
pub mod review_engine;
pub mod batch_rescorer;

// Shared types and data contracts between tiers
pub mod types;
