// Tier 2: Reconciliation & Resolution
//
// Each module in this tier combines Tier 1 signals into one decision per review.
// The reconciler turns judge verdicts into an ensemble result; the resolver
// weighs that result against explicit ratings, overrides and thumbs.
//
// Contract: pure functions over owned inputs; no I/O, no clocks except scoredAt.

pub mod ensemble_reconciler;
pub mod hierarchy_resolver;

pub use ensemble_reconciler::EnsembleReconciler;
pub use hierarchy_resolver::{HierarchyResolver, ScoringSignals};
