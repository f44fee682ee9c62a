// Tier 3: Batch Validation
//
// Validators run over a whole scored batch before anything is written back.
// A failed gate is the only condition that halts a rescoring run.
//
// Contract: accepts per-review ReviewStats, returns BatchMetrics + GateVerdict

pub mod batch_validator;

pub use batch_validator::{BatchMetrics, BatchValidator, GateBreach, GateVerdict, Metric, ReviewStats};
