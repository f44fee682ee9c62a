//! Services over the review corpus
//!
//! - `review_store` - JSON file per review, atomic writes
//! - `audit` - Score-source distribution report
//! - `calibration` - Stratified reference sample and judge agreement measurement
//! - `overrides` - Editor override management
//! - `rollback` - Restore a run's committed reviews

pub mod audit;
pub mod calibration;
pub mod overrides;
pub mod review_store;
pub mod rollback;

pub use audit::AuditReport;
pub use calibration::CalibrationReport;
pub use review_store::ReviewStore;
pub use rollback::{rollback_run, RollbackSummary};
