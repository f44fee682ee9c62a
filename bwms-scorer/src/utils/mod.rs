//! Utility modules for bwms-scorer

pub mod db_retry;
pub mod retry;

pub use db_retry::retry_on_lock;
pub use retry::RetryPolicy;
