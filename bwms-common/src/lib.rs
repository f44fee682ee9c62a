//! # bwms common library
//!
//! Shared code for the review-scoring services:
//! - Error and result types
//! - Configuration file resolution and TOML helpers
//! - Rescoring progress events and the broadcast bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
