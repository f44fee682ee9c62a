//! Calibration set
//!
//! A fixed, stratified sample of already-scored reviews used to measure a
//! prompt or model change before it is rolled out. Once written a set is
//! immutable; the fingerprint over its members and reference scores detects
//! edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::review::ReviewId;
use crate::scoring::types::{Bucket, ScoreSource};

/// One sampled review with the score it had when sampled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationEntry {
    pub review_id: ReviewId,
    pub show_id: String,
    pub outlet_tier: Option<u8>,
    pub reference_score: f64,
    pub reference_bucket: Bucket,
    pub reference_source: ScoreSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSet {
    pub created_at: DateTime<Utc>,
    pub seed: u64,
    /// Prompt version the reference scores were produced under (most common)
    pub reference_prompt_version: String,
    pub entries: Vec<CalibrationEntry>,
    /// Hex SHA-256 over the ordered entries
    pub fingerprint: String,
}

impl CalibrationSet {
    pub fn new(seed: u64, reference_prompt_version: String, mut entries: Vec<CalibrationEntry>) -> Self {
        entries.sort_by(|a, b| a.review_id.cmp(&b.review_id));
        let fingerprint = Self::compute_fingerprint(&entries);
        Self {
            created_at: Utc::now(),
            seed,
            reference_prompt_version,
            entries,
            fingerprint,
        }
    }

    pub fn compute_fingerprint(entries: &[CalibrationEntry]) -> String {
        let mut hasher = Sha256::new();
        for entry in entries {
            hasher.update(entry.review_id.as_bytes());
            hasher.update(b"\t");
            hasher.update(format!("{:.1}", entry.reference_score).as_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// True when entries still match the stored fingerprint
    pub fn verify(&self) -> bool {
        Self::compute_fingerprint(&self.entries) == self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
