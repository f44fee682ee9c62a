//! Calibration set builder and measurement
//!
//! `build` draws a stratified (bucket × outlet tier) sample of scored reviews
//! with a fixed seed. `measure` scores the sample with the current judges,
//! never writing to the corpus, and compares each judge with the reference.

use bwms_common::{Error, Result};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::models::calibration::{CalibrationEntry, CalibrationSet};
use crate::models::review::ReviewRecord;
use crate::scoring::review_engine::ReviewEngine;
use crate::scoring::types::{Bucket, BucketTable};
use crate::services::review_store::ReviewStore;

pub const DEFAULT_SET_SIZE: usize = 200;

/// Draw a stratified sample of scored reviews
///
/// Strata are (reference bucket, outlet tier). Each stratum is shuffled with
/// the seeded RNG, then strata are drained round-robin so small strata are
/// represented before large ones dominate.
pub fn build_calibration_set(
    records: &[ReviewRecord],
    buckets: &BucketTable,
    size: usize,
    seed: u64,
) -> CalibrationSet {
    let mut strata: BTreeMap<(Bucket, Option<u8>), Vec<CalibrationEntry>> = BTreeMap::new();
    let mut versions: BTreeMap<&str, usize> = BTreeMap::new();

    for record in records {
        let Some(scoring) = &record.scoring else {
            continue;
        };
        *versions.entry(scoring.prompt_version.as_str()).or_default() += 1;
        let bucket = buckets.bucket_for(scoring.final_score);
        strata
            .entry((bucket, record.outlet_tier))
            .or_default()
            .push(CalibrationEntry {
                review_id: record.id.clone(),
                show_id: record.show_id.clone(),
                outlet_tier: record.outlet_tier,
                reference_score: scoring.final_score,
                reference_bucket: bucket,
                reference_source: scoring.score_source,
            });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut pools: Vec<Vec<CalibrationEntry>> = strata
        .into_values()
        .map(|mut entries| {
            entries.sort_by(|a, b| a.review_id.cmp(&b.review_id));
            entries.shuffle(&mut rng);
            entries
        })
        .collect();

    let mut sample = Vec::with_capacity(size);
    while sample.len() < size && pools.iter().any(|p| !p.is_empty()) {
        for pool in pools.iter_mut() {
            if sample.len() >= size {
                break;
            }
            if let Some(entry) = pool.pop() {
                sample.push(entry);
            }
        }
    }

    let reference_version = versions
        .into_iter()
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then(vb.cmp(va)))
        .map(|(v, _)| v.to_string())
        .unwrap_or_default();

    CalibrationSet::new(seed, reference_version, sample)
}

/// Write a calibration set once
///
/// # Errors
/// `InvalidInput` when the file exists and `force` is false.
pub fn write_calibration_set(set: &CalibrationSet, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::InvalidInput(format!(
            "Calibration set {} already exists; pass --force to replace it",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, serde_json::to_string_pretty(set)?)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a calibration set and check its fingerprint
pub fn load_calibration_set(path: &Path) -> Result<CalibrationSet> {
    let content = std::fs::read_to_string(path)?;
    let set: CalibrationSet = serde_json::from_str(&content)?;
    if !set.verify() {
        return Err(Error::InvalidInput(format!(
            "Calibration set {} does not match its fingerprint",
            path.display()
        )));
    }
    Ok(set)
}

/// Agreement of one judge with the reference buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeAgreement {
    pub scored: usize,
    pub agreeing: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl JudgeAgreement {
    pub fn rate(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.agreeing as f64 / self.scored as f64)
    }
}

/// Mean signed difference (ensemble − reference)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bias {
    pub samples: usize,
    pub total: f64,
}

impl Bias {
    pub fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.total / self.samples as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub prompt_version: String,
    pub reviews: usize,
    pub missing: usize,
    pub per_judge: BTreeMap<String, JudgeAgreement>,
    /// "judgeA/judgeB" → (both scored, same bucket)
    pub pairwise: BTreeMap<String, (usize, usize)>,
    /// Reference bucket → ensemble bias
    pub bias_by_bucket: BTreeMap<Bucket, Bias>,
    pub final_bucket_agreement: JudgeAgreement,
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |rate: Option<f64>| rate.map_or("n/a".to_string(), |r| format!("{:.1}%", r * 100.0));

        writeln!(
            f,
            "Calibration against prompt {} ({} reviews, {} missing)",
            self.prompt_version, self.reviews, self.missing
        )?;
        writeln!(f, "Per-judge bucket agreement with reference:")?;
        for (judge, agreement) in &self.per_judge {
            writeln!(
                f,
                "  {:<10} {:>7}  ({} scored, {} rejected, {} failed)",
                judge,
                pct(agreement.rate()),
                agreement.scored,
                agreement.rejected,
                agreement.failed
            )?;
        }
        writeln!(
            f,
            "  {:<10} {:>7}",
            "final",
            pct(self.final_bucket_agreement.rate())
        )?;
        writeln!(f, "Pairwise judge agreement:")?;
        for (pair, (both, same)) in &self.pairwise {
            let rate = (*both > 0).then(|| *same as f64 / *both as f64);
            writeln!(f, "  {:<20} {:>7}  ({} shared)", pair, pct(rate), both)?;
        }
        writeln!(f, "Mean signed bias by reference bucket:")?;
        for (bucket, bias) in &self.bias_by_bucket {
            match bias.mean() {
                Some(mean) => writeln!(f, "  {:<10} {:+.1}  (n={})", bucket.label(), mean, bias.samples)?,
                None => writeln!(f, "  {:<10} n/a", bucket.label())?,
            }
        }
        Ok(())
    }
}

/// Score a calibration set without committing and compare with the reference
pub async fn measure(
    engine: &ReviewEngine,
    store: &ReviewStore,
    set: &CalibrationSet,
    concurrency: usize,
) -> Result<CalibrationReport> {
    let mut report = CalibrationReport {
        prompt_version: engine.prompt_version().to_string(),
        ..CalibrationReport::default()
    };

    let mut records = Vec::with_capacity(set.len());
    for entry in &set.entries {
        match store.load(&entry.review_id).await {
            Ok(record) => records.push((entry, record)),
            Err(e) => {
                tracing::warn!(review_id = %entry.review_id, error = %e, "Calibration review missing");
                report.missing += 1;
            }
        }
    }

    let scorings: Vec<_> = stream::iter(records.iter())
        .map(|(entry, record)| async move { (*entry, engine.score(record).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (entry, scoring) in scorings {
        report.reviews += 1;
        let reference = entry.reference_bucket;

        let mut buckets_by_judge: BTreeMap<String, Bucket> = BTreeMap::new();
        for outcome in &scoring.outcomes {
            let agreement = report.per_judge.entry(outcome.judge.clone()).or_default();
            match &outcome.result {
                Err(_) => agreement.failed += 1,
                Ok(result) => match result.scored() {
                    Some((bucket, _, _)) => {
                        agreement.scored += 1;
                        if bucket == reference {
                            agreement.agreeing += 1;
                        }
                        buckets_by_judge.insert(outcome.judge.clone(), bucket);
                    }
                    None => agreement.rejected += 1,
                },
            }
        }

        let judges: Vec<(&String, &Bucket)> = buckets_by_judge.iter().collect();
        for (i, (a, bucket_a)) in judges.iter().enumerate() {
            for (b, bucket_b) in judges.iter().skip(i + 1) {
                let pair = report.pairwise.entry(format!("{}/{}", a, b)).or_default();
                pair.0 += 1;
                if bucket_a == bucket_b {
                    pair.1 += 1;
                }
            }
        }

        match scoring.resolution.scored() {
            Some(scored) => {
                report.final_bucket_agreement.scored += 1;
                if scored.final_bucket == reference {
                    report.final_bucket_agreement.agreeing += 1;
                }
                let bias = report.bias_by_bucket.entry(reference).or_default();
                bias.samples += 1;
                bias.total += scored.final_score - entry.reference_score;
            }
            None => report.final_bucket_agreement.rejected += 1,
        }
    }

    Ok(report)
}
