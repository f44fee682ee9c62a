// Tier 2: Ensemble Reconciliation via Bucket Voting
//
// Concept: Combine up to three judge verdicts into one consensus result
// Synchronization: Accepts Vec<ModelJudgeResult> (successful judge calls only), outputs EnsembleOutcome
//
// Algorithm:
// 1. Two or more rejections → rejected (most frequent reason, precedence breaks ties)
// 2. Otherwise drop rejections and group the scored verdicts by bucket
// 3. All in one bucket → unanimous, median score
// 4. A single largest group of two or more → majority, mean of that group
// 5. No shared bucket → no-consensus, mean of all, bucket derived from the mean
// 6. Fewer than three scores → degraded rules (two judges, one judge, none)
//
// Pure function of its inputs: the same verdicts always produce the same result.

use crate::config::EnsembleConfig;
use crate::scoring::types::{
    AgreementLevel, Bucket, BucketTable, Confidence, EnsembleOutcome, EnsembleResult,
    ModelJudgeResult, RejectionReason,
};
use std::collections::BTreeMap;

/// Minimum rejections that reject a review outright
const REJECTION_QUORUM: usize = 2;

/// Ensemble reconciler (Tier 2 concept)
#[derive(Debug, Clone, Copy)]
pub struct EnsembleReconciler {
    config: EnsembleConfig,
    buckets: BucketTable,
}

/// A scored verdict reduced to the numbers voting needs
#[derive(Debug, Clone, Copy)]
struct Vote {
    bucket: Bucket,
    score: f64,
    confidence: Confidence,
}

impl EnsembleReconciler {
    pub fn new(config: EnsembleConfig, buckets: BucketTable) -> Self {
        Self { config, buckets }
    }

    /// Reconcile judge verdicts for one review
    ///
    /// `results` holds only judges that answered; failed calls are absent and
    /// simply lower the judge count.
    pub fn reconcile(&self, mut results: Vec<ModelJudgeResult>) -> EnsembleOutcome {
        // Stable audit order regardless of completion order
        results.sort_by(|a, b| (&a.judge, &a.model).cmp(&(&b.judge, &b.model)));

        let rejections: Vec<RejectionReason> = results.iter().filter_map(|r| r.rejection()).collect();
        if rejections.len() >= REJECTION_QUORUM {
            let reason = consensus_reason(&rejections);
            tracing::debug!(
                rejections = rejections.len(),
                reason = %reason,
                "Rejection consensus reached"
            );
            return EnsembleOutcome::Rejected {
                reason,
                rejections: rejections.len(),
                model_results: results,
            };
        }

        let votes: Vec<Vote> = results
            .iter()
            .filter_map(|r| r.scored())
            .map(|(bucket, score, confidence)| Vote {
                bucket,
                score,
                confidence,
            })
            .collect();

        let result = match votes.len() {
            0 => return EnsembleOutcome::Unscored { model_results: results },
            1 => self.single_judge(votes[0]),
            2 => self.two_judges(votes[0], votes[1]),
            _ => self.vote(&votes),
        };

        EnsembleOutcome::Scored(result.into_result(results))
    }

    fn single_judge(&self, vote: Vote) -> Draft {
        Draft {
            final_bucket: vote.bucket,
            final_score: round1(vote.score),
            agreement_level: AgreementLevel::Degraded { judges: 1 },
            confidence: vote.confidence,
            needs_review: true,
            score_spread: 0.0,
        }
    }

    fn two_judges(&self, a: Vote, b: Vote) -> Draft {
        let final_score = round1(mean(&[a.score, b.score]));
        let spread = (a.score - b.score).abs();

        if a.bucket == b.bucket {
            Draft {
                final_bucket: a.bucket,
                final_score,
                agreement_level: AgreementLevel::Degraded { judges: 2 },
                confidence: a.confidence.min(b.confidence),
                needs_review: spread > self.config.unanimous_spread_threshold,
                score_spread: spread,
            }
        } else {
            Draft {
                final_bucket: self.buckets.bucket_for(final_score),
                final_score,
                agreement_level: AgreementLevel::Degraded { judges: 2 },
                confidence: Confidence::Low,
                needs_review: true,
                score_spread: spread,
            }
        }
    }

    fn vote(&self, votes: &[Vote]) -> Draft {
        let mut groups: BTreeMap<Bucket, Vec<Vote>> = BTreeMap::new();
        for vote in votes {
            groups.entry(vote.bucket).or_default().push(*vote);
        }

        let largest = groups.values().map(Vec::len).max().unwrap_or(0);
        let leaders: Vec<(&Bucket, &Vec<Vote>)> =
            groups.iter().filter(|(_, g)| g.len() == largest).collect();

        match leaders.as_slice() {
            [(bucket, group)] if group.len() == votes.len() => {
                let scores = scores_of(group);
                let spread = spread_of(&scores);
                Draft {
                    final_bucket: **bucket,
                    final_score: round1(median(&scores)),
                    agreement_level: AgreementLevel::Unanimous,
                    confidence: min_confidence(group),
                    needs_review: spread > self.config.unanimous_spread_threshold,
                    score_spread: spread,
                }
            }
            [(bucket, group)] if group.len() >= 2 => {
                let scores = scores_of(group);
                let spread = spread_of(&scores);
                let max_dissent = votes
                    .iter()
                    .filter(|v| v.bucket != **bucket)
                    .map(|v| v.bucket.step_distance(**bucket))
                    .max()
                    .unwrap_or(0);
                let dissent_flag = max_dissent >= self.config.majority_dissent_steps;
                if dissent_flag {
                    tracing::debug!(
                        majority = %bucket,
                        max_dissent,
                        "Majority verdict with review-worthy dissent"
                    );
                }
                Draft {
                    final_bucket: **bucket,
                    final_score: round1(mean(&scores)),
                    agreement_level: AgreementLevel::Majority,
                    confidence: min_confidence(group),
                    needs_review: dissent_flag || spread > self.config.unanimous_spread_threshold,
                    score_spread: spread,
                }
            }
            _ => {
                let scores: Vec<f64> = votes.iter().map(|v| v.score).collect();
                let final_score = round1(mean(&scores));
                Draft {
                    final_bucket: self.buckets.bucket_for(final_score),
                    final_score,
                    agreement_level: AgreementLevel::NoConsensus,
                    confidence: Confidence::Low,
                    needs_review: true,
                    score_spread: spread_of(&scores),
                }
            }
        }
    }
}

/// Ensemble result before the audit trail is attached
struct Draft {
    final_bucket: Bucket,
    final_score: f64,
    agreement_level: AgreementLevel,
    confidence: Confidence,
    needs_review: bool,
    score_spread: f64,
}

impl Draft {
    fn into_result(self, model_results: Vec<ModelJudgeResult>) -> EnsembleResult {
        EnsembleResult {
            final_bucket: self.final_bucket,
            final_score: self.final_score,
            agreement_level: self.agreement_level,
            confidence: self.confidence,
            needs_review: self.needs_review,
            score_spread: round1(self.score_spread),
            model_results,
        }
    }
}

/// Most frequent reason; ties go to the reason with the lowest precedence value
fn consensus_reason(reasons: &[RejectionReason]) -> RejectionReason {
    RejectionReason::ALL
        .into_iter()
        .map(|reason| (reason, reasons.iter().filter(|r| **r == reason).count()))
        .filter(|(_, count)| *count > 0)
        .max_by(|(ra, ca), (rb, cb)| ca.cmp(cb).then(rb.precedence().cmp(&ra.precedence())))
        .map(|(reason, _)| reason)
        .unwrap_or(RejectionReason::GarbageText)
}

fn scores_of(group: &[Vote]) -> Vec<f64> {
    let mut scores: Vec<f64> = group.iter().map(|v| v.score).collect();
    scores.sort_by(f64::total_cmp);
    scores
}

fn min_confidence(group: &[Vote]) -> Confidence {
    group
        .iter()
        .map(|v| v.confidence)
        .min()
        .unwrap_or(Confidence::Low)
}

fn mean(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

/// Median of values sorted ascending
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

fn spread_of(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
