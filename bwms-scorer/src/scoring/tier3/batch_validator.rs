// Tier 3: Batch Validation Gate
//
// Concept: Decide whether a freshly scored batch is safe to commit
// Synchronization: Accepts per-review ReviewStats, returns BatchMetrics + GateVerdict
//
// Metrics (each computed over its own sample):
// - agreement rate:     reviews where ≥2 judges share a bucket / reviews with ≥2 usable judge scores
// - average spread:     mean max-min spread inside the agreeing group / agreeing reviews
// - needs-review rate:  scored reviews flagged needsReview / scored reviews
// - failure rate:       failed judge calls / judge calls
//
// A metric whose sample is smaller than `min_sample` is reported but never gates.

use crate::config::GateConfig;
use crate::scoring::types::{Bucket, JudgeOutcome, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What one review contributed to the batch metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub judge_calls: usize,
    pub failed_calls: usize,
    /// Judges that returned a usable score (not rejected, not failed)
    pub usable_scores: usize,
    /// Size of the largest group of judges sharing a bucket
    pub largest_group: usize,
    /// Spread inside that group when it has two or more members
    pub agreeing_spread: Option<f64>,
    pub scored: bool,
    pub needs_review: bool,
}

impl ReviewStats {
    pub fn from_outcomes(outcomes: &[JudgeOutcome], resolution: &Resolution) -> Self {
        let mut groups: BTreeMap<Bucket, Vec<f64>> = BTreeMap::new();
        let mut failed_calls = 0;
        for outcome in outcomes {
            match &outcome.result {
                Ok(result) => {
                    if let Some((bucket, score, _)) = result.scored() {
                        groups.entry(bucket).or_default().push(score);
                    }
                }
                Err(_) => failed_calls += 1,
            }
        }

        let usable_scores = groups.values().map(Vec::len).sum();
        let largest = groups.values().max_by_key(|scores| scores.len());
        let largest_group = largest.map_or(0, Vec::len);
        let agreeing_spread = largest.filter(|scores| scores.len() >= 2).map(|scores| {
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            let min = scores.iter().copied().fold(f64::MAX, f64::min);
            max - min
        });

        let scored = resolution.scored();
        Self {
            judge_calls: outcomes.len(),
            failed_calls,
            usable_scores,
            largest_group,
            agreeing_spread,
            scored: scored.is_some(),
            needs_review: scored.is_some_and(|s| s.needs_review),
        }
    }

    /// Two or more usable judge scores, so agreement is measurable
    pub fn is_multi_judge(&self) -> bool {
        self.usable_scores >= 2
    }

    pub fn judges_agree(&self) -> bool {
        self.largest_group >= 2
    }
}

/// Ratio with its sample size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub value: Option<f64>,
    pub sample: usize,
}

impl Metric {
    fn ratio(numerator: usize, denominator: usize) -> Self {
        Self {
            value: (denominator > 0).then(|| numerator as f64 / denominator as f64),
            sample: denominator,
        }
    }

    fn mean(values: &[f64]) -> Self {
        Self {
            value: (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64),
            sample: values.len(),
        }
    }

    /// Value, when the sample is large enough to gate on
    fn gated(&self, min_sample: usize) -> Option<f64> {
        self.value.filter(|_| self.sample >= min_sample)
    }
}

/// Aggregate metrics for one scored batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub reviews: usize,
    pub scored: usize,
    pub agreement_rate: Metric,
    pub average_spread: Metric,
    pub needs_review_rate: Metric,
    pub failure_rate: Metric,
}

impl BatchMetrics {
    pub fn compute(stats: &[ReviewStats]) -> Self {
        let multi_judge = stats.iter().filter(|s| s.is_multi_judge()).count();
        let agreeing = stats
            .iter()
            .filter(|s| s.is_multi_judge() && s.judges_agree())
            .count();
        let spreads: Vec<f64> = stats.iter().filter_map(|s| s.agreeing_spread).collect();
        let scored = stats.iter().filter(|s| s.scored).count();
        let flagged = stats.iter().filter(|s| s.scored && s.needs_review).count();
        let calls: usize = stats.iter().map(|s| s.judge_calls).sum();
        let failed: usize = stats.iter().map(|s| s.failed_calls).sum();

        Self {
            reviews: stats.len(),
            scored,
            agreement_rate: Metric::ratio(agreeing, multi_judge),
            average_spread: Metric::mean(&spreads),
            needs_review_rate: Metric::ratio(flagged, scored),
            failure_rate: Metric::ratio(failed, calls),
        }
    }
}

/// One threshold a batch crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateBreach {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
}

impl fmt::Display for GateBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.3} breaches {:.3}", self.metric, self.value, self.threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub breaches: Vec<GateBreach>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.breaches.is_empty()
    }

    /// Human-readable halt reason
    pub fn summary(&self) -> String {
        self.breaches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Batch validation gate (Tier 3 concept)
#[derive(Debug, Clone, Copy)]
pub struct BatchValidator {
    config: GateConfig,
}

impl BatchValidator {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, metrics: &BatchMetrics) -> GateVerdict {
        let min = self.config.min_sample;
        let mut breaches = Vec::new();

        if let Some(rate) = metrics.agreement_rate.gated(min) {
            if rate < self.config.agreement_floor {
                breaches.push(breach("agreement_rate", rate, self.config.agreement_floor));
            }
        }
        if let Some(spread) = metrics.average_spread.gated(min) {
            if spread > self.config.spread_ceiling {
                breaches.push(breach("average_spread", spread, self.config.spread_ceiling));
            }
        }
        if let Some(rate) = metrics.needs_review_rate.gated(min) {
            if rate > self.config.needs_review_ceiling {
                breaches.push(breach("needs_review_rate", rate, self.config.needs_review_ceiling));
            }
        }
        if let Some(rate) = metrics.failure_rate.gated(min) {
            if rate > self.config.failure_ceiling {
                breaches.push(breach("failure_rate", rate, self.config.failure_ceiling));
            }
        }

        GateVerdict { breaches }
    }
}

fn breach(metric: &str, value: f64, threshold: f64) -> GateBreach {
    GateBreach {
        metric: metric.to_string(),
        value,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::types::{Confidence, JudgeError, JudgeVerdict, ModelJudgeResult};
    use std::time::Duration;

    fn agreeing(spread: f64) -> ReviewStats {
        ReviewStats {
            judge_calls: 3,
            failed_calls: 0,
            usable_scores: 3,
            largest_group: 3,
            agreeing_spread: Some(spread),
            scored: true,
            needs_review: false,
        }
    }

    fn split() -> ReviewStats {
        ReviewStats {
            judge_calls: 3,
            failed_calls: 0,
            usable_scores: 3,
            largest_group: 1,
            agreeing_spread: None,
            scored: true,
            needs_review: true,
        }
    }

    #[test]
    fn test_low_agreement_breaches_floor() {
        // 40% agreement against a 55% floor
        let mut stats: Vec<ReviewStats> = (0..80).map(|_| agreeing(4.0)).collect();
        stats.extend((0..120).map(|_| split()));
        let metrics = BatchMetrics::compute(&stats);
        assert_eq!(metrics.agreement_rate.value, Some(0.4));

        let verdict = BatchValidator::new(GateConfig::default()).evaluate(&metrics);
        assert!(!verdict.passed());
        assert!(verdict.breaches.iter().any(|b| b.metric == "agreement_rate"));
        assert!(verdict.summary().contains("agreement_rate"));
    }

    #[test]
    fn test_healthy_batch_passes() {
        let stats: Vec<ReviewStats> = (0..50).map(|_| agreeing(5.0)).collect();
        let metrics = BatchMetrics::compute(&stats);
        assert_eq!(metrics.average_spread.value, Some(5.0));
        assert_eq!(metrics.failure_rate.value, Some(0.0));
        assert!(BatchValidator::new(GateConfig::default()).evaluate(&metrics).passed());
    }

    #[test]
    fn test_failure_ceiling() {
        let stats: Vec<ReviewStats> = (0..10)
            .map(|_| ReviewStats {
                failed_calls: 2,
                usable_scores: 1,
                largest_group: 1,
                agreeing_spread: None,
                ..agreeing(0.0)
            })
            .collect();
        let verdict = BatchValidator::new(GateConfig::default()).evaluate(&BatchMetrics::compute(&stats));
        assert!(verdict.breaches.iter().any(|b| b.metric == "failure_rate"));
    }

    #[test]
    fn test_small_sample_reported_not_gated() {
        let stats = vec![split(), split()];
        let metrics = BatchMetrics::compute(&stats);
        assert_eq!(metrics.agreement_rate.value, Some(0.0));
        assert_eq!(metrics.agreement_rate.sample, 2);
        assert!(BatchValidator::new(GateConfig::default()).evaluate(&metrics).passed());
    }

    #[test]
    fn test_stats_from_outcomes() {
        let scored = |judge: &str, bucket, score| JudgeOutcome {
            judge: judge.to_string(),
            model: "m".to_string(),
            attempts: 1,
            result: Ok(ModelJudgeResult {
                judge: judge.to_string(),
                model: "m".to_string(),
                verdict: JudgeVerdict::Scored {
                    bucket,
                    score,
                    confidence: Confidence::High,
                    rationale: String::new(),
                    key_quote: None,
                    clamped: false,
                },
            }),
        };
        let outcomes = vec![
            scored("a", Bucket::Negative, 45.0),
            scored("b", Bucket::Negative, 52.0),
            JudgeOutcome {
                judge: "c".to_string(),
                model: "m".to_string(),
                attempts: 2,
                result: Err(JudgeError::Timeout(Duration::from_secs(1))),
            },
        ];
        let stats = ReviewStats::from_outcomes(
            &outcomes,
            &Resolution::Unscored {
                reason: "test".to_string(),
            },
        );
        assert_eq!(stats.judge_calls, 3);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.usable_scores, 2);
        assert!(stats.judges_agree());
        assert_eq!(stats.agreeing_spread, Some(7.0));
        assert!(!stats.scored);
    }
}
