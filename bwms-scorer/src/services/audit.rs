//! Corpus audit report
//!
//! Read-only summary of where every review's score came from.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::review::ReviewRecord;
use crate::scoring::types::{RejectionReason, ScoreSource};

/// Counts for one prompt version
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VersionCounts {
    pub scored: usize,
    pub rejected: usize,
    pub needs_review: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub reviews: usize,
    pub unreadable: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_rejection: BTreeMap<String, usize>,
    pub needs_review: usize,
    pub needs_rescore: usize,
    pub rejected: usize,
    pub unscored: usize,
    pub human_overrides: usize,
    pub by_prompt_version: BTreeMap<String, VersionCounts>,
}

impl AuditReport {
    pub fn from_records(records: &[ReviewRecord]) -> Self {
        let mut report = AuditReport {
            reviews: records.len(),
            by_source: ScoreSource::ALL
                .into_iter()
                .map(|s| (s.tag().to_string(), 0))
                .collect(),
            ..AuditReport::default()
        };

        for record in records {
            if record.needs_rescore {
                report.needs_rescore += 1;
            }
            if record.human_override.is_some() {
                report.human_overrides += 1;
            }

            match (&record.scoring, &record.quality.rejection) {
                (Some(scoring), _) => {
                    *report
                        .by_source
                        .entry(scoring.score_source.tag().to_string())
                        .or_default() += 1;
                    let version = report
                        .by_prompt_version
                        .entry(scoring.prompt_version.clone())
                        .or_default();
                    version.scored += 1;
                    if scoring.needs_review {
                        report.needs_review += 1;
                        version.needs_review += 1;
                    }
                }
                (None, Some(rejection)) => {
                    report.rejected += 1;
                    *report
                        .by_rejection
                        .entry(rejection.reason.as_str().to_string())
                        .or_default() += 1;
                    report
                        .by_prompt_version
                        .entry(rejection.prompt_version.clone())
                        .or_default()
                        .rejected += 1;
                }
                (None, None) => report.unscored += 1,
            }
        }

        report
    }

    pub fn rejected_for(&self, reason: RejectionReason) -> usize {
        self.by_rejection.get(reason.as_str()).copied().unwrap_or(0)
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reviews: {}", self.reviews)?;
        if self.unreadable > 0 {
            writeln!(f, "Unreadable files: {}", self.unreadable)?;
        }
        writeln!(f, "Score sources:")?;
        for (source, count) in &self.by_source {
            writeln!(f, "  {:<28} {:>6}", source, count)?;
        }
        writeln!(f, "Rejected: {}", self.rejected)?;
        for (reason, count) in &self.by_rejection {
            writeln!(f, "  {:<28} {:>6}", reason, count)?;
        }
        writeln!(f, "Unscored: {}", self.unscored)?;
        writeln!(f, "Needs review: {}", self.needs_review)?;
        writeln!(f, "Needs rescore: {}", self.needs_rescore)?;
        writeln!(f, "Human overrides: {}", self.human_overrides)?;
        writeln!(f, "By prompt version:")?;
        for (version, counts) in &self.by_prompt_version {
            writeln!(
                f,
                "  {:<12} scored {:>6}  rejected {:>6}  needs review {:>6}",
                version, counts.scored, counts.rejected, counts.needs_review
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::review::HumanOverride;
    use crate::scoring::types::{Bucket, Confidence, ScoredReview};
    use chrono::Utc;

    fn scored(source: ScoreSource, version: &str, needs_review: bool) -> ScoredReview {
        ScoredReview {
            final_score: 80.0,
            final_bucket: Bucket::Positive,
            score_source: source,
            prompt_version: version.to_string(),
            confidence: Confidence::High,
            needs_review,
            explicit_rating: None,
            ensemble: None,
            scored_at: Utc::now(),
            previous_score: None,
            previous_version: None,
            previous_source: None,
        }
    }

    #[test]
    fn test_counts() {
        let mut a = ReviewRecord::new("show", "a", "Critic");
        a.scoring = Some(scored(ScoreSource::ExplicitStars, "v2", true));

        let mut b = ReviewRecord::new("show", "b", "Critic");
        b.scoring = Some(scored(ScoreSource::ThumbOnly, "v1", false));
        b.needs_rescore = true;
        b.human_override = Some(HumanOverride {
            score: 50.0,
            note: None,
            set_by: None,
            set_at: None,
        });

        let mut c = ReviewRecord::new("show", "c", "Critic");
        c.quality.apply_rejection(RejectionReason::NotAReview, "v2");

        let d = ReviewRecord::new("show", "d", "Critic");

        let report = AuditReport::from_records(&[a, b, c, d]);
        assert_eq!(report.reviews, 4);
        assert_eq!(report.by_source["explicit-stars"], 1);
        assert_eq!(report.by_source["thumb-only"], 1);
        assert_eq!(report.by_source["humanOverride"], 0);
        assert_eq!(report.needs_review, 1);
        assert_eq!(report.needs_rescore, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.rejected_for(RejectionReason::NotAReview), 1);
        assert_eq!(report.unscored, 1);
        assert_eq!(report.human_overrides, 1);
        assert_eq!(report.by_prompt_version["v2"].scored, 1);
        assert_eq!(report.by_prompt_version["v2"].rejected, 1);
        assert_eq!(report.by_prompt_version["v1"].scored, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["unscored"], 1);
        assert!(report.to_string().contains("Needs rescore: 1"));
    }
}
