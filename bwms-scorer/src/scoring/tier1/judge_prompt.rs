// Tier 1: Judge Instructions
//
// Concept: The system prompt every judge receives, independent of provider
//
// The prompt carries the scoreability gate (step 0), the bucket table, the
// negative-review calibration rule and the response schema. The bucket table
// is rendered from configuration so prompt and validation never drift apart.

use crate::scoring::types::{Bucket, BucketTable};
use std::fmt::Write;

/// Build the judge system prompt for a prompt version and bucket table
pub fn system_prompt(prompt_version: &str, buckets: &BucketTable) -> String {
    let mut prompt = String::with_capacity(4096);

    let _ = writeln!(
        prompt,
        "You are a theater critic's editor scoring one Broadway review (prompt {}).",
        prompt_version
    );
    prompt.push_str(
        "Your job is to measure the CRITIC'S overall verdict on the target production, \
         not your own opinion of the show.\n\n",
    );

    prompt.push_str(STEP_ZERO);
    prompt.push('\n');

    prompt.push_str("STEP 1: SCORE\n");
    prompt.push_str("Pick exactly one bucket, then a score inside that bucket's range:\n");
    for bucket in Bucket::ALL.into_iter().rev() {
        let (lo, hi) = buckets.range(bucket);
        let _ = writeln!(
            prompt,
            "- {} ({}-{}): {}",
            bucket,
            lo as u32,
            hi as u32,
            bucket_guidance(bucket)
        );
    }
    prompt.push('\n');

    prompt.push_str(NEGATIVE_CALIBRATION);
    let (pan_lo, pan_hi) = buckets.range(Bucket::Pan);
    let _ = writeln!(
        prompt,
        "Use the full Pan range ({}-{}): a pan that calls the show not worth attending and cites \
         no redeeming qualities scores 10-20; only a pan that concedes an isolated bright spot \
         belongs in the top of the range ({}-{}).\n",
        pan_lo as u32,
        pan_hi as u32,
        (pan_hi as u32).saturating_sub(9),
        pan_hi as u32
    );

    prompt.push_str(CONFIDENCE_RULES);
    prompt.push('\n');
    prompt.push_str(RESPONSE_SCHEMA);
    prompt
}

fn bucket_guidance(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Rave => "unreserved enthusiasm, a must-see",
        Bucket::Positive => "recommends the show, with minor reservations",
        Bucket::Mixed => "genuinely balanced, praise and criticism in equal measure",
        Bucket::Negative => "does not recommend, despite some merits",
        Bucket::Pan => "dismisses the show",
    }
}

const STEP_ZERO: &str = "\
STEP 0: SCOREABILITY GATE (decide this before scoring)
Reject the input instead of scoring it when it is:
- wrong_show: a review of a different show
- wrong_production: a review of another production of the same title (off-Broadway, touring, regional, a previous revival)
- not_a_review: not evaluative (press release, cast announcement, listing, pure plot summary)
- garbage_text: not an article at all (navigation menus, error or paywall pages, ad copy)
Never guess a score for these four cases.

These are NOT rejections. Score them, and set confidence to \"low\":
- a multi-show roundup: score only the part about the target show; if fewer than ~150 words concern it, confidence is low
- a truncated review: score what exists; confidence is low if the concluding verdict appears cut off
- an excerpt-only review: always low confidence
";

const NEGATIVE_CALIBRATION: &str = "\
CALIBRATION FOR NEGATIVE REVIEWS
Score the critic's net judgment of the show, not its best element. Praise for one performer, \
the design or a single number does not redeem an otherwise negative verdict.
";

const CONFIDENCE_RULES: &str = "\
CONFIDENCE
- high: the verdict is explicit and the whole review is present
- medium: the verdict is clear but hedged, or some text is missing
- low: excerpt-only, truncated before the verdict, roundup with little on the target show, or genuinely ambiguous
";

const RESPONSE_SCHEMA: &str = r#"RESPONSE FORMAT
Reply with a single JSON object and nothing else:
{"scoreable": true|false,
 "rejection": null|"wrong_show"|"wrong_production"|"not_a_review"|"garbage_text",
 "bucket": "Rave"|"Positive"|"Mixed"|"Negative"|"Pan",
 "score": <integer 0-100 inside the bucket's range>,
 "confidence": "high"|"medium"|"low",
 "rationale": "<one or two sentences>",
 "keyQuote": "<the sentence that best states the critic's verdict>"}
When scoreable is false, set rejection and omit bucket and score.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_renders_configured_ranges() {
        let prompt = system_prompt("v7", &BucketTable::default());
        assert!(prompt.contains("prompt v7"));
        assert!(prompt.contains("- Rave (85-100)"));
        assert!(prompt.contains("- Pan (0-34)"));
        assert!(prompt.contains("(25-34)"));
        assert!(prompt.contains("garbage_text"));
        assert!(prompt.find("STEP 0").unwrap() < prompt.find("STEP 1").unwrap());
    }

    #[test]
    fn test_prompt_tracks_custom_table() {
        let table = BucketTable {
            pan_max: 29,
            negative_max: 49,
            mixed_max: 64,
            positive_max: 79,
        };
        let prompt = system_prompt("v8", &table);
        assert!(prompt.contains("- Positive (65-79)"));
        assert!(prompt.contains("(20-29)"));
    }
}
