// Tier 1: Input Context Builder
//
// Concept: Assemble the single payload every judge sees for one review
// Synchronization: Pure function of the record; built once, shared by all judges
//
// Full-text reviews are judged on their own words only. Degraded text
// (truncated, excerpt, stub) gets aggregator thumbs and other excerpts as
// labeled corroborating context, never as the primary signal.

use super::judge_prompt::system_prompt;
use crate::models::review::{ContentTier, ReviewRecord, ThumbDirection};
use crate::scoring::types::{BucketTable, ScoringError, ScoringResult};
use std::fmt::Write;

/// Where the judged text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    FullText,
    /// Aggregator excerpt standing in for missing full text
    Excerpt { aggregator: String },
}

/// Structured prompt payload shared by every judge
#[derive(Debug, Clone, PartialEq)]
pub struct JudgePayload {
    pub review_id: String,
    /// Threaded explicitly; never read from global state
    pub prompt_version: String,
    pub system: String,
    pub user: String,
    pub content_tier: ContentTier,
    pub text_source: TextSource,
    /// Aggregator thumbs/excerpts were injected as corroborating context
    pub includes_aggregator_context: bool,
}

/// Builds judge payloads for one prompt version
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    prompt_version: String,
    system: String,
}

impl ContextBuilder {
    pub fn new(prompt_version: &str, buckets: &BucketTable) -> Self {
        Self {
            prompt_version: prompt_version.to_string(),
            system: system_prompt(prompt_version, buckets),
        }
    }

    pub fn prompt_version(&self) -> &str {
        &self.prompt_version
    }

    /// Build the payload for one review
    ///
    /// # Errors
    /// `InvalidRecord` when the record has no extractable text; such records
    /// are rejected upstream before any judge is called.
    pub fn build(&self, record: &ReviewRecord) -> ScoringResult<JudgePayload> {
        let tier = record.effective_tier();

        let (text, text_source) = match (record.full_text(), record.best_excerpt()) {
            (Some(text), _) => (text, TextSource::FullText),
            (None, Some((aggregator, excerpt))) => (
                excerpt,
                TextSource::Excerpt {
                    aggregator: aggregator.to_string(),
                },
            ),
            (None, None) => {
                return Err(ScoringError::InvalidRecord(format!(
                    "{} has no extractable text",
                    record.id
                )))
            }
        };

        let degraded = tier.is_degraded() || text_source != TextSource::FullText;
        let mut user = String::with_capacity(text.len() + 1024);

        let _ = writeln!(user, "TARGET SHOW: {}", record.display_show());
        let _ = writeln!(user, "OUTLET: {}", record.display_outlet());
        if let Some(outlet_tier) = record.outlet_tier {
            let _ = writeln!(user, "OUTLET TIER: {}", outlet_tier);
        }
        if !record.critic_name.trim().is_empty() {
            let _ = writeln!(user, "CRITIC: {}", record.critic_name.trim());
        }
        if let Some(date) = record.publish_date.as_deref() {
            let _ = writeln!(user, "PUBLISHED: {}", date);
        }
        user.push('\n');

        if let Some(warning) = quality_warning(tier, &text_source) {
            let _ = writeln!(user, "TEXT QUALITY WARNING: {}\n", warning);
        }

        let includes_aggregator_context = degraded && append_aggregator_context(&mut user, record, &text_source);

        user.push_str("REVIEW TEXT:\n\"\"\"\n");
        user.push_str(text);
        user.push_str("\n\"\"\"\n");

        Ok(JudgePayload {
            review_id: record.id.clone(),
            prompt_version: self.prompt_version.clone(),
            system: self.system.clone(),
            user,
            content_tier: tier,
            text_source,
            includes_aggregator_context,
        })
    }
}

fn quality_warning(tier: ContentTier, source: &TextSource) -> Option<String> {
    if let TextSource::Excerpt { aggregator } = source {
        return Some(format!(
            "only an excerpt quoted by {} is available; confidence must be low.",
            aggregator
        ));
    }
    match tier {
        ContentTier::Complete => None,
        ContentTier::Truncated => Some(
            "this text is truncated; if the concluding verdict is cut off, confidence must be low."
                .to_string(),
        ),
        ContentTier::Excerpt => Some("this text is an excerpt; confidence must be low.".to_string()),
        ContentTier::Stub | ContentTier::Invalid => Some(
            "this text is a short stub of the review; confidence must be low.".to_string(),
        ),
    }
}

/// Returns true when anything was appended
fn append_aggregator_context(user: &mut String, record: &ReviewRecord, source: &TextSource) -> bool {
    let judged_excerpt = match source {
        TextSource::Excerpt { aggregator } => Some(aggregator.as_str()),
        TextSource::FullText => None,
    };

    let excerpts: Vec<(&String, &String)> = record
        .aggregator_excerpts
        .iter()
        .filter(|(name, text)| Some(name.as_str()) != judged_excerpt && !text.trim().is_empty())
        .collect();

    if record.thumbs.is_empty() && excerpts.is_empty() {
        return false;
    }

    user.push_str("CORROBORATING CONTEXT (from review aggregators):\n");
    user.push_str(
        "This context is supplied only because the review text is incomplete. Form your own \
         independent assessment of the critic's verdict from the review text; do not copy an \
         aggregator's classification.\n",
    );
    for (aggregator, thumb) in &record.thumbs {
        let _ = writeln!(user, "- {} thumb: {}", aggregator, thumb_label(*thumb));
    }
    for (aggregator, text) in excerpts {
        let _ = writeln!(user, "- {} excerpt: \"{}\"", aggregator, text.trim());
    }
    user.push('\n');
    true
}

fn thumb_label(thumb: ThumbDirection) -> &'static str {
    match thumb {
        ThumbDirection::Up => "Up",
        ThumbDirection::Meh => "Meh",
        ThumbDirection::Down => "Down",
    }
}
