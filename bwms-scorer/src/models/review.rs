//! Review record as stored in the corpus
//!
//! One JSON file per critic review of one production. Acquisition and
//! identity fields are written by other tools; this crate only reads them
//! and owns the scoring, rejection and rescore fields. Unknown fields are
//! carried through untouched so a rewrite never drops another tool's data.

use crate::scoring::types::{RejectionReason, Resolution, ScoreSource, ScoredReview};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative path of the review file without extension ("hamilton-2015/nytimes--ben-brantley")
pub type ReviewId = String;

/// Content quality tier assigned by the acquisition tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTier {
    Complete,
    Truncated,
    Excerpt,
    Stub,
    Invalid,
}

impl ContentTier {
    /// Text is something less than the whole review
    pub fn is_degraded(self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// Aggregator editorial thumb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThumbDirection {
    #[serde(alias = "up", alias = "UP")]
    Up,
    #[serde(alias = "meh", alias = "MEH", alias = "Flat", alias = "flat")]
    Meh,
    #[serde(alias = "down", alias = "DOWN")]
    Down,
}

/// Editor-assigned score that persists across rescoring runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanOverride {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_at: Option<DateTime<Utc>>,
}

/// Rejection recorded against a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub reason: RejectionReason,
    pub prompt_version: String,
    pub rejected_at: DateTime<Utc>,
}

/// Quality metadata fed back to the acquisition tooling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityFlags {
    /// Text belongs to another show or production
    #[serde(default)]
    pub show_mismatch: bool,
    #[serde(default)]
    pub not_a_review: bool,
    /// Text must be fetched again (garbage or invalid)
    #[serde(default)]
    pub needs_reacquisition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionRecord>,
}

impl QualityFlags {
    /// Route a rejection to the matching quality flag
    pub fn apply_rejection(&mut self, reason: RejectionReason, prompt_version: &str) {
        match reason {
            RejectionReason::WrongShow | RejectionReason::WrongProduction => {
                self.show_mismatch = true
            }
            RejectionReason::NotAReview => self.not_a_review = true,
            RejectionReason::GarbageText => self.needs_reacquisition = true,
        }
        self.rejection = Some(RejectionRecord {
            reason,
            prompt_version: prompt_version.to_string(),
            rejected_at: Utc::now(),
        });
    }

    /// Undo a rejection (rollback)
    pub fn clear_rejection(&mut self) {
        if let Some(record) = self.rejection.take() {
            match record.reason {
                RejectionReason::WrongShow | RejectionReason::WrongProduction => {
                    self.show_mismatch = false
                }
                RejectionReason::NotAReview => self.not_a_review = false,
                RejectionReason::GarbageText => self.needs_reacquisition = false,
            }
        }
    }
}

/// One critic's review of one show production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    /// Assigned by the store from the file path
    #[serde(skip)]
    pub id: ReviewId,

    // Identity
    pub show_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_title: Option<String>,
    pub outlet_id: String,
    /// Outlet display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlet_tier: Option<u8>,
    #[serde(default)]
    pub critic_name: String,

    // Content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_tier: Option<ContentTier>,
    /// Aggregator name → excerpt
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregator_excerpts: BTreeMap<String, String>,
    /// Aggregator name → thumb
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thumbs: BTreeMap<String, ThumbDirection>,

    // Scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_override: Option<HumanOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoredReview>,
    /// Score retired by a rejection, kept for rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_score: Option<ScoredReview>,
    #[serde(default)]
    pub needs_rescore: bool,
    #[serde(default)]
    pub quality: QualityFlags,

    /// Fields owned by other tools
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReviewRecord {
    /// Minimal record; used by tests and tooling
    pub fn new(show_id: &str, outlet_id: &str, critic_name: &str) -> Self {
        Self {
            id: format!("{}/{}--{}", show_id, outlet_id, slug(critic_name)),
            show_id: show_id.to_string(),
            show_title: None,
            outlet_id: outlet_id.to_string(),
            outlet: None,
            outlet_tier: None,
            critic_name: critic_name.to_string(),
            publish_date: None,
            full_text: None,
            content_tier: None,
            aggregator_excerpts: BTreeMap::new(),
            thumbs: BTreeMap::new(),
            human_override: None,
            scoring: None,
            superseded_score: None,
            needs_rescore: false,
            quality: QualityFlags::default(),
            extra: serde_json::Map::new(),
        }
    }

    /// Trimmed full text, if any
    pub fn full_text(&self) -> Option<&str> {
        self.full_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Character count of the trimmed full text (0 when absent)
    pub fn full_text_chars(&self) -> usize {
        self.full_text().map(|t| t.chars().count()).unwrap_or(0)
    }

    /// Longest non-empty aggregator excerpt
    pub fn best_excerpt(&self) -> Option<(&str, &str)> {
        self.aggregator_excerpts
            .iter()
            .map(|(source, text)| (source.as_str(), text.trim()))
            .filter(|(_, text)| !text.is_empty())
            .max_by_key(|(_, text)| text.chars().count())
    }

    /// Full text, else the best excerpt
    pub fn best_text(&self) -> Option<&str> {
        self.full_text().or_else(|| self.best_excerpt().map(|(_, t)| t))
    }

    pub fn has_extractable_text(&self) -> bool {
        self.best_text().is_some()
    }

    /// Tier as classified upstream, or inferred from what text is present
    pub fn effective_tier(&self) -> ContentTier {
        if let Some(tier) = self.content_tier {
            return tier;
        }
        match self.full_text_chars() {
            0 if self.best_excerpt().is_some() => ContentTier::Excerpt,
            0 => ContentTier::Stub,
            n if n < 1500 => ContentTier::Truncated,
            _ => ContentTier::Complete,
        }
    }

    /// Strict plurality thumb across aggregators; ties yield `None`
    pub fn thumb_consensus(&self) -> Option<ThumbDirection> {
        let mut counts: BTreeMap<ThumbDirection, usize> = BTreeMap::new();
        for thumb in self.thumbs.values() {
            *counts.entry(*thumb).or_default() += 1;
        }

        let max = counts.values().copied().max()?;
        let mut leaders = counts.iter().filter(|(_, c)| **c == max);
        let (leader, _) = leaders.next()?;
        if leaders.next().is_some() {
            return None;
        }
        Some(*leader)
    }

    /// Outlet display name, falling back to the outlet id
    pub fn display_outlet(&self) -> &str {
        self.outlet.as_deref().unwrap_or(&self.outlet_id)
    }

    /// Show title, falling back to the show id
    pub fn display_show(&self) -> &str {
        self.show_title.as_deref().unwrap_or(&self.show_id)
    }
}

/// Scoring-owned fields of a record as they were before a commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringSnapshot {
    pub scoring: Option<ScoredReview>,
    pub superseded_score: Option<ScoredReview>,
    pub needs_rescore: bool,
    pub quality: QualityFlags,
}

impl ReviewRecord {
    pub fn snapshot(&self) -> ScoringSnapshot {
        ScoringSnapshot {
            scoring: self.scoring.clone(),
            superseded_score: self.superseded_score.clone(),
            needs_rescore: self.needs_rescore,
            quality: self.quality.clone(),
        }
    }

    /// Put the scoring-owned fields back exactly as captured
    pub fn restore(&mut self, snapshot: ScoringSnapshot) {
        self.scoring = snapshot.scoring;
        self.superseded_score = snapshot.superseded_score;
        self.needs_rescore = snapshot.needs_rescore;
        self.quality = snapshot.quality;
    }

    /// Write a resolution into the record
    ///
    /// Scored replaces the score (the resolver already carried the prior
    /// value into `previous*`). Rejected retires the prior score into
    /// `supersededScore`. Unscored leaves the prior score in place and flags
    /// the record for a later rescore. `humanOverride` is never touched.
    pub fn apply_resolution(&mut self, resolution: &Resolution, prompt_version: &str) {
        match resolution {
            Resolution::Scored(scored) => {
                self.needs_rescore = scored.score_source == ScoreSource::ThumbOnly;
                self.scoring = Some(scored.as_ref().clone());
                self.quality.clear_rejection();
            }
            Resolution::Rejected { reason } => {
                if let Some(prior) = self.scoring.take() {
                    self.superseded_score = Some(prior);
                }
                self.needs_rescore = false;
                self.quality.clear_rejection();
                self.quality.apply_rejection(*reason, prompt_version);
            }
            Resolution::Unscored { .. } => {
                self.needs_rescore = true;
            }
        }
    }
}

fn slug(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
