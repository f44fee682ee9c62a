//! Test Helper Utilities
//!
//! Scripted judges, review builders, and a temp corpus plus checkpoint
//! database for exercising the pipeline without network access.

#![allow(dead_code)]

use async_trait::async_trait;
use bwms_scorer::config::{RetryConfig, ScorerConfig};
use bwms_scorer::db;
use bwms_scorer::models::review::{ContentTier, ReviewRecord, ThumbDirection};
use bwms_scorer::scoring::tier1::{JudgePanel, JudgePayload, ModelJudge};
use bwms_scorer::scoring::types::{
    Bucket, BucketTable, Confidence, JudgeError, JudgeVerdict, ModelJudgeResult, RejectionReason,
    ScoreSource, ScoredReview,
};
use bwms_scorer::utils::RetryPolicy;
use bwms_scorer::{ReviewEngine, ReviewStore};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PROMPT_VERSION: &str = "v2";

/// A review long enough to support a high-confidence verdict
pub const LONG_TEXT: &str = "The revival arrives with a new orchestration and a cast that \
    sings the score with real conviction. The second act drags in places, yet the \
    staging keeps finding fresh angles on familiar material and the leads carry it home.";

pub fn scored_verdict(bucket: Bucket, score: f64, confidence: Confidence) -> JudgeVerdict {
    JudgeVerdict::Scored {
        bucket,
        score,
        confidence,
        rationale: "scripted".to_string(),
        key_quote: None,
        clamped: false,
    }
}

pub fn rejected_verdict(reason: RejectionReason) -> JudgeVerdict {
    JudgeVerdict::Rejected {
        reason,
        rationale: "scripted".to_string(),
    }
}

/// Judge answering from a per-review script, with a fallback verdict
pub struct ScriptedJudge {
    name: String,
    fallback: Result<JudgeVerdict, JudgeError>,
    script: Mutex<HashMap<String, Result<JudgeVerdict, JudgeError>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedJudge {
    pub fn new(name: &str, fallback: JudgeVerdict) -> Self {
        Self {
            name: name.to_string(),
            fallback: Ok(fallback),
            script: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fallback: Err(JudgeError::Http {
                status: 401,
                body: "unauthorized".to_string(),
            }),
            script: Mutex::new(HashMap::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(self, review_id: &str, verdict: JudgeVerdict) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(review_id.to_string(), Ok(verdict));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ModelJudge for ScriptedJudge {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn judge(&self, payload: &JudgePayload) -> Result<ModelJudgeResult, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .script
            .lock()
            .unwrap()
            .get(&payload.review_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        answer.map(|verdict| ModelJudgeResult {
            judge: self.name.clone(),
            model: "scripted-1".to_string(),
            verdict,
        })
    }
}

/// Configuration for tests: one attempt per judge, no backoff
pub fn test_config() -> ScorerConfig {
    ScorerConfig {
        prompt_version: PROMPT_VERSION.to_string(),
        retry: RetryConfig {
            max_attempts: 1,
            initial_backoff_ms: 0,
            multiplier: 1.0,
            max_backoff_ms: 0,
        },
        ..ScorerConfig::default()
    }
}

pub fn engine_with(config: &ScorerConfig, judges: Vec<ScriptedJudge>) -> ReviewEngine {
    let judges: Vec<Arc<dyn ModelJudge>> = judges
        .into_iter()
        .map(|j| Arc::new(j) as Arc<dyn ModelJudge>)
        .collect();
    let retry = RetryPolicy::new(&config.retry, Duration::from_secs(5));
    ReviewEngine::new(config, JudgePanel::new(judges, retry))
}

/// Three judges that all answer `verdict`
pub fn uniform_engine(config: &ScorerConfig, verdict: JudgeVerdict) -> ReviewEngine {
    engine_with(
        config,
        ["anthropic", "openai", "gemini"]
            .into_iter()
            .map(|name| ScriptedJudge::new(name, verdict.clone()))
            .collect(),
    )
}

/// Complete review with long full text
pub fn review(show: &str, outlet: &str) -> ReviewRecord {
    let mut record = ReviewRecord::new(show, outlet, "Pat Critic");
    record.full_text = Some(LONG_TEXT.to_string());
    record.content_tier = Some(ContentTier::Complete);
    record
}

pub fn review_with_text(show: &str, outlet: &str, text: &str, tier: ContentTier) -> ReviewRecord {
    let mut record = ReviewRecord::new(show, outlet, "Pat Critic");
    record.full_text = Some(text.to_string());
    record.content_tier = Some(tier);
    record
}

pub fn with_thumb(mut record: ReviewRecord, thumb: ThumbDirection) -> ReviewRecord {
    record.thumbs.insert("dtli".to_string(), thumb);
    record
}

/// Prior score under another prompt version
pub fn with_prior_score(mut record: ReviewRecord, score: f64, version: &str) -> ReviewRecord {
    record.scoring = Some(ScoredReview {
        final_score: score,
        final_bucket: BucketTable::default().bucket_for(score),
        score_source: ScoreSource::EnsembleHighConfidence,
        prompt_version: version.to_string(),
        confidence: Confidence::High,
        needs_review: false,
        explicit_rating: None,
        ensemble: None,
        scored_at: Utc::now(),
        previous_score: None,
        previous_version: None,
        previous_source: None,
    });
    record
}

/// Temp corpus and checkpoint database; keep the `TempDir` alive for the test
pub struct TestEnv {
    pub dir: TempDir,
    pub store: ReviewStore,
    pub pool: SqlitePool,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = ReviewStore::new(dir.path().join("reviews"));
        std::fs::create_dir_all(store.root()).unwrap();
        let pool = db::init_database_pool(&dir.path().join("runs.db")).await.unwrap();
        Self { dir, store, pool }
    }

    pub async fn seed(&self, records: &[ReviewRecord]) {
        for record in records {
            self.store.save(record).await.unwrap();
        }
    }

    pub async fn load(&self, id: &str) -> ReviewRecord {
        self.store.load(id).await.unwrap()
    }
}
