//! Calibration measurement, audit and overrides against a temp corpus

mod helpers;

use bwms_scorer::models::review::{HumanOverride, ThumbDirection};
use bwms_scorer::scoring::types::{Bucket, BucketTable, Confidence, ScoreSource};
use bwms_scorer::services::audit::AuditReport;
use bwms_scorer::services::calibration::{build_calibration_set, measure};
use bwms_scorer::services::overrides::{clear_override, set_override};
use bwms_scorer::ReviewEngine;
use helpers::*;

#[tokio::test]
async fn test_measure_reports_agreement_and_bias() {
    let env = TestEnv::new().await;
    let config = test_config();
    let records: Vec<_> = (0..6)
        .map(|i| with_prior_score(review(&format!("show-{}", i), "outlet"), 78.0, "v1"))
        .collect();
    env.seed(&records).await;

    let set = build_calibration_set(&records, &BucketTable::default(), 6, 7);
    assert_eq!(set.len(), 6);

    let engine = engine_with(
        &config,
        vec![
            ScriptedJudge::new("anthropic", scored_verdict(Bucket::Positive, 80.0, Confidence::High)),
            ScriptedJudge::new("gemini", scored_verdict(Bucket::Positive, 76.0, Confidence::High)),
            ScriptedJudge::new("openai", scored_verdict(Bucket::Mixed, 60.0, Confidence::High)),
        ],
    );

    let report = measure(&engine, &env.store, &set, 3).await.unwrap();
    assert_eq!(report.reviews, 6);
    assert_eq!(report.missing, 0);
    assert_eq!(report.per_judge["anthropic"].rate(), Some(1.0));
    assert_eq!(report.per_judge["openai"].rate(), Some(0.0));
    assert_eq!(report.pairwise["anthropic/gemini"], (6, 6));
    assert_eq!(report.pairwise["anthropic/openai"], (6, 0));
    assert_eq!(report.final_bucket_agreement.rate(), Some(1.0));
    // Majority mean 78 against reference 78
    assert_eq!(report.bias_by_bucket[&Bucket::Positive].mean(), Some(0.0));

    // Measuring never commits
    assert_eq!(env.load(&records[0].id).await.scoring.unwrap().prompt_version, "v1");
    assert!(report.to_string().contains("anthropic"));
}

#[tokio::test]
async fn test_audit_over_corpus() {
    let env = TestEnv::new().await;
    let mut flagged = with_prior_score(review("show-a", "one"), 50.0, "v1");
    flagged.needs_rescore = true;
    env.seed(&[flagged, review("show-b", "two")]).await;
    std::fs::write(env.store.root().join("show-b/broken.json"), "{").unwrap();

    let load = env.store.load_all().await.unwrap();
    let mut report = AuditReport::from_records(&load.records);
    report.unreadable = load.errors.len();

    assert_eq!(report.reviews, 2);
    assert_eq!(report.unreadable, 1);
    assert_eq!(report.needs_rescore, 1);
    assert_eq!(report.unscored, 1);
    assert_eq!(report.by_source[ScoreSource::EnsembleHighConfidence.tag()], 1);
}

#[tokio::test]
async fn test_clearing_override_falls_back_to_stored_ensemble() {
    let env = TestEnv::new().await;
    let config = test_config();
    let record = with_thumb(review("show", "outlet"), ThumbDirection::Up);
    env.seed(&[record.clone()]).await;

    // Score it for real so the ensemble is stored
    let engine = uniform_engine(&config, scored_verdict(Bucket::Positive, 80.0, Confidence::High));
    let mut scored = record.clone();
    scored.apply_resolution(&engine.score(&record).await.resolution, &config.prompt_version);
    env.store.save(&scored).await.unwrap();

    let offline = ReviewEngine::offline(&config);
    let overridden = set_override(&offline, &env.store, &record.id, 40.0, None, Some("editor".into()))
        .await
        .unwrap();
    let scoring = overridden.scoring.as_ref().unwrap();
    assert_eq!(scoring.score_source, ScoreSource::HumanOverride);
    assert_eq!(scoring.final_bucket, Bucket::Negative);
    assert_eq!(scoring.previous_score, Some(80.0));
    assert!(matches!(
        overridden.human_override,
        Some(HumanOverride { score, .. }) if score == 40.0
    ));

    let cleared = clear_override(&offline, &env.store, &record.id).await.unwrap();
    let scoring = cleared.scoring.as_ref().unwrap();
    assert_eq!(scoring.score_source, ScoreSource::EnsembleHighConfidence);
    assert_eq!(scoring.final_score, 80.0);
    assert_eq!(scoring.prompt_version, config.prompt_version);
    assert!(!cleared.needs_rescore);
}

#[tokio::test]
async fn test_clearing_only_signal_leaves_no_override_score() {
    let env = TestEnv::new().await;
    let config = test_config();
    let record = review("show", "outlet");
    env.seed(&[record.clone()]).await;

    let offline = ReviewEngine::offline(&config);
    set_override(&offline, &env.store, &record.id, 50.0, None, None)
        .await
        .unwrap();
    let cleared = clear_override(&offline, &env.store, &record.id).await.unwrap();

    assert!(cleared.human_override.is_none());
    assert!(cleared.scoring.is_none());
    assert!(cleared.needs_rescore);
    let superseded = cleared.superseded_score.as_ref().unwrap();
    assert_eq!(superseded.score_source, ScoreSource::HumanOverride);
    assert_eq!(superseded.final_score, 50.0);

    // What was written matches what was returned
    let reloaded = env.load(&record.id).await;
    assert!(reloaded.scoring.is_none());
    assert!(reloaded.needs_rescore);

    let report = AuditReport::from_records(&[reloaded]);
    assert_eq!(report.by_source[ScoreSource::HumanOverride.tag()], 0);
    assert_eq!(report.unscored, 1);
}
