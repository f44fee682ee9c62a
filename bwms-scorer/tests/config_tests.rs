//! Configuration resolution and API key precedence
//!
//! These tests change process environment variables and run serially.

use bwms_scorer::config::{ProviderKind, ScorerConfig, CONFIG_ENV_VAR};
use bwms_scorer::scoring::tier1::{build_judges, ModelJudge};
use bwms_scorer::scoring::types::Bucket;
use serial_test::serial;
use tempfile::TempDir;

const KEY_VARS: [&str; 3] = ["ANTHROPIC_API_KEY", "OPENAI_API_KEY", "GEMINI_API_KEY"];

fn clear_env() {
    std::env::remove_var(CONFIG_ENV_VAR);
    for var in KEY_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("bwms-scorer.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_path_wins_over_env() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let cli = write_config(&dir, "prompt_version = \"cli\"\n");
    let env_path = dir.path().join("env.toml");
    std::fs::write(&env_path, "prompt_version = \"env\"\n").unwrap();
    std::env::set_var(CONFIG_ENV_VAR, &env_path);

    let config = ScorerConfig::load(Some(&cli)).unwrap();
    assert_eq!(config.prompt_version, "cli");

    let config = ScorerConfig::load(None).unwrap();
    assert_eq!(config.prompt_version, "env");
    clear_env();
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config = ScorerConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, ScorerConfig::default());
}

#[test]
#[serial]
fn test_broken_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[buckets\npan_max = ");
    assert!(ScorerConfig::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_inconsistent_buckets_rejected_at_load() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[buckets]\npan_max = 40\nnegative_max = 30\nmixed_max = 69\npositive_max = 84\n",
    );
    assert!(ScorerConfig::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_full_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
prompt_version = "v7"
corpus_root = "/srv/reviews"

[judges]
timeout_secs = 30

[[judges.providers]]
kind = "anthropic"
model = "claude-test"
requests_per_minute = 10

[[judges.providers]]
kind = "openai"
model = "gpt-test"
enabled = false

[thumbs]
up = "Rave"
meh = "Mixed"
down = "Pan"

[gate]
agreement_floor = 0.6
spread_ceiling = 10.0
needs_review_ceiling = 0.4
failure_ceiling = 0.2
min_sample = 20

[batch]
size = 50
concurrency = 8
"#,
    );

    let config = ScorerConfig::load(Some(&path)).unwrap();
    assert_eq!(config.prompt_version, "v7");
    assert_eq!(config.judges.providers.len(), 2);
    assert_eq!(config.judges.providers[0].kind, ProviderKind::Anthropic);
    assert_eq!(config.judges.providers[0].requests_per_minute, 10);
    assert!(!config.judges.providers[1].enabled);
    assert_eq!(config.thumbs.up, Bucket::Rave);
    assert_eq!(config.gate.min_sample, 20);
    assert_eq!(config.batch.size, 50);
    // Sections not in the file keep their defaults
    assert_eq!(config.letter_grades.get("A+"), Some(&97.0));
    assert_eq!(config.retry.max_attempts, 2);
}

#[test]
#[serial]
fn test_judges_without_keys_are_disabled() {
    clear_env();
    let config = ScorerConfig::default();
    assert!(build_judges(&config).is_empty());

    std::env::set_var("OPENAI_API_KEY", "sk-test");
    let judges = build_judges(&config);
    assert_eq!(judges.len(), 1);
    assert_eq!(judges[0].name(), "openai");
    clear_env();
}

#[test]
#[serial]
fn test_env_key_beats_toml_key() {
    clear_env();
    let mut config = ScorerConfig::default();
    config.judges.providers[0].api_key = Some("toml-key".to_string());
    assert_eq!(config.judges.providers[0].resolve_api_key().as_deref(), Some("toml-key"));

    std::env::set_var("ANTHROPIC_API_KEY", "env-key");
    assert_eq!(config.judges.providers[0].resolve_api_key().as_deref(), Some("env-key"));

    std::env::set_var("ANTHROPIC_API_KEY", "   ");
    assert_eq!(config.judges.providers[0].resolve_api_key().as_deref(), Some("toml-key"));
    clear_env();
}
