//! Configuration resolution and graceful degradation tests
//!
//! Tests that manipulate process environment variables are marked #[serial]
//! so they never run concurrently.

use bwms_common::config::{
    load_or_default, resolve_config_path, resolve_secret, LoggingConfig,
};
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var("BWMS_TEST_CONFIG", "/tmp/bwms-env.toml");
    let path = resolve_config_path(None, "BWMS_TEST_CONFIG", "bwms-test");
    env::remove_var("BWMS_TEST_CONFIG");

    assert_eq!(path, Some(PathBuf::from("/tmp/bwms-env.toml")));
}

#[test]
#[serial]
fn test_cli_arg_beats_env_var() {
    env::set_var("BWMS_TEST_CONFIG", "/tmp/bwms-env.toml");
    let cli = PathBuf::from("/tmp/bwms-cli.toml");
    let path = resolve_config_path(Some(&cli), "BWMS_TEST_CONFIG", "bwms-test");
    env::remove_var("BWMS_TEST_CONFIG");

    assert_eq!(path, Some(cli));
}

#[test]
fn test_missing_file_degrades_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    let config: SampleConfig = load_or_default(Some(&missing)).unwrap();
    assert_eq!(config, SampleConfig::default());
    assert_eq!(config.logging.level, "info");
    let none: SampleConfig = load_or_default(None).unwrap();
    assert_eq!(none, SampleConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "name = [unterminated").unwrap();

    let result: bwms_common::Result<SampleConfig> = load_or_default(Some(&path));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_secret_env_beats_toml() {
    env::set_var("BWMS_TEST_SECRET", "from-env");
    assert_eq!(
        resolve_secret("BWMS_TEST_SECRET", Some("from-toml")),
        Some("from-env".to_string())
    );

    env::set_var("BWMS_TEST_SECRET", "   ");
    assert_eq!(
        resolve_secret("BWMS_TEST_SECRET", Some("from-toml")),
        Some("from-toml".to_string())
    );

    env::remove_var("BWMS_TEST_SECRET");
    assert_eq!(resolve_secret("BWMS_TEST_SECRET", Some("")), None);
}
