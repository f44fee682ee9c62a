//! Configuration file resolution and TOML helpers
//!
//! Resolution order for a module's configuration file:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/bwms/<module>.toml`)
//! 4. None: the caller falls back to compiled defaults
//!
//! A missing configuration file never aborts startup. It is logged and the
//! compiled defaults are used instead.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging configuration shared by every bwms binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate the configuration file for `module_name`
///
/// Returns `None` when no file exists at any location; explicit paths given
/// on the command line or through the environment are returned even when
/// missing so the caller can report them.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    default_config_path(module_name).filter(|p| p.exists())
}

/// Platform default location of a module's TOML file
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bwms").join(format!("{}.toml", module_name)))
}

/// Read and parse a TOML file
pub fn read_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load a configuration, degrading to `T::default()` when no file is available
///
/// A file that exists but fails to parse is an error: silently ignoring a
/// broken calibration table would score the corpus with the wrong ranges.
pub fn load_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match path {
        Some(path) if path.exists() => {
            let config = read_toml_config(path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Configuration file {} not found, using compiled defaults",
                path.display()
            );
            Ok(T::default())
        }
        None => {
            warn!("No configuration file found, using compiled defaults");
            Ok(T::default())
        }
    }
}

/// Resolve a secret from the environment first, then from the TOML value
///
/// Empty or whitespace-only values are ignored at both tiers.
pub fn resolve_secret(env_var_name: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var_name).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v)).map(str::to_string);

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} set in both environment and TOML; using environment",
            env_var_name
        );
    }

    env_value.or(toml_value)
}

/// Validate an API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Standard User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("bwms/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }

    #[test]
    fn test_cli_arg_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/x.toml")), "BWMS_UNUSED_VAR", "m");
        assert_eq!(path, Some(PathBuf::from("/tmp/x.toml")));
    }

    #[test]
    fn test_user_agent_contains_version() {
        assert!(get_user_agent().starts_with("bwms/"));
    }
}
