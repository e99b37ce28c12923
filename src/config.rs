//! Configuration loading and generation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::store::default_cache_dir;
use crate::engine::{self, EngineConfig, SimilarityEngine};
use crate::error::AnalysisError;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable debug logging to file
    pub debug: bool,

    /// Path to log directory
    pub log_path: PathBuf,

    /// Directory of the file-backed analysis cache
    pub cache_dir: PathBuf,

    /// NDJSON file course metrics are appended to; none disables metrics
    pub metrics_path: Option<PathBuf>,

    /// Seconds a caller waits for another caller's claim on the same record
    pub claim_timeout_secs: u64,

    /// Seconds after which a cache claim is considered abandoned
    pub stale_claim_secs: u64,

    /// Similarity engines, run in this order for every file pair
    pub engines: Vec<EngineConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            log_path: default_log_path(),
            cache_dir: default_cache_dir(),
            metrics_path: None,
            claim_timeout_secs: 600,
            stale_claim_secs: 3600,
            engines: engine::default_engine_configs(),
        }
    }
}

impl Config {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }

    /// Instantiate the configured engine list.
    pub fn build_engines(&self) -> Result<Vec<Arc<dyn SimilarityEngine>>> {
        engine::build_engines(&self.engines)
    }
}

fn config_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("autograder-analysis")
}

/// Default log path: ~/.config/autograder-analysis/logs
fn default_log_path() -> PathBuf {
    config_root().join("logs")
}

/// Configuration service.
pub struct ConfigService;

impl ConfigService {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        config_root().join("config.toml")
    }

    /// Load configuration from file.
    ///
    /// If `path` is `None`, uses the default path.
    /// If the file doesn't exist, returns default configuration.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);
        let config_dir = path.parent();

        if !path.exists() {
            // Return defaults, don't auto-create
            let mut config = Config::default();
            if let Some(dir) = config_dir {
                config.log_path = dir.join("logs");
            }
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content).with_context(|| {
            AnalysisError::config(format!("Failed to parse config file: {}", path.display()))
        })?;

        // If log_path was not explicitly set, use config file's directory/logs
        if config.log_path == default_log_path()
            && let Some(dir) = config_dir
        {
            config.log_path = dir.join("logs");
        }

        Ok(config)
    }

    /// Generate default configuration file at the default path.
    pub fn generate_default() -> Result<()> {
        Self::generate_at(&Self::default_path())
    }

    /// Generate default configuration file at the specified path.
    pub fn generate_at(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = Self::default_config_content();
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate default configuration content with comments.
    fn default_config_content() -> String {
        r#"# autograder-analysis configuration file

# Enable debug logging to file (default: false)
debug = false

# Path to log directory (default: ~/.config/autograder-analysis/logs)
# log_path = "~/.config/autograder-analysis/logs"

# Analysis cache directory (default: platform cache dir /autograder-analysis)
# cache_dir = "/var/cache/autograder-analysis"

# Append course metrics as JSON lines to this file (default: disabled)
# metrics_path = "/var/log/autograder-analysis/metrics.jsonl"

# Seconds to wait for another process computing the same analysis
claim_timeout_secs = 600

# Seconds after which an unreleased claim is treated as abandoned
stale_claim_secs = 3600

# Similarity engines, run in order for every matched file pair.
[[engines]]
kind = "token"
min_tokens = 5
window = 4

# In-process line comparison, useful as a deterministic baseline.
# [[engines]]
# kind = "reference"

# An external tool. {a}, {b} and {sensitivity} are substituted; the tool
# prints a "score: <value>" line, divided by score_scale.
# [[engines]]
# kind = "external"
# name = "sim"
# version = "3.0"
# command = ["sim_c", "-p", "-r", "{sensitivity}", "{a}", "{b}"]
# sensitivity = 5
# timeout_secs = 60
# score_key = "score"
# score_scale = 100.0
"#
        .to_string()
    }
}
