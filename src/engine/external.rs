use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::SimilarityEngine;
use crate::error::AnalysisError;
use crate::models::similarity::FileSimilarity;
use crate::source;

/// An external comparison tool, run once per file pair.
///
/// `command` is the program followed by its arguments; `{a}`, `{b}` and
/// `{sensitivity}` are substituted in every argument. The tool reports on
/// stdout with a `score: 0.83` or `score=83` line (key configurable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub command: Vec<String>,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_score_key")]
    pub score_key: String,
    /// Reported scores are divided by this (e.g. 100 for percentages).
    #[serde(default = "default_score_scale")]
    pub score_scale: f64,
}

fn default_version() -> String {
    "unknown".to_string()
}

fn default_sensitivity() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_score_key() -> String {
    "score".to_string()
}

fn default_score_scale() -> f64 {
    1.0
}

impl ExternalConfig {
    pub fn new(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: default_version(),
            command: command.iter().map(|s| s.to_string()).collect(),
            sensitivity: default_sensitivity(),
            timeout_secs: default_timeout_secs(),
            score_key: default_score_key(),
            score_scale: default_score_scale(),
        }
    }
}

pub struct ExternalEngine {
    config: ExternalConfig,
    runtime: Runtime,
}

impl ExternalEngine {
    pub fn new(config: ExternalConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            bail!(AnalysisError::config("External engine needs a name"));
        }
        if config.command.is_empty() {
            bail!(AnalysisError::config(format!(
                "External engine '{}' has an empty command",
                config.name
            )));
        }
        if !(config.score_scale.is_finite() && config.score_scale > 0.0) {
            bail!(AnalysisError::config(format!(
                "External engine '{}' needs a positive score_scale",
                config.name
            )));
        }
        if config.timeout_secs == 0 {
            bail!(AnalysisError::config(format!(
                "External engine '{}' needs a non-zero timeout_secs",
                config.name
            )));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("external-engine")
            .enable_all()
            .build()
            .context("Failed to start engine runtime")?;

        Ok(Self { config, runtime })
    }

    fn args(&self, paths: [&Path; 2]) -> Vec<String> {
        let a = paths[0].to_string_lossy();
        let b = paths[1].to_string_lossy();
        let sensitivity = self.config.sensitivity.to_string();
        self.config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{a}", &a)
                    .replace("{b}", &b)
                    .replace("{sensitivity}", &sensitivity)
            })
            .collect()
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output> {
        let name = &self.config.name;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let mut cmd = tokio::process::Command::new(&args[0]);
        cmd.args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AnalysisError::engine(name, format!("failed to run '{}': {e}", args[0])).into()),
            Err(_) => Err(AnalysisError::engine(
                name,
                format!("timed out after {}s", self.config.timeout_secs),
            )
            .into()),
        }
    }

    /// Extract the score from tool output. Unrelated or malformed lines are
    /// tolerated as long as a score can be found.
    pub fn parse_score(&self, stdout: &str) -> Result<f64> {
        let name = &self.config.name;
        let mut raw_score = None;

        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((key, value)) = line.split_once([':', '=']) else {
                warn!(engine = %name, line = line, "malformed engine output line");
                continue;
            };
            if key.trim() != self.config.score_key {
                continue;
            }
            match value.trim().trim_end_matches('%').parse::<f64>() {
                Ok(v) if raw_score.is_none() => raw_score = Some(v),
                Ok(_) => {}
                Err(_) => warn!(engine = %name, line = line, "unparseable score value"),
            }
        }

        let Some(raw) = raw_score else {
            bail!(AnalysisError::engine(
                name,
                format!("no '{}' line in output", self.config.score_key)
            ));
        };

        let score = raw / self.config.score_scale;
        if !(0.0..=1.0).contains(&score) {
            bail!(AnalysisError::engine(
                name,
                format!("score {raw} is out of range for scale {}", self.config.score_scale)
            ));
        }
        Ok(score)
    }
}

impl SimilarityEngine for ExternalEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity> {
        let name = &self.config.name;

        // Identical content is 1.0 by definition; no need to ask the tool.
        let a = source::hash_file(paths[0]).map_err(|e| AnalysisError::engine(name, e))?;
        let b = source::hash_file(paths[1]).map_err(|e| AnalysisError::engine(name, e))?;
        if a == b {
            return Ok(FileSimilarity::new(relpath, name, &self.config.version, 1.0)
                .with_original(original));
        }

        let args = self.args(paths);
        debug!(engine = %name, relpath = relpath, "running external engine");
        let output = self.runtime.block_on(self.run(args))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(AnalysisError::engine(
                name,
                format!("exited with {}: {}", output.status, stderr.trim())
            ));
        }

        let score = self.parse_score(&String::from_utf8_lossy(&output.stdout))?;
        Ok(FileSimilarity::new(relpath, name, &self.config.version, score).with_original(original))
    }

    fn is_available(&self) -> bool {
        let program = Path::new(&self.config.command[0]);
        if program.components().count() > 1 {
            return program.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(program))
                    .any(|candidate: PathBuf| candidate.is_file())
            })
            .unwrap_or(false)
    }
}
