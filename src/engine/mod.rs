//! Similarity engines: each scores one pair of files in `[0.0, 1.0]`.

pub mod external;
pub mod reference;
pub mod token;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::models::similarity::FileSimilarity;

pub use external::{ExternalConfig, ExternalEngine};
pub use reference::ReferenceEngine;
pub use token::TokenEngine;

/// A pluggable comparison algorithm.
///
/// Scores depend only on file content, and a file compared with itself
/// scores exactly `1.0`.
pub trait SimilarityEngine: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Compare `paths[0]` with `paths[1]`. `relpath` is the normalized name
    /// the result is filed under; `original` is the pre-normalization name.
    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity>;

    /// Whether the engine can run in this environment.
    fn is_available(&self) -> bool {
        true
    }
}

/// One entry of the configured engine list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineConfig {
    Reference,
    Token {
        #[serde(default = "token::default_min_tokens")]
        min_tokens: usize,
        #[serde(default = "token::default_window")]
        window: usize,
    },
    External(ExternalConfig),
}

impl EngineConfig {
    pub fn token() -> Self {
        Self::Token {
            min_tokens: token::default_min_tokens(),
            window: token::default_window(),
        }
    }
}

pub fn default_engine_configs() -> Vec<EngineConfig> {
    vec![EngineConfig::token()]
}

/// Instantiate the configured engines, in order. Engine names must be unique
/// since results are told apart by tool name.
pub fn build_engines(configs: &[EngineConfig]) -> Result<Vec<Arc<dyn SimilarityEngine>>> {
    if configs.is_empty() {
        bail!(AnalysisError::config("At least one similarity engine must be configured"));
    }

    let mut engines: Vec<Arc<dyn SimilarityEngine>> = Vec::with_capacity(configs.len());
    let mut names = HashSet::new();

    for config in configs {
        let engine: Arc<dyn SimilarityEngine> = match config {
            EngineConfig::Reference => Arc::new(ReferenceEngine),
            EngineConfig::Token { min_tokens, window } => {
                Arc::new(TokenEngine::new(*min_tokens, *window)?)
            }
            EngineConfig::External(external) => Arc::new(ExternalEngine::new(external.clone())?),
        };

        if !names.insert(engine.name().to_string()) {
            bail!(AnalysisError::config(format!(
                "Duplicate similarity engine name '{}'",
                engine.name()
            )));
        }
        engines.push(engine);
    }

    Ok(engines)
}
