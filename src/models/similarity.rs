use serde::{Deserialize, Serialize};

/// One engine's verdict on one file pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileSimilarity {
    /// Relative path after normalization (e.g. `a.py` for `a.ipynb`).
    pub filename: String,
    /// Relative path before normalization, when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub tool: String,
    pub version: String,
    /// In `[0.0, 1.0]`.
    pub score: f64,
}

impl FileSimilarity {
    pub fn new(filename: &str, tool: &str, version: &str, score: f64) -> Self {
        Self {
            filename: filename.to_string(),
            original_filename: None,
            tool: tool.to_string(),
            version: version.to_string(),
            score,
        }
    }

    pub fn with_original(mut self, original: Option<&str>) -> Self {
        self.original_filename = original.map(str::to_string);
        self
    }
}
