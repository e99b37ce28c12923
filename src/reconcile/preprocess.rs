//! Format-specific conversion run before files are matched and compared.

use anyhow::{Result, bail};
use serde_json::Value;
use std::sync::Arc;

/// Converts one source format into a plain source file.
pub trait Preprocessor: Send + Sync {
    /// Extension (without dot) this stage handles, e.g. `ipynb`.
    fn source_extension(&self) -> &str;
    /// Extension of the produced file, e.g. `py`.
    fn target_extension(&self) -> &str;
    fn convert(&self, source: &[u8]) -> Result<String>;
}

/// Jupyter notebooks become a Python file made of their code cells.
pub struct NotebookPreprocessor;

impl Preprocessor for NotebookPreprocessor {
    fn source_extension(&self) -> &str {
        "ipynb"
    }

    fn target_extension(&self) -> &str {
        "py"
    }

    fn convert(&self, source: &[u8]) -> Result<String> {
        let notebook: Value = serde_json::from_slice(source)?;

        // nbformat 4 keeps cells at the top level, nbformat 3 inside worksheets.
        let cells: Vec<&Value> = if let Some(cells) = notebook.get("cells").and_then(Value::as_array) {
            cells.iter().collect()
        } else if let Some(sheets) = notebook.get("worksheets").and_then(Value::as_array) {
            sheets
                .iter()
                .filter_map(|s| s.get("cells").and_then(Value::as_array))
                .flatten()
                .collect()
        } else {
            bail!("notebook has no cells");
        };

        let mut blocks = Vec::new();
        for cell in cells {
            if cell.get("cell_type").and_then(Value::as_str) != Some("code") {
                continue;
            }
            let text = cell
                .get("source")
                .or_else(|| cell.get("input"))
                .map(cell_text)
                .unwrap_or_default();
            let text = text.trim_end();
            if !text.is_empty() {
                blocks.push(text.to_string());
            }
        }

        let mut out = blocks.join("\n\n");
        if !out.is_empty() {
            out.push('\n');
        }
        Ok(out)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

/// The ordered set of stages applied before reconciliation.
#[derive(Clone)]
pub struct PreprocessorSet {
    stages: Vec<Arc<dyn Preprocessor>>,
}

impl Default for PreprocessorSet {
    fn default() -> Self {
        Self {
            stages: vec![Arc::new(NotebookPreprocessor)],
        }
    }
}

impl PreprocessorSet {
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with_stage(mut self, stage: Arc<dyn Preprocessor>) -> Self {
        self.stages.push(stage);
        self
    }

    /// The stage responsible for `relpath`, matched by extension (case-insensitive).
    pub fn for_relpath(&self, relpath: &str) -> Option<&dyn Preprocessor> {
        let ext = camino::Utf8Path::new(relpath).extension()?.to_lowercase();
        self.stages
            .iter()
            .find(|s| s.source_extension() == ext)
            .map(|s| s.as_ref())
    }
}

/// `dir/name.ipynb` -> `dir/name.py`.
pub fn converted_relpath(relpath: &str, stage: &dyn Preprocessor) -> String {
    camino::Utf8Path::new(relpath)
        .with_extension(stage.target_extension())
        .into_string()
}
