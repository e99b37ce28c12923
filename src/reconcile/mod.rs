//! Pair up the files of two submission trees and run them through the engines.

pub mod preprocess;
pub mod walk;

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::SimilarityEngine;
use crate::error::{AnalysisError, ErrorCode};
use crate::models::options::AnalysisOptions;
use crate::models::similarity::FileSimilarity;
use crate::source;
use preprocess::{PreprocessorSet, converted_relpath};

/// One file of a normalized tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeFile {
    /// Relative path after pre-processing.
    pub relpath: String,
    /// Where the (possibly converted) content lives on disk.
    pub path: PathBuf,
    /// Relative path in the submission before pre-processing, if it changed.
    pub original: Option<String>,
}

/// A submission (or template) tree after pre-processing, keyed by relpath.
#[derive(Debug, Default)]
pub struct NormalizedTree {
    files: BTreeMap<String, TreeFile>,
}

impl NormalizedTree {
    /// Walk `root` and run every file through its pre-processing stage.
    /// Converted content is written under `scratch`; `root` is never modified.
    pub fn load(root: &Path, stages: &PreprocessorSet, scratch: &Path) -> Result<Self> {
        let relpaths = walk::relative_files(root)?;
        let mut files = BTreeMap::new();
        let mut pending = Vec::new();

        for relpath in relpaths {
            if stages.for_relpath(&relpath).is_some() {
                pending.push(relpath);
            } else {
                let path = root.join(&relpath);
                files.insert(
                    relpath.clone(),
                    TreeFile {
                        relpath,
                        path,
                        original: None,
                    },
                );
            }
        }

        for relpath in pending {
            let Some(stage) = stages.for_relpath(&relpath) else {
                continue;
            };
            let source_path = root.join(&relpath);
            let target = converted_relpath(&relpath, stage);

            let converted = source::read_file(&source_path).and_then(|buf| stage.convert(&buf));
            let file = match converted {
                Ok(text) if !files.contains_key(&target) => {
                    let path = scratch.join(&target);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, text).map_err(|e| {
                        AnalysisError::new(
                            ErrorCode::IoError,
                            format!("Failed to write {}: {e}", path.display()),
                        )
                    })?;
                    TreeFile {
                        relpath: target,
                        path,
                        original: Some(relpath),
                    }
                }
                Ok(_) => {
                    warn!(relpath = %relpath, target = %target, "converted name already exists, comparing unconverted");
                    TreeFile {
                        relpath: relpath.clone(),
                        path: source_path,
                        original: None,
                    }
                }
                Err(e) => {
                    warn!(relpath = %relpath, error = %e, "pre-processing failed, comparing unconverted");
                    TreeFile {
                        relpath: relpath.clone(),
                        path: source_path,
                        original: None,
                    }
                }
            };
            files.insert(file.relpath.clone(), file);
        }

        Ok(Self { files })
    }

    pub fn get(&self, relpath: &str) -> Option<&TreeFile> {
        self.files.get(relpath)
    }

    pub fn files(&self) -> impl Iterator<Item = &TreeFile> {
        self.files.values()
    }

    pub fn relpaths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Content hashes of the staged template files, by normalized relpath.
#[derive(Debug, Default)]
pub struct TemplateIndex {
    hashes: HashMap<String, blake3::Hash>,
}

impl TemplateIndex {
    pub fn from_tree(tree: &NormalizedTree) -> Result<Self> {
        let mut hashes = HashMap::with_capacity(tree.len());
        for file in tree.files() {
            hashes.insert(file.relpath.clone(), source::hash_file(&file.path)?);
        }
        Ok(Self { hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// True if `file` is byte-identical to the template at the same relpath.
    pub fn suppresses(&self, file: &TreeFile) -> bool {
        let Some(expected) = self.hashes.get(&file.relpath) else {
            return false;
        };
        match source::hash_file(&file.path) {
            Ok(actual) => actual == *expected,
            Err(e) => {
                warn!(relpath = %file.relpath, error = %e, "cannot hash file for template check");
                false
            }
        }
    }
}

/// A relpath present in both trees.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedFile {
    pub relpath: String,
    pub paths: [PathBuf; 2],
    pub original: Option<String>,
}

/// Which files get compared, and which are only recorded.
#[derive(Debug, Default, PartialEq)]
pub struct FilePlan {
    pub matched: Vec<MatchedFile>,
    pub unmatched: Vec<[String; 2]>,
    pub skipped: Vec<String>,
}

fn is_skipped(file: &TreeFile, options: &AnalysisOptions, templates: &TemplateIndex) -> bool {
    !options.match_relpath(&file.relpath) || templates.suppresses(file)
}

/// Match two normalized trees by relpath, applying filters and template suppression.
pub fn plan(
    trees: [&NormalizedTree; 2],
    options: &AnalysisOptions,
    templates: &TemplateIndex,
) -> FilePlan {
    let relpaths: BTreeSet<&str> = trees[0].relpaths().chain(trees[1].relpaths()).collect();
    let mut plan = FilePlan::default();

    for relpath in relpaths {
        let first = trees[0].get(relpath);
        let second = trees[1].get(relpath);

        if [first, second]
            .into_iter()
            .flatten()
            .any(|f| is_skipped(f, options, templates))
        {
            plan.skipped.push(relpath.to_string());
            continue;
        }

        match (first, second) {
            (Some(a), Some(b)) => plan.matched.push(MatchedFile {
                relpath: relpath.to_string(),
                paths: [a.path.clone(), b.path.clone()],
                original: a.original.clone().or_else(|| b.original.clone()),
            }),
            (Some(_), None) => plan.unmatched.push([relpath.to_string(), String::new()]),
            (None, Some(_)) => plan.unmatched.push([String::new(), relpath.to_string()]),
            (None, None) => {}
        }
    }

    plan
}

/// The comparable files of a single tree, plus the skipped relpaths.
pub fn select<'a>(
    tree: &'a NormalizedTree,
    options: &AnalysisOptions,
    templates: &TemplateIndex,
) -> (Vec<&'a TreeFile>, Vec<String>) {
    let mut selected = Vec::new();
    let mut skipped = Vec::new();
    for file in tree.files() {
        if is_skipped(file, options, templates) {
            skipped.push(file.relpath.clone());
        } else {
            selected.push(file);
        }
    }
    (selected, skipped)
}

/// Engine results for a plan.
#[derive(Debug, Default)]
pub struct Comparison {
    pub similarities: BTreeMap<String, Vec<FileSimilarity>>,
    /// Engine-level failures as `(engine, relpath, message)`.
    pub failures: Vec<(String, String, String)>,
    pub engine_time: Duration,
}

/// Run every matched file through every engine, in engine order.
/// An engine failure drops only that engine's entry for that file.
pub fn compare(plan: &FilePlan, engines: &[Arc<dyn SimilarityEngine>]) -> Comparison {
    let mut comparison = Comparison::default();
    let started = Instant::now();

    for file in &plan.matched {
        let paths = [file.paths[0].as_path(), file.paths[1].as_path()];
        let mut results = Vec::with_capacity(engines.len());
        for engine in engines {
            match engine.compute_file_similarity(paths, &file.relpath, file.original.as_deref()) {
                Ok(similarity) => results.push(similarity),
                Err(e) => {
                    warn!(engine = engine.name(), relpath = %file.relpath, error = %e, "engine comparison failed");
                    comparison.failures.push((
                        engine.name().to_string(),
                        file.relpath.clone(),
                        format!("{e:#}"),
                    ));
                }
            }
        }
        if !results.is_empty() {
            comparison.similarities.insert(file.relpath.clone(), results);
        }
    }

    comparison.engine_time = started.elapsed();
    debug!(
        files = plan.matched.len(),
        engines = engines.len(),
        failures = comparison.failures.len(),
        elapsed_ms = comparison.engine_time.as_millis() as u64,
        "comparison finished"
    );
    comparison
}
