#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use autograder_analysis::cache::memory::MemoryStore;
use autograder_analysis::cache::{AnalysisStore, Claim, RecordKey};
use autograder_analysis::engine::{ReferenceEngine, SimilarityEngine};
use autograder_analysis::error::AnalysisError;
use autograder_analysis::metrics::MemoryMetrics;
use autograder_analysis::models::individual::IndividualAnalysis;
use autograder_analysis::models::key::PairwiseKey;
use autograder_analysis::models::options::AnalysisOptions;
use autograder_analysis::models::pairwise::PairwiseAnalysis;
use autograder_analysis::models::similarity::FileSimilarity;
use autograder_analysis::models::timestamp::Timestamp;
use autograder_analysis::service::AnalysisService;
use autograder_analysis::submissions::manifest::{AssignmentEntry, SubmissionEntry};
use autograder_analysis::submissions::{Manifest, ManifestSource};

pub const PROGRAM: &str = "def add(a, b):\n    return a + b\n\nprint(add(1, 2))\n";

pub const NOTEBOOK: &str = r##"{
  "nbformat": 4,
  "nbformat_minor": 5,
  "metadata": {},
  "cells": [
    {"cell_type": "markdown", "metadata": {}, "source": ["# Homework 1"]},
    {"cell_type": "code", "metadata": {}, "execution_count": 1, "outputs": [],
     "source": ["def add(a, b):\n", "    return a + b"]},
    {"cell_type": "code", "metadata": {}, "execution_count": 2, "outputs": [],
     "source": "print(add(1, 2))"}
  ]
}"##;

/// Wraps the reference engine and counts how often it runs.
pub struct CountingEngine {
    inner: ReferenceEngine,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ReferenceEngine,
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SimilarityEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let mut similarity = self.inner.compute_file_similarity(paths, relpath, original)?;
        similarity.tool = self.name().to_string();
        Ok(similarity)
    }
}

/// Fails its first `failures` comparisons with an engine error, then
/// behaves like the reference engine under the name "flaky".
pub struct FlakyEngine {
    inner: ReferenceEngine,
    calls: AtomicUsize,
    failures: usize,
}

impl FlakyEngine {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: ReferenceEngine,
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SimilarityEngine for FlakyEngine {
    fn name(&self) -> &str {
        "flaky"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            bail!(AnalysisError::engine(self.name(), "timed out after 1s"));
        }
        let mut similarity = self.inner.compute_file_similarity(paths, relpath, original)?;
        similarity.tool = self.name().to_string();
        Ok(similarity)
    }
}

/// A memory store whose record writes always fail.
pub struct ReadOnlyStore {
    pub inner: MemoryStore,
}

impl AnalysisStore for ReadOnlyStore {
    fn get_pairwise(&self, keys: &[PairwiseKey]) -> Result<HashMap<PairwiseKey, PairwiseAnalysis>> {
        self.inner.get_pairwise(keys)
    }

    fn save_pairwise(&self, record: &PairwiseAnalysis) -> Result<()> {
        bail!(AnalysisError::cache(format!(
            "store is read-only, cannot save {}",
            record.submission_ids.cache_id()
        )))
    }

    fn get_individual(&self, ids: &[String]) -> Result<HashMap<String, IndividualAnalysis>> {
        self.inner.get_individual(ids)
    }

    fn save_individual(&self, record: &IndividualAnalysis) -> Result<()> {
        bail!(AnalysisError::cache(format!(
            "store is read-only, cannot save {}",
            record.submission_id
        )))
    }

    fn claim(&self, key: &RecordKey) -> Result<Claim> {
        self.inner.claim(key)
    }

    fn release(&self, key: &RecordKey) -> Result<()> {
        self.inner.release(key)
    }

    fn wait_for_release(&self, key: &RecordKey, timeout: Duration) -> Result<bool> {
        self.inner.wait_for_release(key, timeout)
    }

    fn remove(&self, key: &RecordKey) -> Result<bool> {
        self.inner.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}

/// Submission trees plus the manifest describing them, in a temp dir.
pub struct Course {
    pub dir: tempfile::TempDir,
    pub assignments: Vec<AssignmentEntry>,
    pub submissions: Vec<SubmissionEntry>,
}

impl Course {
    pub fn new() -> Self {
        Self {
            dir: tempfile::TempDir::new().unwrap(),
            assignments: Vec::new(),
            submissions: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relpath: &str, content: &str) -> PathBuf {
        let path = self.root().join(relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn assignment(mut self, id: &str, options: Option<AnalysisOptions>) -> Self {
        self.assignments.push(AssignmentEntry {
            course: "c101".to_string(),
            id: id.to_string(),
            template_dir: Some(PathBuf::from("templates")),
            analysis_options: options,
        });
        self
    }

    /// Add submission `id` whose tree holds `files` (relpath, content).
    pub fn submission(
        mut self,
        id: &str,
        assignment: &str,
        user: &str,
        (minute, score): (i64, f64),
        files: &[(&str, &str)],
    ) -> Self {
        for (relpath, content) in files {
            self.write(&format!("subs/{id}/{relpath}"), content);
        }
        fs::create_dir_all(self.root().join("subs").join(id)).unwrap();
        self.submissions.push(SubmissionEntry {
            id: id.to_string(),
            course: "c101".to_string(),
            assignment: assignment.to_string(),
            user: user.to_string(),
            timestamp: Timestamp(minute * 60_000),
            score,
            path: PathBuf::from("subs").join(id),
        });
        self
    }

    pub fn source(&self) -> ManifestSource {
        let manifest = Manifest {
            assignments: self.assignments.clone(),
            submissions: self.submissions.clone(),
        };
        ManifestSource::new(manifest, self.root()).unwrap()
    }
}

pub struct Harness {
    pub service: AnalysisService,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<MemoryMetrics>,
}

pub fn harness(course: &Course, engines: Vec<Arc<dyn SimilarityEngine>>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(MemoryMetrics::new());
    let service = service(course, engines, store.clone(), metrics.clone());
    Harness {
        service,
        store,
        metrics,
    }
}

pub fn service(
    course: &Course,
    engines: Vec<Arc<dyn SimilarityEngine>>,
    store: Arc<dyn AnalysisStore>,
    metrics: Arc<MemoryMetrics>,
) -> AnalysisService {
    AnalysisService::new(engines, store, Arc::new(course.source()), metrics)
        .with_claim_timeout(Duration::from_secs(30))
}

pub fn reference_harness(course: &Course) -> Harness {
    harness(course, vec![Arc::new(ReferenceEngine)])
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Poll until `done` holds, failing after a few seconds.
pub fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("condition not reached in time");
}
