use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{AnalysisStore, RecordKey};
use crate::engine::SimilarityEngine;
use crate::metrics::{AnalysisKind, CourseMetric, MetricsRecorder};
use crate::models::options::AnalysisOptions;
use crate::reconcile::preprocess::PreprocessorSet;
use crate::reconcile::{NormalizedTree, TemplateIndex};
use crate::submissions::SubmissionSource;

mod individual;
mod pairwise;

/// Default time a caller that lost a claim waits for the winner.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// AnalysisService: pairwise and individual analysis over a shared cache
// ---------------------------------------------------------------------------

/// Entry point for analyses. Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct AnalysisService {
    engines: Arc<Vec<Arc<dyn SimilarityEngine>>>,
    store: Arc<dyn AnalysisStore>,
    submissions: Arc<dyn SubmissionSource>,
    metrics: Arc<dyn MetricsRecorder>,
    preprocessors: PreprocessorSet,
    claim_timeout: Duration,
}

/// Results of one request: what is available now, how many records are
/// still being computed (or were claimed elsewhere and not finished in time),
/// and which returned records are missing contributions.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResults<T> {
    pub results: Vec<T>,
    pub pending_count: usize,
    pub failures: Vec<KeyFailure>,
}

/// A key whose record was returned with contributions missing. Such a record
/// is not cached, so the next request computes the key again.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeyFailure {
    pub key: String,
    pub errors: Vec<String>,
}

/// Outcome of resolving one cache miss.
pub(crate) enum Resolved<T> {
    Record(T),
    Degraded(T, KeyFailure),
    Pending,
}

impl<T> AnalysisResults<T> {
    /// Cache hits only.
    pub(crate) fn cached(results: Vec<T>) -> Self {
        Self {
            results,
            pending_count: 0,
            failures: Vec::new(),
        }
    }

    /// Add resolved misses to `results`. Any key-level error fails the whole
    /// request, reported once every job has finished.
    pub(crate) fn gather(results: Vec<T>, outcomes: Vec<Result<Resolved<T>>>) -> Result<Self> {
        let mut batch = Self::cached(results);
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Resolved::Record(record)) => batch.results.push(record),
                Ok(Resolved::Degraded(record, failure)) => {
                    batch.results.push(record);
                    batch.failures.push(failure);
                }
                Ok(Resolved::Pending) => batch.pending_count += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        batch.failures.sort_by(|a, b| a.key.cmp(&b.key));
        match first_error {
            Some(e) => Err(e),
            None => Ok(batch),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending_count == 0
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Options and template fingerprints of one assignment, for one request.
pub(crate) struct AssignmentContext {
    pub course_id: String,
    pub assignment_id: String,
    pub options: AnalysisOptions,
    pub templates: TemplateIndex,
}

impl AnalysisService {
    pub fn new(
        engines: Vec<Arc<dyn SimilarityEngine>>,
        store: Arc<dyn AnalysisStore>,
        submissions: Arc<dyn SubmissionSource>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            engines: Arc::new(engines),
            store,
            submissions,
            metrics,
            preprocessors: PreprocessorSet::default(),
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn with_preprocessors(mut self, preprocessors: PreprocessorSet) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    pub fn engines(&self) -> &[Arc<dyn SimilarityEngine>] {
        &self.engines
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    /// Drop a cached record, e.g. after an assignment's options changed.
    pub fn invalidate(&self, key: &RecordKey) -> Result<bool> {
        self.store.remove(key)
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Load options and stage templates for every distinct assignment in `assignments`.
    pub(crate) fn assignment_contexts<'a>(
        &self,
        assignments: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<HashMap<(String, String), Arc<AssignmentContext>>> {
        let mut contexts = HashMap::new();
        for (course_id, assignment_id) in assignments {
            let key = (course_id.to_string(), assignment_id.to_string());
            if contexts.contains_key(&key) {
                continue;
            }
            let context = self
                .assignment_context(course_id, assignment_id)
                .with_context(|| format!("course {course_id}, assignment {assignment_id}"))?;
            contexts.insert(key, Arc::new(context));
        }
        Ok(contexts)
    }

    fn assignment_context(&self, course_id: &str, assignment_id: &str) -> Result<AssignmentContext> {
        let mut options = self
            .submissions
            .assignment_options(course_id, assignment_id)?
            .unwrap_or_default();
        options.validate()?;

        let templates = if options.has_templates() {
            let base_dir = self.submissions.template_base_dir(course_id, assignment_id)?;
            let staging = tempfile::TempDir::new()?;
            let files_dir = staging.path().join("files");
            let staged = options.fetch_template_files(&base_dir, &files_dir)?;
            let tree = NormalizedTree::load(
                &files_dir,
                &self.preprocessors,
                &staging.path().join("converted"),
            )?;
            let index = TemplateIndex::from_tree(&tree)?;
            debug!(
                course = course_id,
                assignment = assignment_id,
                staged = staged.len(),
                indexed = index.len(),
                "template files staged"
            );
            index
        } else {
            TemplateIndex::default()
        };

        Ok(AssignmentContext {
            course_id: course_id.to_string(),
            assignment_id: assignment_id.to_string(),
            options,
            templates,
        })
    }

    /// Metrics are best-effort: failures are logged, never returned.
    fn record_metric(
        &self,
        kind: AnalysisKind,
        context: &AssignmentContext,
        requester: &str,
        elapsed: Duration,
    ) {
        let metric = CourseMetric::analysis_time(
            kind,
            &context.course_id,
            &context.assignment_id,
            requester,
            elapsed.as_secs_f64() * 1000.0,
        );
        if let Err(e) = self.metrics.record_course_metric(metric) {
            warn!(
                course = %context.course_id,
                assignment = %context.assignment_id,
                error = %e,
                "failed to record analysis metric"
            );
        }
    }
}
