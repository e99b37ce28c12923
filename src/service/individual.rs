use anyhow::{Context, Result};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{AnalysisResults, AnalysisService, AssignmentContext, Resolved};
use crate::cache::{ClaimGuard, RecordKey};
use crate::metrics::AnalysisKind;
use crate::models::individual::{AnalysisFileInfo, IndividualAnalysis, Predecessor};
use crate::models::timestamp::Timestamp;
use crate::reconcile::{self, NormalizedTree};
use crate::source;
use crate::submissions::SubmissionInfo;

struct IndividualJob {
    submission: SubmissionInfo,
    previous: Option<SubmissionInfo>,
    context: Arc<AssignmentContext>,
}

impl AnalysisService {
    /// Per-submission size and trend analysis, cached per submission id with
    /// the same claim discipline as pairwise analysis.
    pub fn individual_analysis(
        &self,
        submission_ids: &[String],
        wait: bool,
        requester: &str,
    ) -> Result<AnalysisResults<IndividualAnalysis>> {
        let mut ids: Vec<String> = submission_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut cached = self.store.get_individual(&ids)?;
        let misses: Vec<String> = ids.iter().filter(|id| !cached.contains_key(*id)).cloned().collect();
        let results: Vec<IndividualAnalysis> = ids.iter().filter_map(|id| cached.remove(id)).collect();

        info!(
            ids = ids.len(),
            hits = results.len(),
            misses = misses.len(),
            wait = wait,
            "individual analysis requested"
        );

        if misses.is_empty() {
            return Ok(AnalysisResults::cached(results));
        }

        let jobs = self.individual_jobs(&misses)?;

        if !wait {
            let pending_count = jobs.len();
            let service = self.clone();
            let requester = requester.to_string();
            rayon::spawn(move || {
                jobs.par_iter().for_each(|job| {
                    if let Err(e) = service.resolve_individual(job, false, &requester) {
                        let message = format!("{e:#}");
                        warn!(submission = %job.submission.id, error = %message, "background individual analysis failed");
                    }
                });
            });
            return Ok(AnalysisResults {
                pending_count,
                ..AnalysisResults::cached(results)
            });
        }

        let outcomes: Vec<Result<Resolved<IndividualAnalysis>>> = jobs
            .par_iter()
            .map(|job| self.resolve_individual(job, true, requester))
            .collect();

        let mut batch = AnalysisResults::gather(results, outcomes)?;
        batch.results.sort_by(|a, b| a.submission_id.cmp(&b.submission_id));
        Ok(batch)
    }

    fn individual_jobs(&self, misses: &[String]) -> Result<Vec<IndividualJob>> {
        let mut found = Vec::with_capacity(misses.len());
        for id in misses {
            let submission = self.submissions.submission(id)?;
            let previous = self.submissions.previous_submission(id)?;
            found.push((submission, previous));
        }

        let contexts = self.assignment_contexts(
            found
                .iter()
                .map(|(s, _)| (s.course_id.as_str(), s.assignment_id.as_str())),
        )?;

        let mut jobs = Vec::with_capacity(found.len());
        for (submission, previous) in found {
            let lookup = (submission.course_id.clone(), submission.assignment_id.clone());
            let Some(context) = contexts.get(&lookup) else {
                continue;
            };
            jobs.push(IndividualJob {
                submission,
                previous,
                context: Arc::clone(context),
            });
        }
        Ok(jobs)
    }

    fn resolve_individual(
        &self,
        job: &IndividualJob,
        wait: bool,
        requester: &str,
    ) -> Result<Resolved<IndividualAnalysis>> {
        let id = &job.submission.id;
        let record_key = RecordKey::Individual(id.clone());
        let context = &job.context;
        let describe = || {
            format!(
                "individual analysis of {id} (course {}, assignment {})",
                context.course_id, context.assignment_id
            )
        };
        let lookup = std::slice::from_ref(id);

        let Some(guard) = ClaimGuard::try_acquire(&self.store, record_key.clone()).with_context(describe)? else {
            if !wait {
                return Ok(Resolved::Pending);
            }
            debug!(key = %record_key, "claimed elsewhere, waiting");
            self.store
                .wait_for_release(&record_key, self.claim_timeout)
                .with_context(describe)?;
            let mut found = self.store.get_individual(lookup).with_context(describe)?;
            return Ok(found.remove(id).map_or(Resolved::Pending, Resolved::Record));
        };

        let mut found = self.store.get_individual(lookup).with_context(describe)?;
        if let Some(record) = found.remove(id) {
            guard.release().with_context(describe)?;
            return Ok(Resolved::Record(record));
        }

        let started = Instant::now();
        let record = self.compute_individual(job).with_context(describe)?;
        let elapsed = started.elapsed();

        self.store.save_individual(&record).with_context(describe)?;
        guard.release().with_context(describe)?;
        self.record_metric(AnalysisKind::Individual, context, requester, elapsed);

        info!(
            key = %record_key,
            course = %context.course_id,
            assignment = %context.assignment_id,
            lines_of_code = record.lines_of_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "individual analysis computed"
        );
        Ok(Resolved::Record(record))
    }

    fn compute_individual(&self, job: &IndividualJob) -> Result<IndividualAnalysis> {
        let (files, skipped_files) = self.measure(&job.submission, &job.context)?;
        let lines_of_code = files.iter().map(|f| f.lines_of_code).sum();

        let mut record = IndividualAnalysis {
            options: Some(job.context.options.clone()),
            analysis_timestamp: Timestamp::now(),
            submission_id: job.submission.id.clone(),
            submission_timestamp: job.submission.timestamp,
            score: job.submission.score,
            lines_of_code,
            files,
            skipped_files,
            ..IndividualAnalysis::default()
        };

        let predecessor = match &job.previous {
            Some(previous) => Some(self.predecessor(previous, &job.context)?),
            None => None,
        };
        record.apply_predecessor(predecessor.as_ref());
        Ok(record)
    }

    /// Figures of an earlier submission: from its cached record when there is
    /// one, measured directly otherwise.
    fn predecessor(&self, previous: &SubmissionInfo, context: &AssignmentContext) -> Result<Predecessor> {
        if let Some(record) = self
            .store
            .get_individual(std::slice::from_ref(&previous.id))?
            .remove(&previous.id)
        {
            return Ok(record.predecessor());
        }

        let (files, _) = self.measure(previous, context)?;
        Ok(Predecessor {
            submission_timestamp: previous.timestamp,
            score: previous.score,
            lines_of_code: files.iter().map(|f| f.lines_of_code).sum(),
        })
    }

    /// Lines of code of every comparable file, plus the skipped relpaths.
    fn measure(
        &self,
        submission: &SubmissionInfo,
        context: &AssignmentContext,
    ) -> Result<(Vec<AnalysisFileInfo>, Vec<String>)> {
        let scratch = tempfile::TempDir::new()?;
        let tree = NormalizedTree::load(&submission.path, &self.preprocessors, scratch.path())?;
        let (selected, skipped) = reconcile::select(&tree, &context.options, &context.templates);

        let mut files = Vec::with_capacity(selected.len());
        for file in selected {
            let content = source::read_file(&file.path)?;
            files.push(AnalysisFileInfo {
                filename: file.relpath.clone(),
                original_filename: file.original.clone(),
                lines_of_code: source::count_lines_of_code(&content),
            });
        }
        Ok((files, skipped))
    }
}
