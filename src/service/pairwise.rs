use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{AnalysisResults, AnalysisService, AssignmentContext, KeyFailure, Resolved};
use crate::cache::{ClaimGuard, RecordKey};
use crate::error::{AnalysisError, ErrorCode};
use crate::metrics::AnalysisKind;
use crate::models::key::PairwiseKey;
use crate::models::pairwise::PairwiseAnalysis;
use crate::reconcile::{self, NormalizedTree};
use crate::submissions::SubmissionInfo;

/// One cache miss, resolved up front so failures surface before any work starts.
struct PairwiseJob {
    key: PairwiseKey,
    submissions: [SubmissionInfo; 2],
    context: Arc<AssignmentContext>,
}

impl AnalysisService {
    /// Analyze every unordered pair of `submission_ids`.
    ///
    /// Cached records are returned as they are. Each miss is computed by
    /// exactly one caller (whoever claims it); with `wait` the call returns
    /// once every miss is resolved, otherwise misses are computed in the
    /// background and counted as pending.
    pub fn pairwise_analysis(
        &self,
        submission_ids: &[String],
        wait: bool,
        requester: &str,
    ) -> Result<AnalysisResults<PairwiseAnalysis>> {
        let keys = PairwiseKey::enumerate(submission_ids);
        let mut cached = self.store.get_pairwise(&keys)?;

        let misses: Vec<PairwiseKey> = keys.iter().filter(|k| !cached.contains_key(k)).cloned().collect();
        let results: Vec<PairwiseAnalysis> = keys.iter().filter_map(|k| cached.remove(k)).collect();

        info!(
            keys = keys.len(),
            hits = results.len(),
            misses = misses.len(),
            wait = wait,
            "pairwise analysis requested"
        );

        if misses.is_empty() {
            return Ok(AnalysisResults::cached(results));
        }

        let jobs = self.pairwise_jobs(&misses)?;

        if !wait {
            let pending_count = jobs.len();
            let service = self.clone();
            let requester = requester.to_string();
            rayon::spawn(move || {
                jobs.par_iter().for_each(|job| {
                    if let Err(e) = service.resolve_pairwise(job, false, &requester) {
                        let message = format!("{e:#}");
                        warn!(key = %job.key.cache_id(), error = %message, "background pairwise analysis failed");
                    }
                });
            });
            return Ok(AnalysisResults {
                pending_count,
                ..AnalysisResults::cached(results)
            });
        }

        let outcomes: Vec<Result<Resolved<PairwiseAnalysis>>> = jobs
            .par_iter()
            .map(|job| self.resolve_pairwise(job, true, requester))
            .collect();

        let mut batch = AnalysisResults::gather(results, outcomes)?;
        batch.results.sort_by(|a, b| a.submission_ids.cmp(&b.submission_ids));
        if batch.has_failures() {
            warn!(failed = batch.failures.len(), "pairwise records returned with missing engine contributions");
        }
        Ok(batch)
    }

    fn pairwise_jobs(&self, misses: &[PairwiseKey]) -> Result<Vec<PairwiseJob>> {
        let mut pairs = Vec::with_capacity(misses.len());
        for key in misses {
            let first = self.submissions.submission(key.first())?;
            let second = self.submissions.submission(key.second())?;
            if first.course_id != second.course_id || first.assignment_id != second.assignment_id {
                bail!(AnalysisError::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Submissions of pair {} belong to different assignments ({}/{} and {}/{})",
                        key.cache_id(),
                        first.course_id,
                        first.assignment_id,
                        second.course_id,
                        second.assignment_id
                    ),
                ));
            }
            pairs.push((key.clone(), [first, second]));
        }

        let contexts = self.assignment_contexts(
            pairs
                .iter()
                .map(|(_, s)| (s[0].course_id.as_str(), s[0].assignment_id.as_str())),
        )?;

        let mut jobs = Vec::with_capacity(pairs.len());
        for (key, submissions) in pairs {
            let lookup = (submissions[0].course_id.clone(), submissions[0].assignment_id.clone());
            let Some(context) = contexts.get(&lookup) else {
                continue;
            };
            jobs.push(PairwiseJob {
                key,
                submissions,
                context: Arc::clone(context),
            });
        }
        Ok(jobs)
    }

    /// Compute one pair under its claim, or wait for whoever holds the claim.
    fn resolve_pairwise(
        &self,
        job: &PairwiseJob,
        wait: bool,
        requester: &str,
    ) -> Result<Resolved<PairwiseAnalysis>> {
        let record_key = RecordKey::Pairwise(job.key.clone());
        let context = &job.context;
        let describe = || {
            format!(
                "pairwise analysis {} (course {}, assignment {})",
                job.key.cache_id(),
                context.course_id,
                context.assignment_id
            )
        };

        let Some(guard) = ClaimGuard::try_acquire(&self.store, record_key.clone()).with_context(describe)? else {
            if !wait {
                return Ok(Resolved::Pending);
            }
            debug!(key = %record_key, "claimed elsewhere, waiting");
            self.store
                .wait_for_release(&record_key, self.claim_timeout)
                .with_context(describe)?;
            let mut found = self.store.get_pairwise(std::slice::from_ref(&job.key)).with_context(describe)?;
            return Ok(found.remove(&job.key).map_or(Resolved::Pending, Resolved::Record));
        };

        // Finished by another process between our lookup and our claim.
        let mut found = self.store.get_pairwise(std::slice::from_ref(&job.key)).with_context(describe)?;
        if let Some(record) = found.remove(&job.key) {
            guard.release().with_context(describe)?;
            return Ok(Resolved::Record(record));
        }

        let started = Instant::now();
        let (record, errors) = self.compute_pairwise(job).with_context(describe)?;
        let elapsed = started.elapsed();

        if !errors.is_empty() {
            // Not cached: the failed engines get another chance next request.
            guard.release().with_context(describe)?;
            self.record_metric(AnalysisKind::Pairwise, context, requester, elapsed);
            warn!(
                key = %record_key,
                course = %context.course_id,
                assignment = %context.assignment_id,
                errors = errors.len(),
                "pairwise analysis incomplete, not cached"
            );
            let failure = KeyFailure {
                key: record_key.to_string(),
                errors,
            };
            return Ok(Resolved::Degraded(record, failure));
        }

        self.store.save_pairwise(&record).with_context(describe)?;
        guard.release().with_context(describe)?;
        self.record_metric(AnalysisKind::Pairwise, context, requester, elapsed);

        info!(
            key = %record_key,
            course = %context.course_id,
            assignment = %context.assignment_id,
            files = record.similarities.len(),
            total_mean = record.total_mean_similarity,
            elapsed_ms = elapsed.as_millis() as u64,
            "pairwise analysis computed"
        );
        Ok(Resolved::Record(record))
    }

    /// The record plus one message per dropped engine contribution.
    fn compute_pairwise(&self, job: &PairwiseJob) -> Result<(PairwiseAnalysis, Vec<String>)> {
        let scratch = tempfile::TempDir::new()?;
        let first = NormalizedTree::load(
            &job.submissions[0].path,
            &self.preprocessors,
            &scratch.path().join("first"),
        )?;
        let second = NormalizedTree::load(
            &job.submissions[1].path,
            &self.preprocessors,
            &scratch.path().join("second"),
        )?;

        let context = &job.context;
        let plan = reconcile::plan([&first, &second], &context.options, &context.templates);
        let comparison = reconcile::compare(&plan, &self.engines);
        let mut errors = Vec::with_capacity(comparison.failures.len());
        for (engine, relpath, message) in &comparison.failures {
            warn!(
                key = %job.key.cache_id(),
                course = %context.course_id,
                assignment = %context.assignment_id,
                engine = %engine,
                relpath = %relpath,
                error = %message,
                "engine contribution dropped"
            );
            errors.push(format!("{engine} on {relpath}: {message}"));
        }

        let record = PairwiseAnalysis::new(
            job.key.clone(),
            Some(context.options.clone()),
            comparison.similarities,
            plan.unmatched,
            plan.skipped,
        );
        Ok((record, errors))
    }
}
