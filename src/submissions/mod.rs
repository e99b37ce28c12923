//! Where submission trees and their metadata come from.

pub mod manifest;

use anyhow::Result;
use std::path::PathBuf;

use crate::models::options::AnalysisOptions;
use crate::models::timestamp::Timestamp;

pub use manifest::{Manifest, ManifestSource};

/// A submission's metadata and its materialized working tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionInfo {
    pub id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub user_email: String,
    pub timestamp: Timestamp,
    pub score: f64,
    /// Read-only directory holding the submitted files.
    pub path: PathBuf,
}

/// The submission-content collaborator.
pub trait SubmissionSource: Send + Sync {
    /// Fails with `SubmissionNotFound` for unknown ids.
    fn submission(&self, id: &str) -> Result<SubmissionInfo>;

    /// The same author's latest earlier submission for the same assignment.
    fn previous_submission(&self, id: &str) -> Result<Option<SubmissionInfo>>;

    /// Validated analysis options of an assignment, if it declares any.
    fn assignment_options(&self, course_id: &str, assignment_id: &str)
    -> Result<Option<AnalysisOptions>>;

    /// Directory that relative template paths resolve against.
    fn template_base_dir(&self, course_id: &str, assignment_id: &str) -> Result<PathBuf>;
}
