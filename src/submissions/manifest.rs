use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{SubmissionInfo, SubmissionSource};
use crate::error::{AnalysisError, ErrorCode};
use crate::models::options::AnalysisOptions;
use crate::models::timestamp::Timestamp;

/// A YAML (or JSON) listing of assignments and submissions.
///
/// Relative paths are resolved against the manifest's directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    #[serde(default)]
    pub assignments: Vec<AssignmentEntry>,
    #[serde(default)]
    pub submissions: Vec<SubmissionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssignmentEntry {
    pub course: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_options: Option<AnalysisOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubmissionEntry {
    pub id: String,
    pub course: String,
    pub assignment: String,
    pub user: String,
    /// Milliseconds since the epoch.
    pub timestamp: Timestamp,
    #[serde(default)]
    pub score: f64,
    pub path: PathBuf,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::new(
                ErrorCode::IoError,
                format!("Failed to read manifest {}: {e}", path.display()),
            )
        })?;
        serde_yaml::from_str(&content).with_context(|| {
            AnalysisError::config(format!("Invalid manifest {}", path.display()))
        })
    }
}

/// `SubmissionSource` backed by a manifest.
#[derive(Debug)]
pub struct ManifestSource {
    base_dir: PathBuf,
    submissions: HashMap<String, SubmissionInfo>,
    assignments: HashMap<(String, String), AssignmentEntry>,
}

impl ManifestSource {
    pub fn open(path: &Path) -> Result<Self> {
        let manifest = Manifest::load(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(manifest, base_dir)
    }

    /// Index `manifest`, validating every assignment's options.
    pub fn new(manifest: Manifest, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();

        let mut assignments = HashMap::new();
        for mut entry in manifest.assignments {
            if let Some(options) = entry.analysis_options.as_mut() {
                options.validate().with_context(|| {
                    format!("Assignment {}/{} has invalid analysis options", entry.course, entry.id)
                })?;
            }
            let key = (entry.course.clone(), entry.id.clone());
            if assignments.insert(key, entry).is_some() {
                bail!(AnalysisError::config("Duplicate assignment in manifest"));
            }
        }

        let mut submissions = HashMap::new();
        for entry in manifest.submissions {
            let info = SubmissionInfo {
                id: entry.id.clone(),
                course_id: entry.course,
                assignment_id: entry.assignment,
                user_email: entry.user,
                timestamp: entry.timestamp,
                score: entry.score,
                path: base_dir.join(entry.path),
            };
            if submissions.insert(entry.id.clone(), info).is_some() {
                bail!(AnalysisError::config(format!(
                    "Duplicate submission id '{}' in manifest",
                    entry.id
                )));
            }
        }

        Ok(Self {
            base_dir,
            submissions,
            assignments,
        })
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }
}

impl SubmissionSource for ManifestSource {
    fn submission(&self, id: &str) -> Result<SubmissionInfo> {
        self.submissions
            .get(id)
            .cloned()
            .ok_or_else(|| AnalysisError::submission_not_found(id).into())
    }

    fn previous_submission(&self, id: &str) -> Result<Option<SubmissionInfo>> {
        let current = self.submission(id)?;
        Ok(self
            .submissions
            .values()
            .filter(|s| {
                s.course_id == current.course_id
                    && s.assignment_id == current.assignment_id
                    && s.user_email == current.user_email
                    && s.timestamp < current.timestamp
            })
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    fn assignment_options(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Option<AnalysisOptions>> {
        Ok(self
            .assignments
            .get(&(course_id.to_string(), assignment_id.to_string()))
            .and_then(|a| a.analysis_options.clone()))
    }

    fn template_base_dir(&self, course_id: &str, assignment_id: &str) -> Result<PathBuf> {
        let dir = self
            .assignments
            .get(&(course_id.to_string(), assignment_id.to_string()))
            .and_then(|a| a.template_dir.as_ref())
            .map(|d| self.base_dir.join(d))
            .unwrap_or_else(|| self.base_dir.clone());
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_code;

    const MANIFEST: &str = r#"
assignments:
  - course: c101
    id: hw1
    template-dir: templates
    analysis-options:
      include-patterns: ['\.py$']
submissions:
  - {id: s1, course: c101, assignment: hw1, user: alice@test.edu, timestamp: 1000, score: 5, path: subs/s1}
  - {id: s2, course: c101, assignment: hw1, user: alice@test.edu, timestamp: 61000, score: 8, path: subs/s2}
  - {id: s3, course: c101, assignment: hw1, user: bob@test.edu, timestamp: 30000, score: 9, path: subs/s3}
  - {id: s4, course: c101, assignment: hw2, user: alice@test.edu, timestamp: 500, path: subs/s4}
"#;

    fn source() -> (tempfile::TempDir, ManifestSource) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.yaml");
        std::fs::write(&path, MANIFEST).unwrap();
        let source = ManifestSource::open(&path).unwrap();
        (dir, source)
    }

    #[test]
    fn submissions_resolve_relative_paths() {
        let (dir, source) = source();
        let s1 = source.submission("s1").unwrap();
        assert_eq!(s1.course_id, "c101");
        assert_eq!(s1.user_email, "alice@test.edu");
        assert_eq!(s1.path, dir.path().join("subs/s1"));
        assert_eq!(source.len(), 4);
    }

    #[test]
    fn unknown_submission() {
        let (_dir, source) = source();
        let err = source.submission("nope").unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::SubmissionNotFound));
    }

    #[test]
    fn previous_is_same_author_and_assignment() {
        let (_dir, source) = source();
        assert_eq!(source.previous_submission("s2").unwrap().unwrap().id, "s1");
        assert!(source.previous_submission("s1").unwrap().is_none());
        assert!(source.previous_submission("s3").unwrap().is_none());
        assert!(source.previous_submission("s4").unwrap().is_none());
    }

    #[test]
    fn options_are_validated() {
        let (dir, source) = source();
        let options = source.assignment_options("c101", "hw1").unwrap().unwrap();
        assert!(options.match_relpath("a.py"));
        assert!(!options.match_relpath("a.txt"));
        assert!(source.assignment_options("c101", "hw2").unwrap().is_none());
        assert_eq!(
            source.template_base_dir("c101", "hw1").unwrap(),
            dir.path().join("templates")
        );
        assert_eq!(source.template_base_dir("c101", "hw2").unwrap(), dir.path());
    }

    #[test]
    fn invalid_options_rejected() {
        let manifest: Manifest = serde_yaml::from_str(
            "assignments:\n  - {course: c, id: a, analysis-options: {exclude-patterns: ['(']}}\n",
        )
        .unwrap();
        let err = ManifestSource::new(manifest, ".").unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ConfigError));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let manifest: Manifest = serde_yaml::from_str(
            "submissions:\n  - {id: x, course: c, assignment: a, user: u, timestamp: 1, path: p}\n  - {id: x, course: c, assignment: a, user: u, timestamp: 2, path: q}\n",
        )
        .unwrap();
        assert!(ManifestSource::new(manifest, ".").is_err());
    }
}
