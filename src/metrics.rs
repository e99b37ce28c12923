//! Course metrics: one event per computed analysis record.

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, ErrorCode};
use crate::models::timestamp::Timestamp;

pub const CODE_ANALYSIS_TIME: &str = "code-analysis-time";
pub const ATTR_ANALYSIS: &str = "analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Pairwise,
    Individual,
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pairwise => "pairwise",
            Self::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CourseMetric {
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub kind: String,
    pub course_id: String,
    pub assignment_id: String,
    pub user_email: String,
    /// Wall time spent computing the record, in milliseconds. Covers loading
    /// and converting both trees as well as every engine run.
    pub value: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CourseMetric {
    pub fn analysis_time(
        analysis: AnalysisKind,
        course_id: &str,
        assignment_id: &str,
        user_email: &str,
        millis: f64,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_ANALYSIS.to_string(), analysis.as_str().to_string());
        Self {
            timestamp: Timestamp::now(),
            kind: CODE_ANALYSIS_TIME.to_string(),
            course_id: course_id.to_string(),
            assignment_id: assignment_id.to_string(),
            user_email: user_email.to_string(),
            value: millis,
            attributes,
        }
    }
}

/// The metrics collaborator. Callers log failures and carry on.
pub trait MetricsRecorder: Send + Sync {
    fn record_course_metric(&self, metric: CourseMetric) -> Result<()>;
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemoryMetrics {
    events: Mutex<Vec<CourseMetric>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn events(&self) -> Vec<CourseMetric> {
        self.events.lock().clone()
    }

    pub fn for_course(&self, course_id: &str) -> Vec<CourseMetric> {
        self.events
            .lock()
            .iter()
            .filter(|m| m.course_id == course_id)
            .cloned()
            .collect()
    }
}

impl MetricsRecorder for MemoryMetrics {
    fn record_course_metric(&self, metric: CourseMetric) -> Result<()> {
        self.events.lock().push(metric);
        Ok(())
    }
}

/// Appends events as JSON lines.
pub struct JsonlMetrics {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMetrics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every event recorded so far.
    pub fn read_all(&self) -> Result<Vec<CourseMetric>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

impl MetricsRecorder for JsonlMetrics {
    fn record_course_metric(&self, metric: CourseMetric) -> Result<()> {
        let mut line = serde_json::to_string(&metric)?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AnalysisError::new(
                    ErrorCode::IoError,
                    format!("Failed to open metrics file {}: {e}", self.path.display()),
                )
            })?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Discards every event.
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_course_metric(&self, _metric: CourseMetric) -> Result<()> {
        Ok(())
    }
}
