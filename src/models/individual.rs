use serde::{Deserialize, Serialize};

use super::options::AnalysisOptions;
use super::timestamp::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisFileInfo {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub lines_of_code: usize,
}

/// Per-submission trend data. Deltas and velocities are relative to the
/// author's immediately preceding submission for the same assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndividualAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnalysisOptions>,
    pub analysis_timestamp: Timestamp,
    pub submission_id: String,
    pub submission_timestamp: Timestamp,

    pub score: f64,
    pub lines_of_code: usize,
    pub files: Vec<AnalysisFileInfo>,
    #[serde(default)]
    pub skipped_files: Vec<String>,

    /// Milliseconds since the previous submission.
    pub submission_time_delta: i64,
    pub lines_of_code_delta: i64,
    pub score_delta: f64,
    /// Lines of code per minute.
    pub lines_of_code_velocity: f64,
    /// Score points per minute.
    pub score_velocity: f64,
}

/// The figures of a previous submission that deltas are taken against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predecessor {
    pub submission_timestamp: Timestamp,
    pub score: f64,
    pub lines_of_code: usize,
}

const MSECS_PER_MINUTE: f64 = 60_000.0;

impl IndividualAnalysis {
    /// Fill deltas and velocities. All stay zero without a predecessor.
    pub fn apply_predecessor(&mut self, previous: Option<&Predecessor>) {
        let Some(previous) = previous else {
            self.submission_time_delta = 0;
            self.lines_of_code_delta = 0;
            self.score_delta = 0.0;
            self.lines_of_code_velocity = 0.0;
            self.score_velocity = 0.0;
            return;
        };

        self.submission_time_delta =
            self.submission_timestamp.msecs() - previous.submission_timestamp.msecs();
        self.lines_of_code_delta = self.lines_of_code as i64 - previous.lines_of_code as i64;
        self.score_delta = self.score - previous.score;

        if self.submission_time_delta > 0 {
            let minutes = self.submission_time_delta as f64 / MSECS_PER_MINUTE;
            self.lines_of_code_velocity = self.lines_of_code_delta as f64 / minutes;
            self.score_velocity = self.score_delta / minutes;
        } else {
            self.lines_of_code_velocity = 0.0;
            self.score_velocity = 0.0;
        }
    }

    pub fn predecessor(&self) -> Predecessor {
        Predecessor {
            submission_timestamp: self.submission_timestamp,
            score: self.score,
            lines_of_code: self.lines_of_code,
        }
    }
}
