//! Scheduled task definitions and their option bags.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

pub type OptionBag = serde_json::Map<String, serde_json::Value>;

/// Task kinds this engine runs. Other kinds are rejected when the task is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Analysis,
}

/// A task as written by a course admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTaskInfo {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    /// Schedule expression, opaque here and interpreted by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub options: OptionBag,
}

impl UserTaskInfo {
    pub fn validate(&self) -> Result<()> {
        if self.when.as_deref().is_none_or(|w| w.trim().is_empty()) && !self.disabled {
            bail!(AnalysisError::config(
                "Scheduled time to run ('when') is not supplied and the task is not disabled"
            ));
        }
        Ok(())
    }

    pub fn option<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        get_option(&self.options, key, default)
    }
}

/// Read `key` from `bag` as `T`. A missing key yields `default`; a value of
/// the wrong shape is an error.
pub fn get_option<T: DeserializeOwned>(bag: &OptionBag, key: &str, default: T) -> Result<T> {
    match bag.get(key) {
        None => Ok(default),
        Some(raw) => serde_json::from_value(raw.clone()).with_context(|| {
            AnalysisError::config(format!("Task option '{key}' has the wrong type: {raw}"))
        }),
    }
}

/// Typed view of an analysis task's options.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTaskOptions {
    pub submission_ids: Vec<String>,
    pub wait: bool,
    pub individual: bool,
}

impl AnalysisTaskOptions {
    pub fn from_task(task: &UserTaskInfo) -> Result<Self> {
        let options = Self {
            submission_ids: task.option("submission-ids", Vec::new())?,
            wait: task.option("wait", true)?,
            individual: task.option("individual", false)?,
        };

        if options.submission_ids.is_empty() {
            bail!(AnalysisError::config(
                "Analysis task needs a non-empty 'submission-ids' option"
            ));
        }

        Ok(options)
    }
}
