//! Declarative file sources and file operations used to stage template files.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnalysisError, ErrorCode};

/// Where a template file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSpecKind {
    /// A file or directory relative to the base directory.
    Path,
    /// A single file downloaded over HTTP(S).
    Url,
    /// A git repository cloned with the `git` CLI.
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "type")]
    pub kind: FileSpecKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest: String,
    /// Branch, tag or commit to check out (git only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FileSpec {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            kind: FileSpecKind::Path,
            path: path.into(),
            dest: String::new(),
            reference: None,
        }
    }

    pub fn url(url: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            kind: FileSpecKind::Url,
            path: url.into(),
            dest: dest.into(),
            reference: None,
        }
    }

    pub fn git(url: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            kind: FileSpecKind::Git,
            path: url.into(),
            dest: dest.into(),
            reference: None,
        }
    }

    /// Check the spec and rewrite its relative paths into canonical form.
    pub fn validate(&mut self) -> Result<()> {
        match self.kind {
            FileSpecKind::Path => {
                self.path = normalize_relpath(&self.path).map_err(|e| {
                    AnalysisError::config(format!("Template file path '{}' {e}", self.path.trim()))
                })?;
            }
            FileSpecKind::Url | FileSpecKind::Git => {
                self.path = self.path.trim().to_string();
                if self.path.is_empty() {
                    bail!(AnalysisError::config(format!(
                        "Template file of type '{}' has an empty URL",
                        self.kind
                    )));
                }
            }
        }

        if !self.dest.trim().is_empty() {
            self.dest = normalize_relpath(&self.dest).map_err(|e| {
                AnalysisError::config(format!(
                    "Template file destination '{}' {e}",
                    self.dest.trim()
                ))
            })?;
        } else {
            self.dest.clear();
            self.dest_relpath()?;
        }

        Ok(())
    }

    /// The relative destination, defaulting to the last component of the source.
    ///
    /// A derived name must be a plain file name: URLs ending in `..`, `.` or
    /// nothing at all need an explicit `dest`.
    pub fn dest_relpath(&self) -> Result<String> {
        if !self.dest.is_empty() {
            return Ok(self.dest.clone());
        }

        let trimmed = self.path.trim_end_matches('/');
        let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let name = match self.kind {
            FileSpecKind::Git => name.trim_end_matches(".git"),
            FileSpecKind::Url => name.split(['?', '#']).next().unwrap_or(name),
            FileSpecKind::Path => name,
        };

        match normalize_relpath(name) {
            // A validated path spec of "." is the base directory itself.
            Ok(relpath) if relpath != "." || self.kind == FileSpecKind::Path => Ok(relpath),
            _ => bail!(AnalysisError::new(
                ErrorCode::PathOutOfBounds,
                format!(
                    "Template file '{}' has no usable destination name; set 'dest'",
                    self.path
                ),
            )),
        }
    }
}

impl fmt::Display for FileSpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Path => "path",
            Self::Url => "url",
            Self::Git => "git",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpKind {
    Copy,
    Move,
}

/// A `[op, src, dst]` operation applied after template files are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FileOperation {
    pub kind: FileOpKind,
    pub src: String,
    pub dst: String,
}

impl FileOperation {
    pub fn new(kind: FileOpKind, src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            kind,
            src: src.into(),
            dst: dst.into(),
        }
    }

    pub fn validate(&mut self) -> Result<()> {
        for path in [&mut self.src, &mut self.dst] {
            *path = normalize_relpath(path).map_err(|e| {
                AnalysisError::config(format!(
                    "File operation path '{}' is invalid. Only relative paths are allowed: {e}",
                    path.trim()
                ))
            })?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for FileOperation {
    type Error = String;

    fn try_from(parts: Vec<String>) -> std::result::Result<Self, Self::Error> {
        let [op, src, dst]: [String; 3] = parts
            .try_into()
            .map_err(|p: Vec<String>| format!("File operation needs 3 parts, got {}", p.len()))?;
        let kind = match op.trim().to_lowercase().as_str() {
            "copy" | "cp" => FileOpKind::Copy,
            "move" | "mv" => FileOpKind::Move,
            other => return Err(format!("Unknown file operation: '{other}'")),
        };
        Ok(Self { kind, src, dst })
    }
}

impl From<FileOperation> for Vec<String> {
    fn from(op: FileOperation) -> Self {
        let name = match op.kind {
            FileOpKind::Copy => "copy",
            FileOpKind::Move => "move",
        };
        vec![name.to_string(), op.src, op.dst]
    }
}

/// Lexically resolve `.`/`..` in a relative path and reject escapes.
///
/// Returns `.` when the path resolves to its base directory.
pub fn normalize_relpath(raw: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("is empty".to_string());
    }

    if trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || camino::Utf8Path::new(trimmed).is_absolute()
    {
        return Err("is not allowed to be absolute".to_string());
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in trimmed.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err("points outside of its base directory".to_string());
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}
