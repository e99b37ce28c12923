use anyhow::{Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::AnalysisError;
use crate::models::filespec::{FileOperation, FileSpec};

/// Include pattern used when none is configured.
pub const DEFAULT_INCLUDE_REGEX: &str = ".*";

/// Which files of a submission take part in analysis, and which template
/// (skeleton) files are discounted.
///
/// `validate()` must run before anything else touches the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_files: Vec<FileSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_file_ops: Vec<FileOperation>,

    #[serde(skip)]
    pub(crate) compiled: OnceLock<CompiledPatterns>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledPatterns {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PartialEq for AnalysisOptions {
    fn eq(&self, other: &Self) -> bool {
        self.include_patterns == other.include_patterns
            && self.exclude_patterns == other.exclude_patterns
            && self.template_files == other.template_files
            && self.template_file_ops == other.template_file_ops
    }
}

/// Validate options that may be absent.
pub fn validate_options(options: Option<&mut AnalysisOptions>) -> Result<()> {
    match options {
        Some(options) => options.validate(),
        None => bail!(AnalysisError::config("Analysis options cannot be nil")),
    }
}

impl AnalysisOptions {
    pub fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Check and normalize in place. Re-validating a validated value is a no-op.
    pub fn validate(&mut self) -> Result<()> {
        if self.include_patterns.is_empty() {
            self.include_patterns.push(DEFAULT_INCLUDE_REGEX.to_string());
        }

        let include = compile_all(&self.include_patterns, "include")?;
        let exclude = compile_all(&self.exclude_patterns, "exclude")?;

        for spec in &mut self.template_files {
            spec.validate()?;
        }

        for op in &mut self.template_file_ops {
            op.validate()?;
        }

        self.compiled = OnceLock::new();
        let _ = self.compiled.set(CompiledPatterns { include, exclude });

        Ok(())
    }

    /// True iff `relpath` matches some include pattern and no exclude pattern.
    /// The empty path never matches.
    pub fn match_relpath(&self, relpath: &str) -> bool {
        if relpath.is_empty() {
            return false;
        }

        let Some(patterns) = self.patterns() else {
            return false;
        };

        patterns.include.iter().any(|re| re.is_match(relpath))
            && !patterns.exclude.iter().any(|re| re.is_match(relpath))
    }

    /// Stage every declared template file into `dest_dir` and apply the
    /// template operations in order. Returns the sorted relpaths of the
    /// resulting files. Partial output is left behind on failure.
    pub fn fetch_template_files(&self, base_dir: &Path, dest_dir: &Path) -> Result<Vec<String>> {
        crate::fetch::stage_templates(&self.template_files, &self.template_file_ops, base_dir, dest_dir)
    }

    pub fn has_templates(&self) -> bool {
        !self.template_files.is_empty()
    }

    /// BLAKE3 of the normalized options, for callers that want options-sensitive keys.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    fn patterns(&self) -> Option<&CompiledPatterns> {
        if let Some(patterns) = self.compiled.get() {
            return Some(patterns);
        }

        // Deserialized values skip the compiled cache; patterns were checked when stored.
        let include = if self.include_patterns.is_empty() {
            compile_all(&[DEFAULT_INCLUDE_REGEX.to_string()], "include").ok()?
        } else {
            compile_all(&self.include_patterns, "include").ok()?
        };
        let exclude = compile_all(&self.exclude_patterns, "exclude").ok()?;
        let _ = self.compiled.set(CompiledPatterns { include, exclude });
        self.compiled.get()
    }
}

fn compile_all(patterns: &[String], label: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                anyhow::Error::from(AnalysisError::config(format!(
                    "Failed to compile {label} pattern '{p}': {e}"
                )))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filespec::{FileOpKind, FileSpecKind};

    #[test]
    fn validate_fills_default_include() {
        let mut options = AnalysisOptions::default();
        options.validate().unwrap();
        assert_eq!(options.include_patterns, vec![DEFAULT_INCLUDE_REGEX]);
        assert!(options.exclude_patterns.is_empty());
    }

    #[test]
    fn validate_keeps_explicit_patterns() {
        let mut options = AnalysisOptions::new(&["AAA"], &["ZZZ"]);
        options.validate().unwrap();
        assert_eq!(options, AnalysisOptions::new(&["AAA"], &["ZZZ"]));
    }

    #[test]
    fn validate_normalizes_template_paths() {
        let mut options = AnalysisOptions {
            template_files: vec![FileSpec::path(" a/../b ")],
            template_file_ops: vec![FileOperation::new(FileOpKind::Copy, " a/../b ", "c")],
            ..AnalysisOptions::default()
        };
        options.validate().unwrap();

        assert_eq!(options.template_files[0].kind, FileSpecKind::Path);
        assert_eq!(options.template_files[0].path, "b");
        assert_eq!(options.template_file_ops[0].src, "b");
        assert_eq!(options.template_file_ops[0].dst, "c");

        let snapshot = options.clone();
        options.validate().unwrap();
        assert_eq!(options, snapshot);
    }

    #[test]
    fn validate_rejects_nil() {
        let err = validate_options(None).unwrap_err().to_string();
        assert!(err.contains("cannot be nil"), "{err}");
    }

    #[test]
    fn validate_rejects_bad_patterns() {
        let mut include = AnalysisOptions::new(&["(error"], &[]);
        let err = include.validate().unwrap_err().to_string();
        assert!(err.contains("Failed to compile include pattern"), "{err}");

        let mut exclude = AnalysisOptions::new(&[], &["(error"]);
        let err = exclude.validate().unwrap_err().to_string();
        assert!(err.contains("Failed to compile exclude pattern"), "{err}");
    }

    #[test]
    fn validate_rejects_escaping_templates() {
        let cases = vec![
            (FileSpec::path("/a"), "not allowed to be absolute"),
            (FileSpec::path("../a"), "outside of its base directory"),
            (
                FileSpec::url("http://test.edulinq.org/a.zip", "../a.zip"),
                "outside of its base directory",
            ),
            (
                FileSpec::git("http://test.edulinq.org/a.git", "../a"),
                "outside of its base directory",
            ),
        ];

        for (spec, expected) in cases {
            let mut options = AnalysisOptions {
                template_files: vec![spec],
                ..AnalysisOptions::default()
            };
            let err = options.validate().unwrap_err().to_string();
            assert!(err.contains(expected), "expected '{expected}' in '{err}'");
        }
    }

    #[test]
    fn validate_rejects_escaping_ops() {
        for (src, expected) in [
            ("/a", "Only relative paths are allowed"),
            ("../a", "outside of its base directory"),
        ] {
            let mut options = AnalysisOptions {
                template_file_ops: vec![FileOperation::new(FileOpKind::Copy, src, "b")],
                ..AnalysisOptions::default()
            };
            let err = options.validate().unwrap_err().to_string();
            assert!(err.contains(expected), "expected '{expected}' in '{err}'");
        }
    }

    #[test]
    fn match_relpath_defaults() {
        let mut options = AnalysisOptions::default();
        options.validate().unwrap();
        assert!(options.match_relpath("ZZZ"));
        assert!(!options.match_relpath(""));
    }

    #[test]
    fn match_relpath_include_exclude_grid() {
        let cases = [("AB", false), ("AC", true), ("B", false), ("Z", false)];
        for (relpath, expected) in cases {
            let mut options = AnalysisOptions::new(&["A"], &["B"]);
            options.validate().unwrap();
            assert_eq!(options.match_relpath(relpath), expected, "relpath {relpath}");
        }
    }

    #[test]
    fn match_relpath_after_deserialize() {
        let options: AnalysisOptions =
            serde_json::from_str(r#"{"exclude-patterns": ["\\.py$"]}"#).unwrap();
        assert!(!options.match_relpath("submission.py"));
        assert!(options.match_relpath("submission.c"));
    }

    #[test]
    fn fingerprint_tracks_patterns() {
        let mut a = AnalysisOptions::new(&["A"], &[]);
        let mut b = AnalysisOptions::new(&["B"], &[]);
        a.validate().unwrap();
        b.validate().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
