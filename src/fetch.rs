//! Materialize template files (path / URL / git sources) and apply file operations.

use anyhow::{Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use crate::error::{AnalysisError, ErrorCode};
use crate::models::filespec::{FileOpKind, FileOperation, FileSpec, FileSpecKind};
use crate::reconcile::walk;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch `specs` into `dest_dir`, apply `ops` in order, and list the resulting files.
pub fn stage_templates(
    specs: &[FileSpec],
    ops: &[FileOperation],
    base_dir: &Path,
    dest_dir: &Path,
) -> Result<Vec<String>> {
    fs::create_dir_all(dest_dir).map_err(|e| {
        AnalysisError::fetch(format!(
            "Failed to create template directory {}: {e}",
            dest_dir.display()
        ))
    })?;

    for spec in specs {
        fetch_spec(spec, base_dir, dest_dir)?;
    }

    for op in ops {
        apply_operation(op, dest_dir)?;
    }

    let relpaths = walk::relative_files(dest_dir)?;
    debug!(
        specs = specs.len(),
        ops = ops.len(),
        files = relpaths.len(),
        "template files staged"
    );
    Ok(relpaths)
}

fn fetch_spec(spec: &FileSpec, base_dir: &Path, dest_dir: &Path) -> Result<()> {
    let dest = dest_dir.join(spec.dest_relpath()?);
    match spec.kind {
        FileSpecKind::Path => {
            let src = contained_path(base_dir, &spec.path)?;
            copy_entry(&src, &dest)
        }
        FileSpecKind::Url => download(&spec.path, &dest),
        FileSpecKind::Git => clone_repo(&spec.path, spec.reference.as_deref(), &dest),
    }
}

/// Resolve `relpath` under `base_dir`, refusing anything (e.g. a symlink) that leaves it.
fn contained_path(base_dir: &Path, relpath: &str) -> Result<PathBuf> {
    let base = fs::canonicalize(base_dir).map_err(|e| {
        AnalysisError::fetch(format!(
            "Template base directory {} is not accessible: {e}",
            base_dir.display()
        ))
    })?;
    let canonical = fs::canonicalize(base.join(relpath)).map_err(|e| {
        AnalysisError::fetch(format!("Template file '{relpath}' is not accessible: {e}"))
    })?;
    if !canonical.starts_with(&base) {
        bail!(AnalysisError::new(
            ErrorCode::PathOutOfBounds,
            format!("Template file '{relpath}' resolves outside of its base directory"),
        ));
    }
    Ok(canonical)
}

fn download(url: &str, dest: &Path) -> Result<()> {
    debug!(url = url, dest = %dest.display(), "downloading template file");
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| AnalysisError::fetch(format!("Failed to build HTTP client: {e}")))?;

    let bytes = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| AnalysisError::fetch(format!("Failed to download '{url}': {e}")))?;

    ensure_parent(dest)?;
    fs::write(dest, &bytes).map_err(|e| {
        AnalysisError::fetch(format!("Failed to write {}: {e}", dest.display()))
    })?;
    Ok(())
}

fn clone_repo(url: &str, reference: Option<&str>, dest: &Path) -> Result<()> {
    debug!(url = url, reference = ?reference, dest = %dest.display(), "cloning template repository");
    ensure_parent(dest)?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--quiet", "--depth", "1"]);
    if let Some(reference) = reference {
        cmd.args(["--branch", reference]);
    }
    cmd.arg(url).arg(dest);

    let output = cmd
        .output()
        .map_err(|e| AnalysisError::fetch(format!("Failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(AnalysisError::fetch(format!(
            "git clone of '{url}' failed: {}",
            stderr.trim()
        )));
    }

    // Repository metadata is not template content.
    let git_dir = dest.join(".git");
    if git_dir.exists() {
        fs::remove_dir_all(&git_dir).map_err(|e| {
            AnalysisError::fetch(format!("Failed to remove {}: {e}", git_dir.display()))
        })?;
    }
    Ok(())
}

fn apply_operation(op: &FileOperation, dest_dir: &Path) -> Result<()> {
    let src = dest_dir.join(&op.src);
    let dst = dest_dir.join(&op.dst);
    if !src.exists() {
        bail!(AnalysisError::fetch(format!(
            "File operation source '{}' does not exist",
            op.src
        )));
    }

    match op.kind {
        FileOpKind::Copy => copy_entry(&src, &dst),
        FileOpKind::Move => {
            ensure_parent(&dst)?;
            if fs::rename(&src, &dst).is_err() {
                copy_entry(&src, &dst)?;
                remove_entry(&src)?;
            }
            Ok(())
        }
    }
}

/// Copy a file, or a directory recursively, creating parents as needed.
pub fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(src)
        .map_err(|e| AnalysisError::fetch(format!("Cannot read {}: {e}", src.display())))?;

    if metadata.is_dir() {
        fs::create_dir_all(dst).map_err(|e| {
            AnalysisError::fetch(format!("Failed to create {}: {e}", dst.display()))
        })?;
        let entries = fs::read_dir(src)
            .map_err(|e| AnalysisError::fetch(format!("Cannot list {}: {e}", src.display())))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| AnalysisError::fetch(format!("Cannot list {}: {e}", src.display())))?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if metadata.file_type().is_symlink() {
        debug!(path = %src.display(), "skipping symlink while copying template files");
        return Ok(());
    }

    ensure_parent(dst)?;
    fs::copy(src, dst).map_err(|e| {
        AnalysisError::fetch(format!(
            "Failed to copy {} to {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| AnalysisError::fetch(format!("Failed to remove {}: {e}", path.display())))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AnalysisError::fetch(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}
