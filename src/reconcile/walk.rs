use anyhow::Result;
use camino::Utf8PathBuf;
use ignore::WalkBuilder;
use std::path::Path;
use tracing::warn;

use crate::error::{AnalysisError, ErrorCode};

/// Every regular file under `dir` as a `/`-separated relative path, sorted.
///
/// Unlike source-tree tooling, nothing is ignored: hidden files and
/// `.gitignore`d files in a submission are still part of it. Symlinks are
/// not followed.
pub fn relative_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        anyhow::bail!(AnalysisError::new(
            ErrorCode::IoError,
            format!("Not a directory: {}", dir.display()),
        ));
    }

    let mut builder = WalkBuilder::new(dir);
    builder.standard_filters(false).follow_links(false);

    let mut relpaths = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| {
            AnalysisError::new(
                ErrorCode::IoError,
                format!("Failed to walk {}: {e}", dir.display()),
            )
        })?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        match Utf8PathBuf::from_path_buf(rel.to_path_buf()) {
            Ok(rel) => {
                let parts: Vec<&str> = rel.components().map(|c| c.as_str()).collect();
                relpaths.push(parts.join("/"));
            }
            Err(path) => {
                warn!(path = %path.display(), "skipping non UTF-8 path");
            }
        }
    }

    relpaths.sort();
    Ok(relpaths)
}
