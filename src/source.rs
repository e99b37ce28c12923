use anyhow::Result;
use std::path::Path;

use crate::error::{AnalysisError, ErrorCode};

/// Maximum file size considered for analysis: 100 MB.
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Zero-copy capable source buffer.
/// Uses mmap for files > 64KB, Vec<u8> for smaller files.
#[derive(Debug)]
pub enum SourceBuf {
    Mmap(memmap2::Mmap),
    Vec(Vec<u8>),
}

impl SourceBuf {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SourceBuf::Mmap(m) => m,
            SourceBuf::Vec(v) => v,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Content as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl std::ops::Deref for SourceBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for SourceBuf {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Read a file into a zero-copy buffer (mmap for large files, Vec for small).
pub fn read_file(path: &Path) -> Result<SourceBuf> {
    use std::fs::File;
    let file = File::open(path).map_err(|e| {
        AnalysisError::new(
            ErrorCode::IoError,
            format!("Failed to open {}: {e}", path.display()),
        )
    })?;
    let metadata = file.metadata()?;

    if metadata.len() == 0 {
        return Ok(SourceBuf::Vec(Vec::new()));
    }

    if metadata.len() > MAX_FILE_SIZE {
        anyhow::bail!(AnalysisError::new(
            ErrorCode::InvalidRequest,
            format!(
                "File too large ({} bytes > {} bytes): {}",
                metadata.len(),
                MAX_FILE_SIZE,
                path.display()
            ),
        ));
    }

    if metadata.len() > 65536 {
        // SAFETY: submission trees are read-only while an analysis runs.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(SourceBuf::Mmap(mmap))
    } else {
        use std::io::Read;
        let mut buf = Vec::with_capacity(metadata.len() as usize);
        let mut reader = std::io::BufReader::new(file);
        reader.read_to_end(&mut buf)?;
        Ok(SourceBuf::Vec(buf))
    }
}

/// BLAKE3 of a file's content.
pub fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let source = read_file(path)?;
    Ok(blake3::hash(&source))
}

/// Number of lines that contain something other than whitespace.
pub fn count_lines_of_code(source: &[u8]) -> usize {
    String::from_utf8_lossy(source)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}
