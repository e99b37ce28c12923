use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

use super::SimilarityEngine;
use crate::models::similarity::FileSimilarity;
use crate::source;

pub const NAME: &str = "reference";
pub const VERSION: &str = "0.0.1";

/// Deterministic in-process engine: identical bytes score 1.0, anything else
/// the Jaccard index of the two files' sets of trimmed non-empty lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceEngine;

impl SimilarityEngine for ReferenceEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity> {
        let a = source::read_file(paths[0])?;
        let b = source::read_file(paths[1])?;
        let score = line_similarity(&a, &b);
        Ok(FileSimilarity::new(relpath, NAME, VERSION, score).with_original(original))
    }
}

pub fn line_similarity(a: &[u8], b: &[u8]) -> f64 {
    if a == b {
        return 1.0;
    }

    let a = String::from_utf8_lossy(a);
    let b = String::from_utf8_lossy(b);
    let lines_a = line_set(&a);
    let lines_b = line_set(&b);
    jaccard(&lines_a, &lines_b)
}

fn line_set(text: &str) -> HashSet<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// `|A ∩ B| / |A ∪ B|`; two empty sets are identical.
pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}
