use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::key::PairwiseKey;
use super::options::AnalysisOptions;
use super::similarity::FileSimilarity;
use super::timestamp::Timestamp;

/// One cached unit of plagiarism-check work. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PairwiseAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnalysisOptions>,
    pub analysis_timestamp: Timestamp,
    pub submission_ids: PairwiseKey,
    pub similarities: BTreeMap<String, Vec<FileSimilarity>>,
    /// Files present in only one submission; the missing side is `""`.
    pub unmatched_files: Vec<[String; 2]>,
    pub skipped_files: Vec<String>,
    pub mean_similarities: BTreeMap<String, f64>,
    pub total_mean_similarity: f64,
}

impl PairwiseAnalysis {
    pub fn new(
        key: PairwiseKey,
        options: Option<AnalysisOptions>,
        similarities: BTreeMap<String, Vec<FileSimilarity>>,
        unmatched_files: Vec<[String; 2]>,
        skipped_files: Vec<String>,
    ) -> Self {
        let mean_similarities: BTreeMap<String, f64> = similarities
            .iter()
            .filter(|(_, sims)| !sims.is_empty())
            .map(|(name, sims)| {
                let total: f64 = sims.iter().map(|s| s.score).sum();
                (name.clone(), total / sims.len() as f64)
            })
            .collect();

        let total_mean_similarity = if mean_similarities.is_empty() {
            0.0
        } else {
            mean_similarities.values().sum::<f64>() / mean_similarities.len() as f64
        };

        Self {
            options,
            analysis_timestamp: Timestamp::now(),
            submission_ids: key,
            similarities,
            unmatched_files,
            skipped_files,
            mean_similarities,
            total_mean_similarity,
        }
    }
}
