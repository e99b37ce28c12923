//! Batch summaries over pairwise and individual analyses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::aggregate::AggregateValues;
use super::individual::IndividualAnalysis;
use super::pairwise::PairwiseAnalysis;
use super::timestamp::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisSummary {
    pub complete: bool,
    pub complete_count: usize,
    pub pending_count: usize,
    pub first_timestamp: Timestamp,
    pub last_timestamp: Timestamp,
}

impl AnalysisSummary {
    fn new(timestamps: impl Iterator<Item = Timestamp>, complete_count: usize, pending_count: usize) -> Self {
        let mut first: Option<Timestamp> = None;
        let mut last: Option<Timestamp> = None;
        for ts in timestamps {
            first = Some(first.map_or(ts, |f| f.min(ts)));
            last = Some(last.map_or(ts, |l| l.max(ts)));
        }

        Self {
            complete: pending_count == 0,
            complete_count,
            pending_count,
            first_timestamp: first.unwrap_or_default(),
            last_timestamp: last.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PairwiseAnalysisSummary {
    #[serde(flatten)]
    pub summary: AnalysisSummary,
    pub aggregate_mean_similarities: BTreeMap<String, AggregateValues>,
    pub aggregate_total_mean_similarities: AggregateValues,
}

impl PairwiseAnalysisSummary {
    pub fn new(items: &[PairwiseAnalysis], pending_count: usize) -> Self {
        let mut per_file: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for item in items {
            for (name, mean) in &item.mean_similarities {
                per_file.entry(name.clone()).or_default().push(*mean);
            }
        }

        let totals: Vec<f64> = items.iter().map(|i| i.total_mean_similarity).collect();

        Self {
            summary: AnalysisSummary::new(
                items.iter().map(|i| i.analysis_timestamp),
                items.len(),
                pending_count,
            ),
            aggregate_mean_similarities: per_file
                .into_iter()
                .map(|(name, values)| (name, AggregateValues::from_values(&values)))
                .collect(),
            aggregate_total_mean_similarities: AggregateValues::from_values(&totals),
        }
    }

    pub fn round_with_precision(&mut self, precision: u32) {
        for agg in self.aggregate_mean_similarities.values_mut() {
            agg.round_with_precision(precision);
        }
        self.aggregate_total_mean_similarities
            .round_with_precision(precision);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndividualAnalysisSummary {
    #[serde(flatten)]
    pub summary: AnalysisSummary,
    pub aggregate_score: AggregateValues,
    pub aggregate_lines_of_code: AggregateValues,
    pub aggregate_submission_time_delta: AggregateValues,
    pub aggregate_lines_of_code_delta: AggregateValues,
    pub aggregate_score_delta: AggregateValues,
    pub aggregate_lines_of_code_velocity: AggregateValues,
    pub aggregate_score_velocity: AggregateValues,
    pub aggregate_lines_of_code_per_file: BTreeMap<String, AggregateValues>,
}

impl IndividualAnalysisSummary {
    pub fn new(items: &[IndividualAnalysis], pending_count: usize) -> Self {
        let field = |f: fn(&IndividualAnalysis) -> f64| {
            let values: Vec<f64> = items.iter().map(f).collect();
            AggregateValues::from_values(&values)
        };

        let mut per_file: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for item in items {
            for file in &item.files {
                per_file
                    .entry(file.filename.clone())
                    .or_default()
                    .push(file.lines_of_code as f64);
            }
        }

        Self {
            summary: AnalysisSummary::new(
                items.iter().map(|i| i.analysis_timestamp),
                items.len(),
                pending_count,
            ),
            aggregate_score: field(|i| i.score),
            aggregate_lines_of_code: field(|i| i.lines_of_code as f64),
            aggregate_submission_time_delta: field(|i| i.submission_time_delta as f64),
            aggregate_lines_of_code_delta: field(|i| i.lines_of_code_delta as f64),
            aggregate_score_delta: field(|i| i.score_delta),
            aggregate_lines_of_code_velocity: field(|i| i.lines_of_code_velocity),
            aggregate_score_velocity: field(|i| i.score_velocity),
            aggregate_lines_of_code_per_file: per_file
                .into_iter()
                .map(|(name, values)| (name, AggregateValues::from_values(&values)))
                .collect(),
        }
    }

    pub fn round_with_precision(&mut self, precision: u32) {
        for agg in [
            &mut self.aggregate_score,
            &mut self.aggregate_lines_of_code,
            &mut self.aggregate_submission_time_delta,
            &mut self.aggregate_lines_of_code_delta,
            &mut self.aggregate_score_delta,
            &mut self.aggregate_lines_of_code_velocity,
            &mut self.aggregate_score_velocity,
        ] {
            agg.round_with_precision(precision);
        }
        for agg in self.aggregate_lines_of_code_per_file.values_mut() {
            agg.round_with_precision(precision);
        }
    }
}
