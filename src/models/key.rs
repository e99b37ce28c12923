use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnalysisError, ErrorCode};

/// An unordered pair of distinct submission ids, stored sorted ascending.
///
/// Ids are opaque: nothing here looks inside them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct PairwiseKey([String; 2]);

impl PairwiseKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Result<Self> {
        let (a, b) = (a.into(), b.into());
        if a == b {
            bail!(AnalysisError::new(
                ErrorCode::InvalidRequest,
                format!("A pairwise key needs two distinct submissions, got '{a}' twice"),
            ));
        }
        if a < b {
            Ok(Self([a, b]))
        } else {
            Ok(Self([b, a]))
        }
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn second(&self) -> &str {
        &self.0[1]
    }

    pub fn ids(&self) -> [&str; 2] {
        [&self.0[0], &self.0[1]]
    }

    /// Stable string form used for cache addressing and logging.
    pub fn cache_id(&self) -> String {
        format!("{}||{}", self.0[0], self.0[1])
    }

    /// All distinct unordered pairs over `ids`, deduplicated, in sorted order.
    pub fn enumerate(ids: &[String]) -> Vec<PairwiseKey> {
        let mut unique: Vec<&String> = ids.iter().collect();
        unique.sort();
        unique.dedup();

        let mut keys = Vec::with_capacity(unique.len() * unique.len().saturating_sub(1) / 2);
        for i in 0..unique.len() {
            for j in (i + 1)..unique.len() {
                keys.push(Self([unique[i].clone(), unique[j].clone()]));
            }
        }
        keys
    }
}

impl fmt::Display for PairwiseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0[0], self.0[1])
    }
}

impl TryFrom<[String; 2]> for PairwiseKey {
    type Error = String;

    fn try_from(value: [String; 2]) -> std::result::Result<Self, Self::Error> {
        let [a, b] = value;
        Self::new(a, b).map_err(|e| e.to_string())
    }
}

impl From<PairwiseKey> for [String; 2] {
    fn from(key: PairwiseKey) -> Self {
        key.0
    }
}
