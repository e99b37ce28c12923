//! Durable storage of analysis records, with exclusive per-key claims.

pub mod memory;
pub mod store;

use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::models::individual::IndividualAnalysis;
use crate::models::key::PairwiseKey;
use crate::models::pairwise::PairwiseAnalysis;

pub use memory::MemoryStore;
pub use store::FileStore;

/// Identifies one cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Pairwise(PairwiseKey),
    Individual(String),
}

impl RecordKey {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pairwise(_) => "pairwise",
            Self::Individual(_) => "individual",
        }
    }

    pub fn id(&self) -> String {
        match self {
            Self::Pairwise(key) => key.cache_id(),
            Self::Individual(id) => id.clone(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Acquired,
    /// Another caller holds the claim.
    Held,
}

/// The cache collaborator.
///
/// `claim` must be atomic: of any number of concurrent claimants for the
/// same key, exactly one gets `Claim::Acquired` until it releases.
pub trait AnalysisStore: Send + Sync {
    fn get_pairwise(&self, keys: &[PairwiseKey]) -> Result<HashMap<PairwiseKey, PairwiseAnalysis>>;
    fn save_pairwise(&self, record: &PairwiseAnalysis) -> Result<()>;

    fn get_individual(&self, ids: &[String]) -> Result<HashMap<String, IndividualAnalysis>>;
    fn save_individual(&self, record: &IndividualAnalysis) -> Result<()>;

    fn claim(&self, key: &RecordKey) -> Result<Claim>;
    fn release(&self, key: &RecordKey) -> Result<()>;

    /// Block until `key` is unclaimed or `timeout` passes. True if it was released.
    fn wait_for_release(&self, key: &RecordKey, timeout: Duration) -> Result<bool>;

    /// Drop a cached record. True if one existed.
    fn remove(&self, key: &RecordKey) -> Result<bool>;

    /// Drop every record and claim.
    fn clear(&self) -> Result<()>;
}

/// A held claim, released when dropped.
pub struct ClaimGuard {
    store: Arc<dyn AnalysisStore>,
    key: RecordKey,
    released: bool,
}

impl ClaimGuard {
    /// Claim `key`, or `None` if someone else holds it.
    pub fn try_acquire(store: &Arc<dyn AnalysisStore>, key: RecordKey) -> Result<Option<Self>> {
        match store.claim(&key)? {
            Claim::Acquired => Ok(Some(Self {
                store: Arc::clone(store),
                key,
                released: false,
            })),
            Claim::Held => Ok(None),
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.release(&self.key)
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.store.release(&self.key)
        {
            warn!(key = %self.key, error = %e, "failed to release claim");
        }
    }
}
