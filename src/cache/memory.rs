use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{AnalysisStore, Claim, RecordKey};
use crate::models::individual::IndividualAnalysis;
use crate::models::key::PairwiseKey;
use crate::models::pairwise::PairwiseAnalysis;

#[derive(Default)]
struct Inner {
    pairwise: HashMap<PairwiseKey, PairwiseAnalysis>,
    individual: HashMap<String, IndividualAnalysis>,
    claims: HashSet<RecordKey>,
}

/// In-process store for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    released: Condvar,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pairwise_len(&self) -> usize {
        self.inner.lock().pairwise.len()
    }

    pub fn individual_len(&self) -> usize {
        self.inner.lock().individual.len()
    }

    pub fn is_claimed(&self, key: &RecordKey) -> bool {
        self.inner.lock().claims.contains(key)
    }
}

impl AnalysisStore for MemoryStore {
    fn get_pairwise(&self, keys: &[PairwiseKey]) -> Result<HashMap<PairwiseKey, PairwiseAnalysis>> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .filter_map(|k| inner.pairwise.get(k).map(|r| (k.clone(), r.clone())))
            .collect())
    }

    fn save_pairwise(&self, record: &PairwiseAnalysis) -> Result<()> {
        self.inner
            .lock()
            .pairwise
            .insert(record.submission_ids.clone(), record.clone());
        Ok(())
    }

    fn get_individual(&self, ids: &[String]) -> Result<HashMap<String, IndividualAnalysis>> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.individual.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    fn save_individual(&self, record: &IndividualAnalysis) -> Result<()> {
        self.inner
            .lock()
            .individual
            .insert(record.submission_id.clone(), record.clone());
        Ok(())
    }

    fn claim(&self, key: &RecordKey) -> Result<Claim> {
        if self.inner.lock().claims.insert(key.clone()) {
            Ok(Claim::Acquired)
        } else {
            Ok(Claim::Held)
        }
    }

    fn release(&self, key: &RecordKey) -> Result<()> {
        self.inner.lock().claims.remove(key);
        self.released.notify_all();
        Ok(())
    }

    fn wait_for_release(&self, key: &RecordKey, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.claims.contains(key) {
            if self.released.wait_until(&mut inner, deadline).timed_out() {
                return Ok(!inner.claims.contains(key));
            }
        }
        Ok(true)
    }

    fn remove(&self, key: &RecordKey) -> Result<bool> {
        let mut inner = self.inner.lock();
        Ok(match key {
            RecordKey::Pairwise(k) => inner.pairwise.remove(k).is_some(),
            RecordKey::Individual(id) => inner.individual.remove(id).is_some(),
        })
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock() = Inner::default();
        self.released.notify_all();
        Ok(())
    }
}
