use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{AnalysisStore, Claim, RecordKey};
use crate::error::AnalysisError;
use crate::models::individual::IndividualAnalysis;
use crate::models::key::PairwiseKey;
use crate::models::pairwise::PairwiseAnalysis;
use crate::models::timestamp::Timestamp;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static TOMBSTONES: AtomicU64 = AtomicU64::new(0);

/// Content-addressed JSON record store using BLAKE3 ids.
///
/// Claims are lock files created with `create_new`, so they are exclusive
/// across processes sharing `dir`. A lock older than `stale_after` is
/// assumed to belong to a crashed process and is broken by renaming it to a
/// tombstone, so that at most one breaker takes over a given stale lock.
pub struct FileStore {
    dir: PathBuf,
    stale_after: Duration,
}

#[derive(Serialize)]
struct LockInfo {
    pid: u32,
    claimed_at: Timestamp,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AnalysisError::cache(format!("Failed to create cache dir {}: {e}", dir.display()))
        })?;
        Ok(Self { dir, stale_after })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compute the BLAKE3 hash of the given content.
    pub fn hash(content: &[u8]) -> String {
        blake3::hash(content).to_hex().to_string()
    }

    fn base_path(&self, key: &RecordKey) -> PathBuf {
        let hash = Self::hash(key.id().as_bytes());
        // Use first 2 chars as directory shard
        let (prefix, rest) = hash.split_at(2.min(hash.len()));
        self.dir.join(key.kind()).join(prefix).join(rest)
    }

    fn record_path(&self, key: &RecordKey) -> PathBuf {
        self.base_path(key).with_extension("json")
    }

    fn lock_path(&self, key: &RecordKey) -> PathBuf {
        self.base_path(key).with_extension("lock")
    }

    fn read<T: DeserializeOwned>(&self, key: &RecordKey) -> Result<Option<T>> {
        let path = self.record_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                anyhow::bail!(AnalysisError::cache(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // A torn or foreign file is a miss; the next save overwrites it.
                warn!(key = %key, path = %path.display(), error = %e, "ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    fn write<T: Serialize>(&self, key: &RecordKey, record: &T) -> Result<()> {
        let path = self.record_path(key);
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)
            .map_err(|e| AnalysisError::cache(format!("Failed to create {}: {e}", parent.display())))?;

        let data = serde_json::to_vec(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| AnalysisError::cache(format!("Failed to stage cache write: {e}")))?;
        tmp.write_all(&data)
            .map_err(|e| AnalysisError::cache(format!("Failed to stage cache write: {e}")))?;
        tmp.persist(&path).map_err(|e| {
            AnalysisError::cache(format!("Failed to write {}: {}", path.display(), e.error))
        })?;
        debug!(key = %key, bytes = data.len(), "cache entry written");
        Ok(())
    }

    fn lock_is_stale(&self, path: &Path) -> bool {
        let age = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        age.is_some_and(|age| age > self.stale_after)
    }

    /// A unique sibling name for a lock being broken.
    fn tombstone_path(path: &Path) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = TOMBSTONES.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("lock.{}-{nanos}-{seq}.stale", std::process::id()))
    }

    /// Move a stale lock out of the way. True if this caller broke it.
    ///
    /// The staleness check is repeated on the tombstone: if another breaker
    /// already replaced the lock with a fresh one, that lock is put back.
    fn break_stale_lock(&self, key: &RecordKey, path: &Path) -> Result<bool> {
        let tombstone = Self::tombstone_path(path);
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => anyhow::bail!(AnalysisError::cache(format!(
                "Failed to break stale claim {key}: {e}"
            ))),
        }

        let broken = self.lock_is_stale(&tombstone);
        if !broken {
            match fs::hard_link(&tombstone, path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(key = %key, "claim replaced while restoring it");
                }
                Err(e) => anyhow::bail!(AnalysisError::cache(format!(
                    "Failed to restore claim {key}: {e}"
                ))),
            }
        }

        match fs::remove_file(&tombstone) {
            Ok(()) => Ok(broken),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(broken),
            Err(e) => Err(AnalysisError::cache(format!(
                "Failed to remove {}: {e}",
                tombstone.display()
            ))
            .into()),
        }
    }

    fn try_create_lock(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            claimed_at: Timestamp::now(),
        };
        let body = serde_json::to_vec(&info).unwrap_or_default();
        file.write_all(&body)
    }
}

impl AnalysisStore for FileStore {
    fn get_pairwise(&self, keys: &[PairwiseKey]) -> Result<HashMap<PairwiseKey, PairwiseAnalysis>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(record) = self.read::<PairwiseAnalysis>(&RecordKey::Pairwise(key.clone()))? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    fn save_pairwise(&self, record: &PairwiseAnalysis) -> Result<()> {
        self.write(&RecordKey::Pairwise(record.submission_ids.clone()), record)
    }

    fn get_individual(&self, ids: &[String]) -> Result<HashMap<String, IndividualAnalysis>> {
        let mut found = HashMap::new();
        for id in ids {
            if let Some(record) = self.read::<IndividualAnalysis>(&RecordKey::Individual(id.clone()))? {
                found.insert(id.clone(), record);
            }
        }
        Ok(found)
    }

    fn save_individual(&self, record: &IndividualAnalysis) -> Result<()> {
        self.write(&RecordKey::Individual(record.submission_id.clone()), record)
    }

    fn claim(&self, key: &RecordKey) -> Result<Claim> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AnalysisError::cache(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        match self.try_create_lock(&path) {
            Ok(()) => return Ok(Claim::Acquired),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => anyhow::bail!(AnalysisError::cache(format!("Failed to claim {key}: {e}"))),
        }

        if !self.lock_is_stale(&path) {
            return Ok(Claim::Held);
        }

        if !self.break_stale_lock(key, &path)? {
            return Ok(Claim::Held);
        }
        warn!(key = %key, "broke stale claim");
        match self.try_create_lock(&path) {
            Ok(()) => Ok(Claim::Acquired),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Claim::Held),
            Err(e) => Err(AnalysisError::cache(format!("Failed to claim {key}: {e}")).into()),
        }
    }

    fn release(&self, key: &RecordKey) -> Result<()> {
        match fs::remove_file(self.lock_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AnalysisError::cache(format!("Failed to release {key}: {e}")).into()),
        }
    }

    fn wait_for_release(&self, key: &RecordKey, timeout: Duration) -> Result<bool> {
        let path = self.lock_path(key);
        let deadline = Instant::now() + timeout;
        loop {
            if !path.exists() || self.lock_is_stale(&path) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn remove(&self, key: &RecordKey) -> Result<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AnalysisError::cache(format!("Failed to remove {key}: {e}")).into()),
        }
    }

    /// Clear the entire cache.
    fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// Default cache location: the platform cache dir, under `autograder-analysis`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("autograder-analysis")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("cache"), Duration::from_secs(3600)).unwrap()
    }

    fn record(a: &str, b: &str) -> PairwiseAnalysis {
        PairwiseAnalysis::new(
            PairwiseKey::new(a, b).unwrap(),
            None,
            BTreeMap::new(),
            vec![["x.py".to_string(), String::new()]],
            vec!["skip.txt".to_string()],
        )
    }

    #[test]
    fn pairwise_records_persist_across_instances() {
        let dir = tempfile::TempDir::new().unwrap();
        let saved = record("s1", "s2");
        store(&dir).save_pairwise(&saved).unwrap();

        let key = PairwiseKey::new("s2", "s1").unwrap();
        let found = store(&dir).get_pairwise(&[key.clone()]).unwrap();
        assert_eq!(found.get(&key), Some(&saved));
    }

    #[test]
    fn individual_records_round_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = store(&dir);
        let saved = IndividualAnalysis {
            submission_id: "sub-1".to_string(),
            score: 7.5,
            lines_of_code: 12,
            ..IndividualAnalysis::default()
        };
        s.save_individual(&saved).unwrap();
        let found = s.get_individual(&["sub-1".to_string(), "sub-2".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["sub-1"], saved);
    }

    #[test]
    fn records_are_sharded_by_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = store(&dir);
        s.save_pairwise(&record("a", "b")).unwrap();
        let hash = FileStore::hash(b"a||b");
        let expected = s
            .dir()
            .join("pairwise")
            .join(&hash[..2])
            .join(format!("{}.json", &hash[2..]));
        assert!(expected.is_file());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = store(&dir);
        let key = RecordKey::Individual("bad".to_string());
        let path = s.record_path(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{truncated").unwrap();
        assert!(s.get_individual(&["bad".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn claims_are_exclusive_until_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = store(&dir);
        let other = store(&dir);
        let key = RecordKey::Pairwise(PairwiseKey::new("a", "b").unwrap());

        assert_eq!(s.claim(&key).unwrap(), Claim::Acquired);
        assert_eq!(other.claim(&key).unwrap(), Claim::Held);
        assert!(!other.wait_for_release(&key, Duration::from_millis(20)).unwrap());

        s.release(&key).unwrap();
        assert!(other.wait_for_release(&key, Duration::from_millis(20)).unwrap());
        assert_eq!(other.claim(&key).unwrap(), Claim::Acquired);
    }

    #[test]
    fn stale_claims_are_broken() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = FileStore::new(dir.path().join("cache"), Duration::ZERO).unwrap();
        let key = RecordKey::Individual("s".to_string());
        assert_eq!(s.claim(&key).unwrap(), Claim::Acquired);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(s.claim(&key).unwrap(), Claim::Acquired);

        let lock = s.lock_path(&key);
        assert!(lock.is_file());
        let leftovers: Vec<_> = fs::read_dir(lock.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".stale"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn late_breaker_leaves_fresh_claim_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let owner = store(&dir);
        let late = store(&dir);
        let key = RecordKey::Pairwise(PairwiseKey::new("a", "b").unwrap());
        assert_eq!(owner.claim(&key).unwrap(), Claim::Acquired);

        // `late` judged an earlier lock stale; by the time it moves the lock
        // away, the lock it finds is the owner's fresh one.
        let lock = late.lock_path(&key);
        let before = fs::read(&lock).unwrap();
        assert!(!late.break_stale_lock(&key, &lock).unwrap());

        assert_eq!(fs::read(&lock).unwrap(), before);
        assert_eq!(late.claim(&key).unwrap(), Claim::Held);
    }

    #[test]
    fn concurrent_breakers_acquire_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = RecordKey::Individual("s".to_string());
        let seed = FileStore::new(dir.path().join("cache"), Duration::ZERO).unwrap();
        assert_eq!(seed.claim(&key).unwrap(), Claim::Acquired);
        std::thread::sleep(Duration::from_millis(300));

        let stores: Vec<FileStore> = (0..8)
            .map(|_| FileStore::new(dir.path().join("cache"), Duration::from_millis(200)).unwrap())
            .collect();
        let key = &key;
        let acquired = std::thread::scope(|scope| {
            let handles: Vec<_> = stores
                .iter()
                .map(|s| scope.spawn(move || s.claim(key).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|claim| *claim == Claim::Acquired)
                .count()
        });
        assert_eq!(acquired, 1);
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = store(&dir);
        s.save_pairwise(&record("a", "b")).unwrap();
        let key = RecordKey::Pairwise(PairwiseKey::new("a", "b").unwrap());
        assert!(s.remove(&key).unwrap());
        assert!(!s.remove(&key).unwrap());

        s.save_pairwise(&record("a", "b")).unwrap();
        s.clear().unwrap();
        assert!(s.dir().is_dir());
        assert!(s.get_pairwise(&[PairwiseKey::new("a", "b").unwrap()]).unwrap().is_empty());
    }
}
