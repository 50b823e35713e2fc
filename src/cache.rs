// Persistent build cache
// Fingerprint-keyed entries on durable storage with a bounded window of
// in-memory generations

use crate::core::interfaces::CacheStorage;
use crate::core::models::BuildMode;
use crate::utils::{BedrockError, Logger, Result};
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Retained generations for iterative development builds
pub const DEVELOPMENT_MEMORY_GENERATIONS: usize = 5;

const HEADER_RAW: u8 = 0;
const HEADER_GZIP: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCompression {
    Gzip,
}

/// Retention and compression policy handed to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub cache_dir: PathBuf,
    /// `None` keeps every generation in memory
    pub max_memory_generations: Option<usize>,
    pub compression: Option<CacheCompression>,
}

impl CachePolicy {
    /// Development keeps a short window and compresses on disk; a one-shot
    /// production process keeps everything and skips compression.
    pub fn for_mode(mode: BuildMode, cache_dir: &Path) -> Self {
        if mode.is_development() {
            Self {
                cache_dir: cache_dir.to_path_buf(),
                max_memory_generations: Some(DEVELOPMENT_MEMORY_GENERATIONS),
                compression: Some(CacheCompression::Gzip),
            }
        } else {
            Self {
                cache_dir: cache_dir.to_path_buf(),
                max_memory_generations: None,
                compression: None,
            }
        }
    }
}

/// Builds a cache key from every input that affects output bytes
pub struct Fingerprint {
    hasher: blake3::Hasher,
}

impl Fingerprint {
    pub fn new(namespace: &str) -> Self {
        let mut fingerprint = Self {
            hasher: blake3::Hasher::new(),
        };
        fingerprint.push(b"bedrock-cache-v1");
        fingerprint.push(namespace.as_bytes());
        fingerprint
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.push(name.as_bytes());
        self.push(value.as_bytes());
        self
    }

    pub fn bytes(mut self, name: &str, value: &[u8]) -> Self {
        self.push(name.as_bytes());
        self.push(value);
        self
    }

    pub fn finish(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }

    // Length-prefixed so adjacent fields cannot run into each other
    fn push(&mut self, data: &[u8]) {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

/// sled-backed storage under the cache directory
pub struct SledCacheStorage {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledCacheStorage {
    pub fn open(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| BedrockError::cache_io(format!("{}: {}", cache_dir.display(), e)))?;

        let db = sled::open(cache_dir.join("bedrock_cache.sled"))?;
        let tree = db.open_tree("artifacts")?;
        Ok(Self { db, tree })
    }
}

impl CacheStorage for SledCacheStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|bytes| bytes.to_vec()))
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.tree.insert(key, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.tree.len()
    }

    fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

/// In-process storage, for tests and as the fallback when the disk store
/// cannot be opened
#[derive(Default)]
pub struct MemoryCacheStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn size_on_disk(&self) -> u64 {
        0
    }
}

struct MemoryEntry {
    payload: Arc<Vec<u8>>,
    last_used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub generation: u64,
    pub memory_entries: usize,
    pub persisted_entries: usize,
    pub disk_size: u64,
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
}

/// Fingerprint-keyed cache over an injected storage backend.
///
/// Storage failures never fail a build: reads degrade to misses and writes
/// are dropped, both counted in [`CacheStats::failures`]. Writers for the same
/// key are serialized; distinct keys proceed independently.
pub struct CacheController {
    storage: Arc<dyn CacheStorage>,
    policy: CachePolicy,
    memory: DashMap<String, MemoryEntry>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    generation: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
    failures: AtomicUsize,
}

impl CacheController {
    pub fn new(storage: Arc<dyn CacheStorage>, policy: CachePolicy) -> Self {
        Self {
            storage,
            policy,
            memory: DashMap::new(),
            key_locks: DashMap::new(),
            generation: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Open the on-disk store for a policy, falling back to memory-only
    /// caching when the store is unavailable
    pub fn open(policy: CachePolicy) -> Self {
        let storage: Arc<dyn CacheStorage> = match SledCacheStorage::open(&policy.cache_dir) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                Logger::warn(&format!(
                    "Persistent cache unavailable at {} ({}), caching in memory only",
                    policy.cache_dir.display(),
                    e
                ));
                Arc::new(MemoryCacheStorage::new())
            }
        };
        Self::new(storage, policy)
    }

    pub fn in_memory(policy: CachePolicy) -> Self {
        Self::new(Arc::new(MemoryCacheStorage::new()), policy)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new generation; call once per build
    pub fn begin_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop in-memory entries not touched within the retained window.
    /// Persisted copies stay on disk.
    pub fn end_generation(&self) -> usize {
        let Some(max) = self.policy.max_memory_generations else {
            return 0;
        };

        let current = self.generation();
        let before = self.memory.len();
        self.memory
            .retain(|_, entry| current.saturating_sub(entry.last_used) < max as u64);
        self.prune_key_locks();
        before - self.memory.len()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let generation = self.generation();

        if let Some(mut entry) = self.memory.get_mut(key) {
            entry.last_used = generation;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.payload.as_ref().clone());
        }

        match self.load_persisted(key) {
            Ok(Some(payload)) => {
                self.remember(key, payload.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Logger::warn(&format!("Cache read failed for {}: {}", short_key(key), e));
                None
            }
        }
    }

    pub async fn put(&self, key: &str, payload: Vec<u8>) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.write(key, payload);
    }

    /// Return the cached payload for `key`, or compute, store and return it.
    /// The boolean is true on a cache hit. Compute errors propagate; cache
    /// errors do not.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<(Vec<u8>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if let Some(payload) = self.get(key) {
            return Ok((payload, true));
        }

        let payload = compute().await?;
        self.write(key, payload.clone());
        Ok((payload, false))
    }

    /// Remove `key` from memory and storage, serialized with writers of the
    /// same key
    pub async fn invalidate(&self, key: &str) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        self.memory.remove(key);
        if let Err(e) = self.storage.remove(key) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Logger::warn(&format!("Cache invalidation failed for {}: {}", short_key(key), e));
        }
    }

    /// Drop every entry. Requires exclusive use of the controller: a write
    /// in flight for some key may land after the clear.
    pub fn clear(&self) -> Result<()> {
        self.memory.clear();
        self.prune_key_locks();
        self.storage.clear()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            generation: self.generation(),
            memory_entries: self.memory.len(),
            persisted_entries: self.storage.entry_count(),
            disk_size: self.storage.size_on_disk(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget locks nobody holds for keys no longer in memory. A lock that
    /// is held or awaited has a clone outside the map and is kept.
    fn prune_key_locks(&self) {
        self.key_locks
            .retain(|key, lock| Arc::strong_count(lock) > 1 || self.memory.contains_key(key));
    }

    fn remember(&self, key: &str, payload: Vec<u8>) {
        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                payload: Arc::new(payload),
                last_used: self.generation(),
            },
        );
    }

    fn write(&self, key: &str, payload: Vec<u8>) {
        if let Err(e) = self.persist(key, &payload) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Logger::warn(&format!("Cache write failed for {}: {}", short_key(key), e));
        }
        self.remember(key, payload);
    }

    fn persist(&self, key: &str, payload: &[u8]) -> Result<()> {
        let entry = CacheEntry {
            fingerprint: key.to_string(),
            payload: payload.to_vec(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let encoded = bincode::serialize(&entry)?;

        let mut bytes = Vec::with_capacity(encoded.len() + 1);
        match self.policy.compression {
            Some(CacheCompression::Gzip) => {
                bytes.push(HEADER_GZIP);
                let mut encoder = GzEncoder::new(bytes, Compression::fast());
                encoder.write_all(&encoded)?;
                bytes = encoder.finish()?;
            }
            None => {
                bytes.push(HEADER_RAW);
                bytes.extend_from_slice(&encoded);
            }
        }

        self.storage.store(key, &bytes)
    }

    fn load_persisted(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = self.storage.load(key)? else {
            return Ok(None);
        };

        let (header, body) = bytes
            .split_first()
            .ok_or_else(|| BedrockError::cache_io("empty cache entry"))?;

        let encoded = match *header {
            HEADER_RAW => body.to_vec(),
            HEADER_GZIP => {
                let mut decoded = Vec::new();
                GzDecoder::new(body).read_to_end(&mut decoded)?;
                decoded
            }
            other => {
                return Err(BedrockError::cache_io(format!(
                    "unknown cache entry header {}",
                    other
                )))
            }
        };

        let entry: CacheEntry = bincode::deserialize(&encoded)?;
        if entry.fingerprint != key {
            return Err(BedrockError::cache_io("fingerprint mismatch"));
        }
        Ok(Some(entry.payload))
    }
}

fn short_key(key: &str) -> &str {
    &key[..key.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_policy() -> CachePolicy {
        CachePolicy::for_mode(BuildMode::Development, Path::new("/tmp/unused"))
    }

    /// Storage whose every operation fails
    struct BrokenStorage;

    impl CacheStorage for BrokenStorage {
        fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(BedrockError::cache_io("disk unplugged"))
        }
        fn store(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(BedrockError::cache_io("disk unplugged"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(BedrockError::cache_io("disk unplugged"))
        }
        fn clear(&self) -> Result<()> {
            Err(BedrockError::cache_io("disk unplugged"))
        }
        fn entry_count(&self) -> usize {
            0
        }
        fn size_on_disk(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_policy_per_mode() {
        let dir = Path::new("/app/node_modules/.cache/bedrock");
        let dev = CachePolicy::for_mode(BuildMode::Development, dir);
        assert_eq!(dev.max_memory_generations, Some(5));
        assert_eq!(dev.compression, Some(CacheCompression::Gzip));

        let prod = CachePolicy::for_mode(BuildMode::Production, dir);
        assert_eq!(prod.max_memory_generations, None);
        assert_eq!(prod.compression, None);
        assert_eq!(CachePolicy::for_mode(BuildMode::Analyze, dir), prod);
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        let a = Fingerprint::new("js").field("mode", "production").bytes("src", b"x").finish();
        let b = Fingerprint::new("js").field("mode", "development").bytes("src", b"x").finish();
        let c = Fingerprint::new("js").field("modep", "roduction").bytes("src", b"x").finish();
        let again = Fingerprint::new("js").field("mode", "production").bytes("src", b"x").finish();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, again);
    }

    #[tokio::test]
    async fn test_get_or_compute_hits_after_first_compute() {
        let cache = CacheController::in_memory(dev_policy());
        cache.begin_generation();

        let (first, hit) = cache
            .get_or_compute("k", || async { Ok(b"value".to_vec()) })
            .await
            .unwrap();
        assert_eq!(first, b"value");
        assert!(!hit);

        let (second, hit) = cache
            .get_or_compute("k", || async { panic!("must not recompute") })
            .await
            .unwrap();
        assert_eq!(second, b"value");
        assert!(hit);
    }

    #[tokio::test]
    async fn test_persisted_entries_survive_memory_eviction() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let cache = CacheController::new(storage.clone(), dev_policy());

        cache.begin_generation();
        cache.put("old", b"payload".to_vec()).await;

        for _ in 0..DEVELOPMENT_MEMORY_GENERATIONS {
            cache.begin_generation();
        }
        assert_eq!(cache.end_generation(), 1);
        assert_eq!(cache.stats().memory_entries, 0);

        // Compressed on disk, still readable
        let raw = storage.load("old").unwrap().unwrap();
        assert_eq!(raw[0], HEADER_GZIP);
        assert_eq!(cache.get("old"), Some(b"payload".to_vec()));
        assert_eq!(cache.stats().memory_entries, 1);
    }

    #[tokio::test]
    async fn test_recently_used_entries_stay_in_memory() {
        let cache = CacheController::in_memory(dev_policy());
        cache.begin_generation();
        cache.put("hot", b"1".to_vec()).await;

        for _ in 0..10 {
            cache.begin_generation();
            assert!(cache.get("hot").is_some());
            assert_eq!(cache.end_generation(), 0);
        }
    }

    #[tokio::test]
    async fn test_production_never_evicts_or_compresses() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let cache = CacheController::new(
            storage.clone(),
            CachePolicy::for_mode(BuildMode::Production, Path::new("/tmp/unused")),
        );
        cache.begin_generation();
        cache.put("k", b"v".to_vec()).await;

        for _ in 0..20 {
            cache.begin_generation();
        }
        assert_eq!(cache.end_generation(), 0);
        assert_eq!(storage.load("k").unwrap().unwrap()[0], HEADER_RAW);
    }

    #[tokio::test]
    async fn test_storage_failures_degrade_to_recompute() {
        let cache = CacheController::new(Arc::new(BrokenStorage), dev_policy());
        cache.begin_generation();

        let (value, hit) = cache
            .get_or_compute("k", || async { Ok(b"fresh".to_vec()) })
            .await
            .unwrap();
        assert_eq!(value, b"fresh");
        assert!(!hit);
        assert!(cache.stats().failures >= 2);
    }

    #[tokio::test]
    async fn test_compute_errors_propagate() {
        let cache = CacheController::in_memory(dev_policy());
        let result = cache
            .get_or_compute("k", || async { Err(BedrockError::build("stage failed")) })
            .await;
        assert!(result.is_err());
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = CacheController::in_memory(dev_policy());
        cache.put("a", b"1".to_vec()).await;
        cache.put("b", b"2".to_vec()).await;

        cache.invalidate("a").await;
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear().unwrap();
        assert!(cache.get("b").is_none());
        assert_eq!(cache.stats().persisted_entries, 0);
    }

    #[tokio::test]
    async fn test_key_locks_stay_bounded_across_generations() {
        let cache = CacheController::in_memory(dev_policy());

        for generation in 0..200 {
            cache.begin_generation();
            cache.put(&format!("key-{}", generation), b"v".to_vec()).await;
            cache.end_generation();
        }
        assert!(cache.stats().memory_entries <= DEVELOPMENT_MEMORY_GENERATIONS);
        assert!(cache.key_locks.len() <= DEVELOPMENT_MEMORY_GENERATIONS);

        cache.invalidate("key-199").await;
        cache.clear().unwrap();
        assert_eq!(cache.key_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_survives_pruning() {
        let cache = CacheController::in_memory(dev_policy());
        let lock = cache.key_lock("busy");
        let _guard = lock.lock().await;

        cache.clear().unwrap();
        assert!(Arc::ptr_eq(&lock, &cache.key_lock("busy")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_memory_and_storage_agreeing() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let cache = Arc::new(CacheController::new(storage.clone(), dev_policy()));
        cache.begin_generation();

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => cache.put("k", vec![i]).await,
                    1 => {
                        cache
                            .get_or_compute("k", || async move {
                                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                                Ok(vec![i])
                            })
                            .await
                            .unwrap();
                    }
                    _ => cache.invalidate("k").await,
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let in_memory = cache.memory.get("k").map(|e| e.payload.as_ref().clone());
        let fresh = CacheController::new(storage, dev_policy());
        assert_eq!(in_memory, fresh.get("k"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidate_waits_for_in_flight_compute() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let cache = Arc::new(CacheController::new(storage.clone(), dev_policy()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(b"computed".to_vec())
                    })
                    .await
                    .unwrap()
            })
        };

        started_rx.await.unwrap();
        cache.invalidate("k").await;
        writer.await.unwrap();

        assert!(cache.memory.get("k").is_none());
        assert_eq!(storage.load("k").unwrap(), None);
    }

    #[test]
    fn test_sled_storage_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let storage = SledCacheStorage::open(temp.path()).unwrap();

        storage.store("key", b"bytes").unwrap();
        assert_eq!(storage.load("key").unwrap(), Some(b"bytes".to_vec()));
        assert_eq!(storage.entry_count(), 1);

        storage.remove("key").unwrap();
        assert_eq!(storage.load("key").unwrap(), None);
    }
}
