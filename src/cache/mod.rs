//! Two-tier content cache: bounded memory LRU over a disk tier
//!
//! The memory tier serves repeat reads without touching the filesystem. The
//! disk tier persists across sessions via a JSON index and is bounded by a
//! [`RetentionPolicy`]: entries expire by TTL, and when total size crosses
//! the cleanup threshold the least recently used entries are evicted until
//! usage drops to the target percentage.
//!
//! Cache failures are deliberately quiet: a read problem is a miss, a
//! cleanup problem is logged and skipped. Only `put` and `clear` surface
//! errors, since the caller asked for durable state.

mod index;
mod lru;
pub mod query;

pub use index::{CacheEntry, DiskIndex, INDEX_FILE_NAME};
pub use lru::LruTier;
pub use query::{QueryCache, QueryKey};

use crate::config::RetentionPolicy;
use crate::error::{Error, Result};
use crate::utils::cache_key;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Snapshot of cache hit/miss counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads served from the memory tier
    pub memory_hits: u64,
    /// Reads served from the disk tier
    pub disk_hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Successful writes
    pub writes: u64,
    /// Entries removed by TTL expiry or size eviction
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio over all reads, 0.0 when nothing has been read yet
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct StatCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

/// Two-tier cache with a persisted disk index
pub struct TwoTierCache {
    dir: PathBuf,
    memory: LruTier<Vec<u8>>,
    index: Mutex<DiskIndex>,
    policy: RwLock<RetentionPolicy>,
    stats: StatCounters,
}

impl TwoTierCache {
    /// Open (or create) a cache rooted at `dir`
    ///
    /// Loads the persisted index, dropping entries whose files are missing.
    pub async fn new(dir: PathBuf, policy: RetentionPolicy) -> Result<Self> {
        policy.validate()?;
        tokio::fs::create_dir_all(&dir).await?;

        let index = DiskIndex::load(&dir).await;
        tracing::info!(
            dir = %dir.display(),
            entries = index.len(),
            size = index.total_size(),
            "Opened cache"
        );

        Ok(Self {
            dir,
            memory: LruTier::new(policy.max_memory_items)?,
            index: Mutex::new(index),
            policy: RwLock::new(policy),
            stats: StatCounters::default(),
        })
    }

    /// Read cached bytes for an identifier/variant pair
    ///
    /// Checks the memory tier first, then the disk tier. A disk hit is
    /// promoted into memory. Expired or unreadable entries count as misses.
    pub async fn get(&self, identifier: &str, variant: &str) -> Option<Vec<u8>> {
        self.get_by_key(&cache_key(identifier, variant)).await
    }

    /// Read cached bytes by precomputed key
    pub async fn get_by_key(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.memory.get(key) {
            let mut index = self.index.lock().await;
            let expired = index
                .get(key)
                .is_some_and(|entry| entry.is_expired(Utc::now()));
            if expired {
                tracing::debug!(key, "Cache entry expired");
                self.memory.remove(key);
                self.remove_entry(&mut index, key).await;
                self.save_index(&index).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
            index.touch(key);
            self.save_index(&index).await;
            return Some(bytes);
        }

        let mut index = self.index.lock().await;

        let entry = match index.get(key) {
            Some(entry) => entry.clone(),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            tracing::debug!(key, "Cache entry expired");
            self.remove_entry(&mut index, key).await;
            self.save_index(&index).await;
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let path = self.dir.join(&entry.file_name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached file unreadable, dropping entry");
                index.remove(key);
                self.save_index(&index).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        index.touch(key);
        self.save_index(&index).await;
        drop(index);

        self.memory.put(key, bytes.clone());
        self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
        Some(bytes)
    }

    /// Write bytes to both tiers, returning the cache key
    ///
    /// `extension` names the on-disk file suffix. The entry expires after
    /// the policy's default TTL.
    pub async fn put(
        &self,
        identifier: &str,
        variant: &str,
        bytes: Vec<u8>,
        extension: &str,
    ) -> Result<String> {
        self.put_with_options(identifier, variant, bytes, extension, None, serde_json::Map::new())
            .await
    }

    /// Write bytes with a TTL override and caller-supplied metadata
    ///
    /// `ttl: None` uses the policy's default TTL. A `"favorite": true`
    /// metadata field shields the entry from size eviction when the policy
    /// preserves favorites.
    pub async fn put_with_options(
        &self,
        identifier: &str,
        variant: &str,
        bytes: Vec<u8>,
        extension: &str,
        ttl: Option<Duration>,
        mut metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String> {
        let key = cache_key(identifier, variant);
        let file_name = format!("{key}.{extension}");
        let path = self.dir.join(&file_name);

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::CacheIo(format!("failed to write {}: {e}", path.display())))?;

        metadata.insert("identifier".into(), identifier.into());
        if !variant.is_empty() {
            metadata.insert("variant".into(), variant.into());
        }

        let (default_ttl, auto_cleanup) = {
            let policy = self.read_policy();
            (policy.default_ttl, policy.auto_cleanup_enabled)
        };
        let effective_ttl = ttl.map(Some).unwrap_or(default_ttl);

        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            file_name,
            size_bytes: bytes.len() as u64,
            created_at: now,
            last_accessed: now,
            expires_at: CacheEntry::expiry_from_ttl(effective_ttl),
            metadata,
        };

        {
            let mut index = self.index.lock().await;
            index.insert(entry);
            self.save_index(&index).await;
        }

        self.memory.put(&key, bytes);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, "Cached entry written");

        if auto_cleanup {
            self.cleanup_expired().await;
            self.enforce_size_budget().await;
        }

        Ok(key)
    }

    /// True when a live (non-expired) entry exists for the pair
    pub async fn has(&self, identifier: &str, variant: &str) -> bool {
        let key = cache_key(identifier, variant);
        let index = self.index.lock().await;
        match index.get(&key) {
            Some(entry) => !entry.is_expired(Utc::now()),
            None => self.memory.contains(&key),
        }
    }

    /// Path of the cached file for the pair, if a live entry exists
    ///
    /// Useful for handing the file to a host that loads from paths.
    pub async fn get_file_path(&self, identifier: &str, variant: &str) -> Option<PathBuf> {
        let key = cache_key(identifier, variant);
        let index = self.index.lock().await;
        let entry = index.get(&key)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        let path = self.dir.join(&entry.file_name);
        path.exists().then_some(path)
    }

    /// Remove an entry from both tiers, returning true if anything was removed
    pub async fn invalidate(&self, identifier: &str, variant: &str) -> bool {
        let key = cache_key(identifier, variant);
        let had_memory = self.memory.remove(&key).is_some();

        let mut index = self.index.lock().await;
        let had_disk = self.remove_entry(&mut index, &key).await;
        if had_disk {
            self.save_index(&index).await;
        }

        had_memory || had_disk
    }

    /// Mark or unmark an entry as a favorite
    ///
    /// Favorites survive size eviction when the policy preserves them.
    /// Returns false if no entry exists for the pair.
    pub async fn set_favorite(&self, identifier: &str, variant: &str, favorite: bool) -> bool {
        let key = cache_key(identifier, variant);
        let mut index = self.index.lock().await;
        let Some(entry) = index.get(&key) else {
            return false;
        };
        let mut entry = entry.clone();
        entry
            .metadata
            .insert("favorite".into(), serde_json::Value::Bool(favorite));
        index.insert(entry);
        self.save_index(&index).await;
        true
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut index = self.index.lock().await;
        let expired = index.expired_keys(Utc::now());
        if expired.is_empty() {
            return 0;
        }

        for key in &expired {
            self.remove_entry(&mut index, key).await;
            self.memory.remove(key);
        }
        self.save_index(&index).await;

        self.stats
            .evictions
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        tracing::info!(removed = expired.len(), "Expired cache entries removed");
        expired.len()
    }

    /// Evict least-recently-used entries if usage crosses the threshold
    ///
    /// Does nothing below `cleanup_threshold_percent` of the size budget.
    /// Above it, evicts oldest-access-first (skipping favorites if the
    /// policy preserves them) until usage drops to `cleanup_target_percent`.
    /// Returns the number of entries evicted.
    pub async fn enforce_size_budget(&self) -> usize {
        let (max_bytes, threshold, target, skip_favorites) = {
            let policy = self.read_policy();
            (
                policy.max_disk_size_bytes,
                policy.cleanup_threshold_percent,
                policy.cleanup_target_percent,
                policy.preserve_favorites,
            )
        };

        let threshold_bytes = (max_bytes as f64 * threshold / 100.0) as u64;
        let target_bytes = (max_bytes as f64 * target / 100.0) as u64;

        let mut index = self.index.lock().await;
        let mut total = index.total_size();
        if total <= threshold_bytes {
            return 0;
        }

        tracing::info!(
            total,
            threshold_bytes,
            target_bytes,
            "Cache over size threshold, evicting"
        );

        let mut evicted = 0usize;
        for candidate in index.eviction_candidates(skip_favorites) {
            if total <= target_bytes {
                break;
            }
            let size = candidate.size_bytes;
            if self.remove_entry(&mut index, &candidate.key).await {
                self.memory.remove(&candidate.key);
                total = total.saturating_sub(size);
                evicted += 1;
            }
        }
        self.save_index(&index).await;

        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::info!(evicted, remaining = total, "Size eviction complete");
        evicted
    }

    /// Remove everything from both tiers
    pub async fn clear(&self) -> Result<()> {
        self.memory.clear();

        let mut index = self.index.lock().await;
        for entry in index.drain() {
            let path = self.dir.join(&entry.file_name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to delete cached file");
                }
            }
        }
        index
            .save(&self.dir)
            .await
            .map_err(|e| Error::CacheIo(format!("failed to persist cleared index: {e}")))?;

        tracing::info!("Cache cleared");
        Ok(())
    }

    /// Current hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.stats.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.stats.disk_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    /// Total bytes currently indexed on disk
    pub async fn disk_usage(&self) -> u64 {
        self.index.lock().await.total_size()
    }

    /// The active retention policy
    pub fn retention_policy(&self) -> RetentionPolicy {
        self.read_policy()
    }

    /// Replace the retention policy and apply it immediately
    ///
    /// Validates the new policy, resizes the memory tier, then runs expiry
    /// and size enforcement under the new limits.
    pub async fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<()> {
        policy.validate()?;

        let max_memory_items = policy.max_memory_items;
        {
            let mut guard = match self.policy.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = policy;
        }

        self.memory.resize(max_memory_items);
        self.cleanup_expired().await;
        self.enforce_size_budget().await;
        Ok(())
    }

    fn read_policy(&self) -> RetentionPolicy {
        match self.policy.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove an index entry and its backing file; true if the entry existed
    async fn remove_entry(&self, index: &mut DiskIndex, key: &str) -> bool {
        let Some(entry) = index.remove(key) else {
            return false;
        };
        let path = self.dir.join(&entry.file_name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete cached file");
            }
        }
        true
    }

    async fn save_index(&self, index: &DiskIndex) {
        if let Err(e) = index.save(&self.dir).await {
            tracing::warn!(error = %e, "Failed to persist cache index");
        }
    }
}

impl std::fmt::Debug for TwoTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("dir", &self.dir)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}
