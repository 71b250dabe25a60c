//! Persisted index for the disk cache tier
//!
//! The index is a JSON file (`cache_index.json`) living next to the cached
//! files. It is rewritten after every mutation and reloaded on startup;
//! entries whose backing file has disappeared are dropped silently so a
//! half-cleared cache directory heals itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the persisted index inside the cache directory
pub const INDEX_FILE_NAME: &str = "cache_index.json";

/// One cached item on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (32 hex characters)
    pub key: String,

    /// File name within the cache directory
    pub file_name: String,

    /// Size of the cached file in bytes
    pub size_bytes: u64,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// When the entry was last read or written
    pub last_accessed: DateTime<Utc>,

    /// When the entry expires (None = never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Free-form metadata (original identifier, variant, favorite flag, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CacheEntry {
    /// True once the entry's TTL has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// True when the entry is marked as a favorite in its metadata
    pub fn is_favorite(&self) -> bool {
        self.metadata
            .get("favorite")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Compute an expiry timestamp from a TTL relative to now
    pub fn expiry_from_ttl(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|ttl| {
            let ttl = chrono::Duration::from_std(ttl).ok()?;
            Utc::now().checked_add_signed(ttl)
        })
    }
}

/// In-memory view of the persisted disk index
#[derive(Debug, Default)]
pub struct DiskIndex {
    entries: HashMap<String, CacheEntry>,
}

impl DiskIndex {
    /// Load the index from `dir`, dropping entries whose files are gone
    ///
    /// A missing or unreadable index file yields an empty index; the cache
    /// starts cold rather than failing.
    pub async fn load(dir: &Path) -> Self {
        let path = dir.join(INDEX_FILE_NAME);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Failed to read cache index, starting empty");
                return Self::default();
            }
        };

        let entries: HashMap<String, CacheEntry> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Cache index is corrupt, starting empty");
                return Self::default();
            }
        };

        // Self-heal: drop entries whose backing file no longer exists
        let mut healed = HashMap::with_capacity(entries.len());
        let mut dropped = 0usize;
        for (key, entry) in entries {
            if tokio::fs::try_exists(dir.join(&entry.file_name))
                .await
                .unwrap_or(false)
            {
                healed.insert(key, entry);
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "Dropped index entries with missing files");
        }

        Self { entries: healed }
    }

    /// Persist the index to `dir`
    pub async fn save(&self, dir: &Path) -> std::io::Result<()> {
        let path = dir.join(INDEX_FILE_NAME);
        let raw = serde_json::to_vec(&self.entries).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, raw).await
    }

    /// Look up an entry by key
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove an entry, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Refresh an entry's last-accessed timestamp
    pub fn touch(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = Utc::now();
        }
    }

    /// Total size of all indexed files in bytes
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of all expired entries
    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect()
    }

    /// Entries ordered for eviction: oldest access first, key as tie-break
    ///
    /// Deterministic ordering makes eviction reproducible under test.
    pub fn eviction_candidates(&self, skip_favorites: bool) -> Vec<CacheEntry> {
        let mut candidates: Vec<CacheEntry> = self
            .entries
            .values()
            .filter(|e| !(skip_favorites && e.is_favorite()))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.key.cmp(&b.key))
        });
        candidates
    }

    /// Drain all entries, returning them
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        self.entries.drain().map(|(_, e)| e).collect()
    }
}
