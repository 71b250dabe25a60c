//! Short-lived cache for paginated query results
//!
//! A thin parameterization of [`LruTier`](super::LruTier) keyed by
//! `(query, page, per_page)`. Query text is normalized (trimmed,
//! lowercased, whitespace collapsed) so "Red  Car " and "red car" share
//! an entry. Entries carry their own TTL, typically much shorter than the
//! byte cache's, since result lists go stale quickly.

use super::LruTier;
use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::utils::cache_key;
use std::time::{Duration, Instant};

/// Identity of one page of query results
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Normalized query text
    pub query: String,
    /// 1-based page number
    pub page: u32,
    /// Results per page
    pub per_page: u32,
}

impl QueryKey {
    /// Build a key with normalized query text
    pub fn new(query: &str, page: u32, per_page: u32) -> Self {
        let normalized = query
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            query: normalized,
            page,
            per_page,
        }
    }

    /// Stable hash key for the underlying tier
    fn hash_key(&self) -> String {
        cache_key(&self.query, &format!("{}:{}", self.page, self.per_page))
    }
}

#[derive(Clone)]
struct QueryEntry<T> {
    value: T,
    stored_at: Instant,
    access_count: u64,
}

/// Bounded, TTL'd cache of query result pages
pub struct QueryCache<T> {
    tier: LruTier<QueryEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> QueryCache<T> {
    /// Create a cache holding at most `capacity` pages, each live for `ttl`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is 0.
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self> {
        Ok(Self {
            tier: LruTier::new(capacity)?,
            ttl,
        })
    }

    /// Create a cache holding at most `capacity` pages, with the TTL taken
    /// from the retention policy's `query_ttl`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is 0.
    pub fn with_policy(capacity: usize, policy: &RetentionPolicy) -> Result<Self> {
        Self::new(capacity, policy.query_ttl)
    }

    /// Get a cached page if present and not expired
    pub fn get(&self, key: &QueryKey) -> Option<T> {
        let hash = key.hash_key();
        let entry = self.tier.get(&hash)?;

        if entry.stored_at.elapsed() >= self.ttl {
            self.tier.remove(&hash);
            tracing::debug!(query = %key.query, page = key.page, "Query cache entry expired");
            return None;
        }

        self.tier.update(&hash, |e| e.access_count += 1);
        Some(entry.value)
    }

    /// Store a page of results
    pub fn put(&self, key: &QueryKey, value: T) {
        self.tier.put(
            key.hash_key(),
            QueryEntry {
                value,
                stored_at: Instant::now(),
                access_count: 0,
            },
        );
    }

    /// Number of times a cached page has been served
    pub fn access_count(&self, key: &QueryKey) -> u64 {
        self.tier
            .get(&key.hash_key())
            .map(|e| e.access_count)
            .unwrap_or(0)
    }

    /// Remove a page, returning true if it was present
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.tier.remove(&key.hash_key()).is_some()
    }

    /// Drop all expired pages, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        self.tier.retain(|_, e| e.stored_at.elapsed() < ttl)
    }

    /// Number of cached pages (including any not yet swept expired ones)
    pub fn len(&self) -> usize {
        self.tier.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.tier.is_empty()
    }

    /// Remove all pages
    pub fn clear(&self) {
        self.tier.clear();
    }
}

impl<T> std::fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
