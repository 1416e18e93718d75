//! Bounded, time-expiring LRU cache of structured answers.
//!
//! Keys are MD5 digests of the normalized query text, so questions that only
//! differ in letter case or surrounding whitespace share an entry. Recency is
//! tracked by [`lru::LruCache`], which keeps the hash index and the access
//! order in one structure; expiry is checked lazily on lookup.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RagConfig;
use crate::document::StructuredAnswer;
use crate::error::{RagError, Result};

/// Digest of a normalized query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a query: lower-case, trim, then hash.
    pub fn for_query(query: &str) -> Self {
        let normalized = query.trim().to_lowercase();
        Self(format!("{:x}", md5::compute(normalized.as_bytes())))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached answer and the time it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached answer.
    pub answer: StructuredAnswer,
    /// When the entry was written.
    pub stored_at: Instant,
}

/// Cache occupancy as reported to the admin surface.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held, including not yet evicted expired ones.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Entry lifetime.
    pub ttl: Duration,
}

/// Query-result cache shared by all requests.
///
/// Only the bookkeeping is serialized; the lock is never held across I/O.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache").field("stats", &self.stats()).finish()
    }
}

impl QueryCache {
    /// Create a cache holding at most `max_size` answers for `ttl` each.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `max_size` is zero.
    pub fn new(max_size: usize, ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_size)
            .ok_or_else(|| RagError::ConfigError("cache max_size must be non-zero".into()))?;
        Ok(Self { entries: Mutex::new(LruCache::new(capacity)), ttl })
    }

    /// Create a cache sized from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.cache_max_size, config.cache_ttl)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a query, promoting a live entry to most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, query: &str) -> Option<StructuredAnswer> {
        let key = CacheKey::for_query(query);
        let mut entries = self.lock();

        let expired = entries.peek(&key)?.stored_at.elapsed() >= self.ttl;
        if expired {
            entries.pop(&key);
            debug!(key = %key, "cache entry expired");
            return None;
        }

        let answer = entries.get(&key).map(|entry| entry.answer.clone());
        debug!(key = %key, "cache hit");
        answer
    }

    /// Store an answer, evicting the least recently used entry when full.
    pub fn set(&self, query: &str, answer: StructuredAnswer) {
        let key = CacheKey::for_query(query);
        let entry = CacheEntry { answer, stored_at: Instant::now() };
        let mut entries = self.lock();

        match entries.push(key.clone(), entry) {
            Some((displaced, _)) if displaced != key => {
                debug!(evicted = %displaced, "cache evicted least recently used entry");
            }
            _ => {}
        }
        debug!(key = %key, size = entries.len(), "cache stored");
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
        debug!("cache cleared");
    }

    /// Current occupancy.
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats { size: entries.len(), max_size: entries.cap().get(), ttl: self.ttl }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_case_and_surrounding_whitespace() {
        assert_eq!(CacheKey::for_query(" Hello "), CacheKey::for_query("hello"));
        assert_ne!(CacheKey::for_query("hello"), CacheKey::for_query("hello world"));
        assert_eq!(CacheKey::for_query("hello").as_str().len(), 32);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(QueryCache::new(0, Duration::from_secs(1)).is_err());
    }
}
