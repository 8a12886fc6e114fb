//! # Memory Cache Provider
//!
//! In-memory partition backend built on Moka. Entries are weighed by body
//! size and never expire by time; content-addressed responses are immutable
//! and the other partitions are refreshed by their strategies.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    metadata: CacheMetadata,
}

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<CacheKey, CacheEntry>,
    max_size: u64,
}

impl MemoryCache {
    /// Create a new memory cache holding at most `max_size_bytes` of bodies
    pub fn new(max_size_bytes: u64) -> Self {
        let max_size = max_size_bytes.max(1);
        let cache = MokaCache::builder()
            .weigher(|_k, v: &CacheEntry| v.data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size)
            .build();

        debug!(max_size, "Memory partition created");

        Self { cache, max_size }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Invalidate every entry without waiting for Moka's maintenance
    pub(crate) fn clear_now(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.cache.entry_count())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| (entry.data, entry.metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        let size = data.len() as u64;

        // A single entry larger than the whole partition would evict everything
        if size > self.max_size {
            warn!(
                key = %key,
                size,
                max_size = self.max_size,
                "Entry too large for memory partition, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key, CacheEntry { data, metadata }).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.clear_now();
        self.cache.run_pending_tasks().await;
        debug!("Memory partition cleared");
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self.cache.iter().map(|(k, _)| (*k).clone()).collect();
        keys.sort();
        Ok(keys)
    }
}
