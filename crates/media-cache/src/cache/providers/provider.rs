//! Storage backend behind a single cache partition.
//!
//! Entries are keyed by request method and URL (fragment stripped), so a
//! partition holds at most one response per request. Backends report plain
//! I/O errors; the strategy layer turns every one of them into a miss or a
//! skipped write.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// The stored body and response metadata, `None` on a miss
    async fn get(&self, key: &CacheKey) -> CacheLookupResult;

    /// Store a response. A later `put` for the same request overwrites it.
    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()>;

    /// Forget one request; missing keys are not an error
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Drop every entry but keep the partition itself
    async fn clear(&self) -> CacheResult<()>;

    /// Requests currently stored, for listing a partition
    async fn keys(&self) -> CacheResult<Vec<CacheKey>>;
}
