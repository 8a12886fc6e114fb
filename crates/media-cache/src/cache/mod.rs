//! # Cache System
//!
//! Named, versioned cache partitions. A [`CacheStorage`] owns the set of
//! partitions (the equivalent of a browser's cache storage); each
//! [`Partition`] is a request-keyed response store backed by a
//! [`CacheProvider`].

mod partition;
pub mod providers;
mod storage;
mod types;

pub use partition::Partition;
pub use providers::{CacheProvider, FileCache, MemoryCache};
pub use storage::{CacheStorage, FileStorage, MemoryStorage, StorageConfig};
pub use types::{
    CacheKey, CacheLookupResult, CacheMetadata, CacheResult, PartitionKind, PartitionSet,
};
