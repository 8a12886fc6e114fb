//! # Cache Storage
//!
//! The registry of named partitions. Listing and deleting whole partitions
//! is what lets a new worker version purge the caches of older versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io;
use tracing::{debug, info};

use crate::cache::Partition;
use crate::cache::providers::{FileCache, MemoryCache};
use crate::cache::types::CacheResult;

const DEFAULT_MAX_PARTITION_BYTES: u64 = 64 * 1024 * 1024;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a partition, creating it if it does not exist
    async fn open(&self, name: &str) -> CacheResult<Partition>;

    /// Open a partition only if it exists. Never creates one, so a writer
    /// racing a purge cannot bring a deleted partition back.
    async fn open_existing(&self, name: &str) -> CacheResult<Option<Partition>>;

    async fn has(&self, name: &str) -> CacheResult<bool>;

    /// Delete a partition and everything in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> CacheResult<bool>;

    /// Names of all existing partitions, sorted
    async fn keys(&self) -> CacheResult<Vec<String>>;
}

/// Which storage backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory {
        #[serde(default = "default_max_partition_bytes")]
        max_partition_bytes: u64,
    },
    File {
        root: PathBuf,
    },
}

fn default_max_partition_bytes() -> u64 {
    DEFAULT_MAX_PARTITION_BYTES
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            max_partition_bytes: DEFAULT_MAX_PARTITION_BYTES,
        }
    }
}

impl StorageConfig {
    pub fn build(&self) -> Arc<dyn CacheStorage> {
        match self {
            StorageConfig::Memory {
                max_partition_bytes,
            } => Arc::new(MemoryStorage::new(*max_partition_bytes)),
            StorageConfig::File { root } => Arc::new(FileStorage::new(root.clone())),
        }
    }
}

/// Partitions held in process memory
#[derive(Debug)]
pub struct MemoryStorage {
    partitions: RwLock<BTreeMap<String, MemoryCache>>,
    max_partition_bytes: u64,
}

impl MemoryStorage {
    pub fn new(max_partition_bytes: u64) -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
            max_partition_bytes,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARTITION_BYTES)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> CacheResult<Partition> {
        let cache = self
            .partitions
            .write()
            .entry(name.to_string())
            .or_insert_with(|| MemoryCache::new(self.max_partition_bytes))
            .clone();
        Ok(Partition::new(name, Arc::new(cache)))
    }

    async fn open_existing(&self, name: &str) -> CacheResult<Option<Partition>> {
        let cache = self.partitions.read().get(name).cloned();
        Ok(cache.map(|cache| Partition::new(name, Arc::new(cache))))
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.partitions.read().contains_key(name))
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        let removed = self.partitions.write().remove(name);
        match removed {
            Some(cache) => {
                // Handles still held elsewhere see an empty partition
                cache.clear_now();
                debug!(partition = name, "Deleted memory partition");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.partitions.read().keys().cloned().collect())
    }
}

/// Partitions stored as directories under a root
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, name: &str) -> io::Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid partition name '{name}'"),
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for FileStorage {
    async fn open(&self, name: &str) -> CacheResult<Partition> {
        let dir = self.partition_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(Partition::new(name, Arc::new(FileCache::new(dir))))
    }

    async fn open_existing(&self, name: &str) -> CacheResult<Option<Partition>> {
        let dir = self.partition_dir(name)?;
        if !fs::try_exists(&dir).await? {
            return Ok(None);
        }
        // Writes through this handle fail once the directory is removed
        Ok(Some(Partition::new(name, Arc::new(FileCache::new(dir)))))
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        let dir = self.partition_dir(name)?;
        fs::try_exists(&dir).await
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        let dir = self.partition_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(partition = name, dir = ?dir, "Deleted file partition");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
