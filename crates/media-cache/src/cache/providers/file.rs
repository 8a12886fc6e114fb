//! # File Cache
//!
//! A partition stored as one directory: `<hash>` holds the body and
//! `<hash>.meta` its JSON metadata. Writes go to temporary files first and
//! are renamed into place.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

use super::CacheProvider;

const META_EXTENSION: &str = "meta";

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open a partition rooted at `dir`. The directory must already exist;
    /// writes into a deleted partition fail instead of recreating it.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.to_filename())
    }

    fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.data_path(key);
        path.set_extension(META_EXTENSION);
        path
    }

    async fn remove_pair(data_path: &Path, meta_path: &Path) {
        let _ = fs::remove_file(data_path).await;
        let _ = fs::remove_file(meta_path).await;
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        let data_path = self.data_path(key);
        let meta_path = self.metadata_path(key);

        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let metadata: CacheMetadata = match serde_json::from_slice(&metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to parse cache metadata, dropping entry");
                Self::remove_pair(&data_path, &meta_path).await;
                return Ok(None);
            }
        };

        // Hash collisions are practically impossible, but a mismatched key is a miss
        if &metadata.key != key {
            return Ok(None);
        }

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some((Bytes::from(data), metadata)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        if !fs::try_exists(&self.dir).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("partition directory {} no longer exists", self.dir.display()),
            ));
        }

        let data_path = self.data_path(&key);
        let meta_path = self.metadata_path(&key);

        let metadata_json = serde_json::to_vec(&metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize metadata: {e}"),
            )
        })?;

        let temp_data_path = data_path.with_extension("tmp");
        let temp_meta_path = meta_path.with_extension("meta.tmp");

        if let Err(e) = fs::write(&temp_data_path, &data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(from = ?temp_data_path, to = ?data_path, error = %e, "Failed to rename temporary data file");
            Self::remove_pair(&temp_data_path, &temp_meta_path).await;
            return Err(e);
        }

        // Metadata lands last; an entry without it is invisible to readers
        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(from = ?temp_meta_path, to = ?meta_path, error = %e, "Failed to rename temporary metadata file");
            Self::remove_pair(&data_path, &temp_meta_path).await;
            return Err(e);
        }

        debug!(key = %key, size = data.len(), "Stored entry in file partition");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let data_path = self.data_path(key);
        let meta_path = self.metadata_path(key);

        // Metadata first so a half-removed entry is already a miss
        let meta_result = fs::remove_file(&meta_path).await;
        let data_result = fs::remove_file(&data_path).await;

        match (meta_result, data_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?meta_path, error = %e, "Failed to remove cache metadata file");
                Err(e)
            }
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?data_path, error = %e, "Failed to remove cache data file");
                Err(e)
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut removed = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove cache file");
            } else {
                removed += 1;
            }
        }

        debug!(dir = ?self.dir, removed, "Cleared file partition");
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                continue;
            }

            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read cache metadata file");
                    continue;
                }
            };

            match serde_json::from_slice::<CacheMetadata>(&bytes) {
                Ok(metadata) => keys.push(metadata.key),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable cache metadata"),
            }
        }

        keys.sort();
        Ok(keys)
    }
}
