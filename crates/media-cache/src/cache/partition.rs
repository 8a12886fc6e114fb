use std::fmt;
use std::sync::Arc;

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheMetadata, CacheResult};
use crate::{Request, Response};

/// An open, named cache partition
#[derive(Clone)]
pub struct Partition {
    name: String,
    provider: Arc<dyn CacheProvider>,
}

impl Partition {
    pub fn new(name: impl Into<String>, provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    /// Cached response for `request`, if any
    pub async fn match_request(&self, request: &Request) -> CacheResult<Option<Response>> {
        self.match_key(&CacheKey::for_request(request)).await
    }

    pub async fn match_key(&self, key: &CacheKey) -> CacheResult<Option<Response>> {
        Ok(self
            .provider
            .get(key)
            .await?
            .map(|(body, metadata)| metadata.to_response(body)))
    }

    /// Store `response` under `request`, replacing any previous entry
    pub async fn put(&self, request: &Request, response: &Response) -> CacheResult<()> {
        let key = CacheKey::for_request(request);
        let metadata = CacheMetadata::from_response(key.clone(), response);
        self.provider
            .put(key, response.body.clone(), metadata)
            .await
    }

    pub async fn delete(&self, request: &Request) -> CacheResult<()> {
        self.provider.remove(&CacheKey::for_request(request)).await
    }

    pub async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        self.provider.keys().await
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition").field("name", &self.name).finish()
    }
}
