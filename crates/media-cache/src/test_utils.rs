use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::io;
use tokio::sync::Semaphore;

use crate::cache::{
    CacheKey, CacheLookupResult, CacheMetadata, CacheProvider, CacheResult, CacheStorage,
    MemoryStorage, Partition,
};
use crate::{FetchError, Fetcher, Request, Response};

macro_rules! init_test_tracing {
    () => {
        init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

pub(crate) use init_test_tracing;

#[derive(Clone)]
struct MockRoute {
    status: StatusCode,
    body: Bytes,
    content_type: Option<String>,
}

/// Scripted network with per-URL call counters
#[derive(Default)]
pub(crate) struct MockFetcher {
    routes: Mutex<HashMap<String, MockRoute>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    url_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn route(&self, url: &str, body: &str, content_type: &str) {
        self.routes.lock().insert(
            url.to_string(),
            MockRoute {
                status: StatusCode::OK,
                body: Bytes::from(body.to_string()),
                content_type: Some(content_type.to_string()),
            },
        );
    }

    pub(crate) fn route_status(&self, url: &str, status: u16) {
        self.routes.lock().insert(
            url.to_string(),
            MockRoute {
                status: StatusCode::from_u16(status).unwrap(),
                body: Bytes::new(),
                content_type: None,
            },
        );
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Block every subsequent fetch until permits are added to the returned semaphore
    pub(crate) fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Like [`Self::hold`], for fetches of `url` only
    pub(crate) fn hold_url(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.url_gates.lock().insert(url.to_string(), gate.clone());
        gate
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.to_string();
        *self.calls.lock().entry(url.clone()).or_default() += 1;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let url_gate = self.url_gates.lock().get(&url).cloned();
        if let Some(gate) = url_gate {
            gate.acquire().await.unwrap().forget();
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network(format!("offline: {url}")));
        }

        let route = self.routes.lock().get(&url).cloned();
        Ok(match route {
            Some(route) => {
                let mut response = Response::new(route.status, route.body, url);
                if let Some(content_type) = route.content_type {
                    response = response.with_header("content-type", content_type);
                }
                response
            }
            None => Response::new(StatusCode::NOT_FOUND, Bytes::new(), url),
        })
    }
}

/// Memory storage that counts writes
#[derive(Default)]
pub(crate) struct CountingStorage {
    inner: MemoryStorage,
    puts: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

struct CountingProvider {
    inner: Arc<dyn CacheProvider>,
    puts: Arc<AtomicUsize>,
}

#[async_trait]
impl CacheProvider for CountingProvider {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        self.inner.get(key).await
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, data, metadata).await
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner.remove(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.inner.clear().await
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        self.inner.keys().await
    }
}

#[async_trait]
impl CacheStorage for CountingStorage {
    async fn open(&self, name: &str) -> CacheResult<Partition> {
        let partition = self.inner.open(name).await?;
        let provider = CountingProvider {
            inner: partition.provider().clone(),
            puts: self.puts.clone(),
        };
        Ok(Partition::new(name, Arc::new(provider)))
    }

    async fn open_existing(&self, name: &str) -> CacheResult<Option<Partition>> {
        let Some(partition) = self.inner.open_existing(name).await? else {
            return Ok(None);
        };
        let provider = CountingProvider {
            inner: partition.provider().clone(),
            puts: self.puts.clone(),
        };
        Ok(Some(Partition::new(name, Arc::new(provider))))
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.inner.keys().await
    }
}

/// Storage whose partitions open but fail every read and write
#[derive(Default)]
pub(crate) struct BrokenStorage {
    pub(crate) fail_open: bool,
}

struct BrokenProvider;

fn broken() -> io::Error {
    io::Error::other("disk quota exceeded")
}

#[async_trait]
impl CacheProvider for BrokenProvider {
    async fn get(&self, _key: &CacheKey) -> CacheLookupResult {
        Err(broken())
    }

    async fn put(&self, _key: CacheKey, _data: Bytes, _metadata: CacheMetadata) -> CacheResult<()> {
        Err(broken())
    }

    async fn remove(&self, _key: &CacheKey) -> CacheResult<()> {
        Err(broken())
    }

    async fn clear(&self) -> CacheResult<()> {
        Err(broken())
    }

    async fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        Err(broken())
    }
}

#[async_trait]
impl CacheStorage for BrokenStorage {
    async fn open(&self, name: &str) -> CacheResult<Partition> {
        if self.fail_open {
            return Err(broken());
        }
        Ok(Partition::new(name, Arc::new(BrokenProvider)))
    }

    async fn open_existing(&self, name: &str) -> CacheResult<Option<Partition>> {
        self.open(name).await.map(Some)
    }

    async fn has(&self, _name: &str) -> CacheResult<bool> {
        Err(broken())
    }

    async fn delete(&self, _name: &str) -> CacheResult<bool> {
        Err(broken())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Err(broken())
    }
}

pub(crate) fn get(url: &str) -> Request {
    Request::parse(reqwest::Method::GET, url).unwrap()
}
