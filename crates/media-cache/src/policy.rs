//! # Caching Strategies
//!
//! Applies a [`Strategy`] to one request over the current partitions.
//!
//! Storage is never allowed to fail a request: writes are best-effort and a
//! read error is a miss. Only a network failure with nothing usable in the
//! cache reaches the caller.
//!
//! The engine only writes into partitions that already exist. They are
//! created once when the worker activates, so a late write from a worker
//! that has been replaced cannot bring a purged partition back.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::{CacheStorage, Partition, PartitionKind, PartitionSet};
use crate::classify::Strategy;
use crate::{Fetcher, Request, Response, WorkerError};

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// A cached app-shell page served for an offline navigation
    AppShell,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the caller goes to the network itself
    Passthrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    fn respond(response: Response, source: ResponseSource) -> Self {
        FetchOutcome::Respond { response, source }
    }
}

#[derive(Clone)]
pub struct PolicyEngine {
    storage: Arc<dyn CacheStorage>,
    partitions: PartitionSet,
    fetcher: Arc<dyn Fetcher>,
    app_shell: Arc<[Url]>,
    tracker: TaskTracker,
    shutdown: Arc<watch::Sender<bool>>,
    in_flight: Arc<watch::Sender<usize>>,
}

/// Decrements the in-flight refresh count when the refresh task ends
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn start(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl PolicyEngine {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        partitions: PartitionSet,
        fetcher: Arc<dyn Fetcher>,
        app_shell: Vec<Url>,
    ) -> Self {
        Self {
            storage,
            partitions,
            fetcher,
            app_shell: app_shell.into(),
            tracker: TaskTracker::new(),
            shutdown: Arc::new(watch::Sender::new(false)),
            in_flight: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    /// Create every partition of this version. Failures are logged; the
    /// affected partition then behaves as an always-empty cache.
    pub(crate) async fn create_partitions(&self) {
        for name in self.partitions.names() {
            if let Err(e) = self.storage.open(&name).await {
                warn!(partition = %name, error = %e, "Failed to open cache partition");
            }
        }
    }

    /// Cancel background refreshes and refuse new ones
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            debug!(pending = self.pending_tasks(), "Stopping background refreshes");
        }
        self.tracker.close();
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn apply(
        &self,
        strategy: Strategy,
        request: &Request,
    ) -> Result<FetchOutcome, WorkerError> {
        match strategy {
            Strategy::Passthrough => Ok(FetchOutcome::Passthrough),
            Strategy::CacheFirst(kind) => self.cache_first(kind, request).await,
            Strategy::NetworkFirst(kind) => self.network_first(kind, request).await,
            Strategy::StaleWhileRevalidate(kind) => {
                self.stale_while_revalidate(kind, request).await
            }
        }
    }

    /// Serve from the partition; on a miss fetch once and store 2xx responses
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn cache_first(
        &self,
        kind: PartitionKind,
        request: &Request,
    ) -> Result<FetchOutcome, WorkerError> {
        if let Some(response) = self.lookup(kind, request).await {
            debug!(partition = %kind, "Cache hit");
            return Ok(FetchOutcome::respond(response, ResponseSource::Cache));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_success() {
            self.store(kind, request, &response).await;
        }
        Ok(FetchOutcome::respond(response, ResponseSource::Network))
    }

    /// Fetch first; on a network failure serve the cached copy, then the app shell
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn network_first(
        &self,
        kind: PartitionKind,
        request: &Request,
    ) -> Result<FetchOutcome, WorkerError> {
        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(kind, request, &response).await;
                }
                return Ok(FetchOutcome::respond(response, ResponseSource::Network));
            }
            Err(e) => e,
        };

        warn!(error = %error, "Network unavailable, falling back to cache");

        if let Some(response) = self.lookup(kind, request).await {
            return Ok(FetchOutcome::respond(response, ResponseSource::Cache));
        }

        for shell_url in self.app_shell.iter() {
            let shell = Request::get(shell_url.clone());
            if let Some(response) = self.lookup(kind, &shell).await {
                debug!(shell = %shell_url, "Serving cached app shell");
                return Ok(FetchOutcome::respond(response, ResponseSource::AppShell));
            }
        }

        Err(error.into())
    }

    /// Serve the cached copy immediately and refresh it in the background.
    /// Without a cached copy this behaves like a plain fetch-and-store.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn stale_while_revalidate(
        &self,
        kind: PartitionKind,
        request: &Request,
    ) -> Result<FetchOutcome, WorkerError> {
        if let Some(cached) = self.lookup(kind, request).await {
            self.spawn_refresh(kind, request);
            return Ok(FetchOutcome::respond(cached, ResponseSource::Cache));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_success() {
            self.store(kind, request, &response).await;
        }
        Ok(FetchOutcome::respond(response, ResponseSource::Network))
    }

    fn spawn_refresh(&self, kind: PartitionKind, request: &Request) {
        if self.is_stopped() {
            debug!(url = %request.url, "Engine stopped, skipping background refresh");
            return;
        }

        let guard = InFlight::start(&self.in_flight);
        let engine = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let request = request.clone();
        self.tracker.spawn(async move {
            let _guard = guard;
            let stopped = async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            };
            tokio::select! {
                _ = stopped => {
                    debug!(url = %request.url, "Background refresh cancelled");
                }
                _ = engine.revalidate(kind, &request) => {}
            }
        });
    }

    /// Wait until no background refresh is running. Any number of callers
    /// may wait at once, and refreshes keep being accepted meanwhile.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.in_flight.subscribe();
        // The sender lives as long as `self`, so waiting cannot fail
        let _ = idle.wait_for(|n| *n == 0).await;
    }

    /// Number of background refreshes still running
    pub fn pending_tasks(&self) -> usize {
        *self.in_flight.borrow()
    }

    async fn revalidate(&self, kind: PartitionKind, request: &Request) {
        match self.fetcher.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(kind, request, &response).await;
                debug!(url = %request.url, "Background refresh stored");
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Background refresh not cacheable");
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Background refresh failed");
            }
        }
    }

    async fn open(&self, kind: PartitionKind) -> Option<Partition> {
        let name = self.partitions.name(kind);
        match self.storage.open_existing(&name).await {
            Ok(Some(partition)) => Some(partition),
            Ok(None) => {
                debug!(partition = %name, "Cache partition does not exist");
                None
            }
            Err(e) => {
                warn!(partition = %name, error = %e, "Failed to open cache partition");
                None
            }
        }
    }

    async fn lookup(&self, kind: PartitionKind, request: &Request) -> Option<Response> {
        let partition = self.open(kind).await?;
        match partition.match_request(request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(partition = %partition.name(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    pub(crate) async fn store(&self, kind: PartitionKind, request: &Request, response: &Response) {
        let Some(partition) = self.open(kind).await else {
            return;
        };
        if let Err(e) = partition.put(request, response).await {
            warn!(
                partition = %partition.name(),
                url = %request.url,
                error = %e,
                "Cache write failed"
            );
        }
    }
}
