//! # Worker Lifecycle
//!
//! A cache worker moves through
//! `Installing → Waiting → Active → Superseded → Terminated`.
//! Installing pre-caches the app shell; activation (only on request, never
//! automatic) purges the partitions of every other version and claims the
//! connected pages. Only an `Active` worker intercepts requests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::cache::{CacheStorage, PartitionKind, PartitionSet};
use crate::classify::Classifier;
use crate::clients::ClientHub;
use crate::messaging::{MessageOutcome, PageMessage, SYNC_TAG, WorkerMessage};
use crate::notification::{ACTION_DISMISS, ClickOutcome, Notification};
use crate::policy::{FetchOutcome, PolicyEngine};
use crate::{Fetcher, Request, Response, WorkerConfig, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
    Superseded,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
            WorkerState::Superseded => "superseded",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Result of pre-caching the app shell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    /// `(url, reason)` for every asset that could not be stored
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Partitions deleted because they belong to another version
    pub purged: Vec<String>,
    /// Number of pages now controlled by this worker
    pub claimed: usize,
}

pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    classifier: Classifier,
    policy: PolicyEngine,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<ClientHub>,
    state: RwLock<WorkerState>,
    sync_tags: Mutex<BTreeSet<String>>,
    origin: Url,
}

impl ServiceWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<ClientHub>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;

        let origin = config.origin_url()?;
        let app_shell = config
            .app_shell
            .iter()
            .map(|path| config.resolve(path))
            .collect::<Result<Vec<_>, _>>()?;

        let classifier = Classifier::new(origin.clone(), &config.gateways, config.classifier.clone());
        let partitions = PartitionSet::new(&config.cache_prefix, &config.version);
        let policy = PolicyEngine::new(storage.clone(), partitions, fetcher.clone(), app_shell);

        Ok(Self {
            config: Arc::new(config),
            classifier,
            policy,
            storage,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Installing),
            sync_tags: Mutex::new(BTreeSet::new()),
            origin,
        })
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn partitions(&self) -> &PartitionSet {
        self.policy.partitions()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn expect_state(&self, expected: WorkerState) -> Result<(), WorkerError> {
        let actual = self.state();
        if actual != expected {
            return Err(WorkerError::InvalidState { expected, actual });
        }
        Ok(())
    }

    fn set_state(&self, state: WorkerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        info!(version = %self.config.version, from = %previous, to = %state, "Worker state changed");
    }

    /// Open the static partition and pre-cache the app shell.
    ///
    /// Individual asset failures are reported, not fatal. If the static
    /// partition cannot be opened the worker is terminated.
    #[instrument(skip(self), fields(version = %self.config.version))]
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.expect_state(WorkerState::Installing)?;

        let name = self.partitions().name(PartitionKind::Static);
        let partition = match self.storage.open(&name).await {
            Ok(partition) => partition,
            Err(e) => {
                error!(partition = %name, error = %e, "Cannot open static partition, install failed");
                self.set_state(WorkerState::Terminated);
                return Err(WorkerError::Storage(e));
            }
        };

        let mut requests = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            requests.push(Request::get(self.config.resolve(path)?));
        }

        let results = join_all(requests.iter().map(|request| {
            let partition = &partition;
            async move {
                let response = self.fetcher.fetch(request).await.map_err(|e| e.to_string())?;
                if !response.is_success() {
                    return Err(format!("server returned {}", response.status));
                }
                partition
                    .put(request, &response)
                    .await
                    .map_err(|e| e.to_string())
            }
        }))
        .await;

        let mut report = InstallReport::default();
        for (request, result) in requests.iter().zip(results) {
            let url = request.url.to_string();
            match result {
                Ok(()) => report.cached.push(url),
                Err(reason) => {
                    warn!(url = %url, reason = %reason, "Failed to pre-cache asset");
                    report.failed.push((url, reason));
                }
            }
        }

        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "App shell pre-cached"
        );
        self.set_state(WorkerState::Waiting);
        Ok(report)
    }

    /// Activate a waiting worker in response to `SKIP_WAITING`
    pub async fn skip_waiting(&self) -> Result<ActivateReport, WorkerError> {
        self.activate().await
    }

    /// Purge other versions' partitions, open the current ones and claim clients
    #[instrument(skip(self), fields(version = %self.config.version))]
    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.expect_state(WorkerState::Waiting)?;

        let mut report = ActivateReport::default();
        let partitions = self.partitions().clone();

        match self.storage.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|name| !partitions.contains(name)) {
                    match self.storage.delete(&name).await {
                        Ok(_) => {
                            info!(partition = %name, "Purged stale cache partition");
                            report.purged.push(name);
                        }
                        Err(e) => warn!(partition = %name, error = %e, "Failed to purge partition"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list cache partitions"),
        }

        self.policy.create_partitions().await;

        self.set_state(WorkerState::Active);
        report.claimed = self.clients.claim(&self.config.version);
        info!(purged = report.purged.len(), claimed = report.claimed, "Worker activated");
        Ok(report)
    }

    /// Mark an active worker as replaced by a newer version
    pub fn supersede(&self) -> Result<(), WorkerError> {
        self.expect_state(WorkerState::Active)?;
        self.set_state(WorkerState::Superseded);
        self.policy.stop();
        Ok(())
    }

    /// Stop the worker for good, cancelling its background refreshes
    pub fn terminate(&self) {
        self.policy.stop();
        if self.state() != WorkerState::Terminated {
            self.set_state(WorkerState::Terminated);
        }
    }

    /// Decide how to serve `request`.
    ///
    /// Non-GET requests and every request reaching a non-active worker are
    /// passed through.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        if self.state() != WorkerState::Active || !request.is_get() {
            return Ok(FetchOutcome::Passthrough);
        }

        let class = self.classifier.classify(request);
        debug!(url = %request.url, class = %class, "Classified request");
        self.policy.apply(class.strategy(), request).await
    }

    /// Serve `request` through this worker, going to the network for pass-through traffic
    pub async fn fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        match self.handle_fetch(request).await? {
            FetchOutcome::Respond { response, .. } => Ok(response),
            FetchOutcome::Passthrough => Ok(self.fetcher.fetch(request).await?),
        }
    }

    pub async fn handle_message(&self, message: PageMessage) -> Result<MessageOutcome, WorkerError> {
        match message {
            PageMessage::SkipWaiting => {
                if self.state() != WorkerState::Waiting {
                    debug!(state = %self.state(), "SKIP_WAITING ignored");
                    return Ok(MessageOutcome::Ignored);
                }
                Ok(MessageOutcome::Activated(self.skip_waiting().await?))
            }
            PageMessage::XmtpSync => {
                self.sync_tags.lock().insert(SYNC_TAG.to_string());
                debug!(tag = SYNC_TAG, "Background sync registered");
                Ok(MessageOutcome::SyncRegistered(SYNC_TAG.to_string()))
            }
        }
    }

    pub fn pending_sync_tags(&self) -> Vec<String> {
        self.sync_tags.lock().iter().cloned().collect()
    }

    /// Fire a background sync. Returns the number of clients notified.
    pub fn on_sync(&self, tag: &str) -> usize {
        if !self.sync_tags.lock().remove(tag) {
            debug!(tag, "Sync fired for unregistered tag");
            return 0;
        }
        if tag != SYNC_TAG {
            return 0;
        }
        let notified = self.clients.broadcast(&WorkerMessage::sync_messages());
        info!(tag, notified, "Broadcast message resync");
        notified
    }

    pub fn on_push(&self, payload: Option<&[u8]>) -> Notification {
        Notification::from_push(payload, &self.config.notifications, &self.origin)
    }

    /// Route a notification click; `None` is a click on the body
    pub fn on_notification_click(&self, notification: &Notification, action: Option<&str>) -> ClickOutcome {
        if action == Some(ACTION_DISMISS) {
            return ClickOutcome::Dismissed;
        }
        self.clients.focus_or_open(&notification.url)
    }

    /// Wait for outstanding background work
    pub async fn wait_until_idle(&self) {
        self.policy.wait_until_idle().await;
    }
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientEvent;
    use crate::policy::ResponseSource;
    use crate::test_utils::{BrokenStorage, MockFetcher, get, init_test_tracing};
    use crate::{FetchError, MemoryStorage};
    use reqwest::Method;

    const ORIGIN: &str = "https://tunes.example";

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig {
            version: version.to_string(),
            origin: ORIGIN.to_string(),
            precache: vec!["/".to_string(), "/index.html".to_string(), "/manifest.json".to_string()],
            ..Default::default()
        }
    }

    fn online_fetcher() -> Arc<MockFetcher> {
        let fetcher = MockFetcher::new();
        fetcher.route("https://tunes.example/", "<root>", "text/html");
        fetcher.route("https://tunes.example/index.html", "<shell>", "text/html");
        fetcher.route("https://tunes.example/manifest.json", "{}", "application/json");
        fetcher
    }

    async fn active_worker(
        version: &str,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<MockFetcher>,
        clients: Arc<ClientHub>,
    ) -> ServiceWorker {
        let worker = ServiceWorker::new(config(version), storage, fetcher, clients).unwrap();
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        worker
    }

    #[tokio::test]
    async fn test_install_precaches_shell() {
        init_test_tracing!();
        let fetcher = online_fetcher();
        fetcher.route_status("https://tunes.example/manifest.json", 404);
        let storage = Arc::new(MemoryStorage::default());
        let worker =
            ServiceWorker::new(config("v1"), storage.clone(), fetcher, Arc::new(ClientHub::new()))
                .unwrap();

        assert_eq!(worker.state(), WorkerState::Installing);
        let report = worker.install().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Waiting);
        assert_eq!(report.cached.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "https://tunes.example/manifest.json");

        let partition = storage.open("tunes-static-v1").await.unwrap();
        assert!(
            partition
                .match_request(&get("https://tunes.example/index.html"))
                .await
                .unwrap()
                .is_some()
        );

        // Install runs once
        assert!(matches!(
            worker.install().await,
            Err(WorkerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_install_without_storage_terminates() {
        let worker = ServiceWorker::new(
            config("v1"),
            Arc::new(BrokenStorage { fail_open: true }),
            online_fetcher(),
            Arc::new(ClientHub::new()),
        )
        .unwrap();

        assert!(matches!(worker.install().await, Err(WorkerError::Storage(_))));
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert!(matches!(
            worker.handle_fetch(&get("https://ipfs.io/ipfs/bafy")).await.unwrap(),
            FetchOutcome::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_activation_purges_other_versions() {
        init_test_tracing!();
        let storage = Arc::new(MemoryStorage::default());
        for name in ["tunes-static-v1", "tunes-ipfs-v1", "tunes-api-v1", "legacy-cache"] {
            storage.open(name).await.unwrap();
        }

        let clients = Arc::new(ClientHub::new());
        let (_page, mut events) = clients.connect("https://tunes.example/");

        let worker =
            ServiceWorker::new(config("v2"), storage.clone(), online_fetcher(), clients).unwrap();
        worker.install().await.unwrap();

        // Waiting workers never activate on their own
        assert_eq!(worker.state(), WorkerState::Waiting);
        assert!(matches!(
            worker.handle_fetch(&get("https://ipfs.io/ipfs/bafy")).await.unwrap(),
            FetchOutcome::Passthrough
        ));

        let outcome = worker.handle_message(PageMessage::SkipWaiting).await.unwrap();
        let MessageOutcome::Activated(report) = outcome else {
            panic!("expected activation, got {outcome:?}");
        };

        let mut purged = report.purged.clone();
        purged.sort();
        assert_eq!(
            purged,
            vec!["legacy-cache", "tunes-api-v1", "tunes-ipfs-v1", "tunes-static-v1"]
        );
        assert_eq!(report.claimed, 1);
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["tunes-api-v2", "tunes-dynamic-v2", "tunes-ipfs-v2", "tunes-static-v2"]
        );
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::ControllerChanged {
                version: "v2".to_string()
            })
        );

        // A second SKIP_WAITING is a no-op
        assert_eq!(
            worker.handle_message(PageMessage::SkipWaiting).await.unwrap(),
            MessageOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_cached_shell() {
        init_test_tracing!();
        let fetcher = online_fetcher();
        let worker = active_worker(
            "v1",
            Arc::new(MemoryStorage::default()),
            fetcher.clone(),
            Arc::new(ClientHub::new()),
        )
        .await;

        fetcher.set_offline(true);

        for url in ["https://tunes.example/", "https://tunes.example/index.html"] {
            match worker.handle_fetch(&get(url)).await.unwrap() {
                FetchOutcome::Respond { response, source } => {
                    assert_eq!(source, ResponseSource::Cache);
                    assert!(response.is_success());
                }
                other => panic!("expected cached response, got {other:?}"),
            }
        }

        match worker
            .handle_fetch(&get("https://tunes.example/playlist.html"))
            .await
            .unwrap()
        {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::AppShell);
                assert_eq!(&response.body[..], b"<shell>");
            }
            other => panic!("expected app shell, got {other:?}"),
        }

        // Nothing cached and offline: the error surfaces
        assert!(matches!(
            worker.fetch(&get("https://tunes.example/app.js")).await,
            Err(WorkerError::Fetch(FetchError::Network(_)))
        ));
    }

    #[tokio::test]
    async fn test_media_and_non_get_pass_through() {
        let fetcher = online_fetcher();
        fetcher.route("https://ipfs.io/ipfs/bafysong", "ID3", "audio/mpeg");
        let storage = Arc::new(MemoryStorage::default());
        let worker = active_worker("v1", storage.clone(), fetcher.clone(), Arc::new(ClientHub::new())).await;

        let range = get("https://ipfs.io/ipfs/bafysong").with_header("Range", "bytes=0-");
        assert!(matches!(
            worker.handle_fetch(&range).await.unwrap(),
            FetchOutcome::Passthrough
        ));

        let post = Request::parse(Method::POST, "https://tunes.example/api/songs").unwrap();
        assert!(matches!(
            worker.handle_fetch(&post).await.unwrap(),
            FetchOutcome::Passthrough
        ));

        // Pass-through traffic still reaches the network but is never stored
        let response = worker.fetch(&range).await.unwrap();
        assert_eq!(&response.body[..], b"ID3");
        let ipfs = storage.open("tunes-ipfs-v1").await.unwrap();
        assert!(ipfs.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_addressed_is_cache_first() {
        let fetcher = online_fetcher();
        fetcher.route("https://ipfs.io/ipfs/bafycover", "jpeg", "image/jpeg");
        let worker = active_worker(
            "v1",
            Arc::new(MemoryStorage::default()),
            fetcher.clone(),
            Arc::new(ClientHub::new()),
        )
        .await;

        let request = get("https://ipfs.io/ipfs/bafycover");
        worker.fetch(&request).await.unwrap();
        worker.fetch(&request).await.unwrap();
        assert_eq!(fetcher.calls("https://ipfs.io/ipfs/bafycover"), 1);
    }

    #[tokio::test]
    async fn test_sync_broadcasts_once_per_registration() {
        let clients = Arc::new(ClientHub::new());
        let worker = active_worker(
            "v1",
            Arc::new(MemoryStorage::default()),
            online_fetcher(),
            clients.clone(),
        )
        .await;
        let (_a, mut rx_a) = clients.connect("https://tunes.example/");
        let (_b, _rx_b) = clients.connect("https://tunes.example/inbox");

        assert_eq!(worker.on_sync(SYNC_TAG), 0, "nothing registered yet");

        assert_eq!(
            worker.handle_message(PageMessage::XmtpSync).await.unwrap(),
            MessageOutcome::SyncRegistered(SYNC_TAG.to_string())
        );
        assert_eq!(worker.pending_sync_tags(), vec![SYNC_TAG]);
        assert_eq!(worker.on_sync("other tag"), 0);
        assert_eq!(worker.on_sync(SYNC_TAG), 2);
        assert_eq!(
            rx_a.recv().await,
            Some(ClientEvent::Message(WorkerMessage::sync_messages()))
        );
        assert_eq!(worker.on_sync(SYNC_TAG), 0);
    }

    #[tokio::test]
    async fn test_push_and_click() {
        let clients = Arc::new(ClientHub::new());
        let worker = active_worker(
            "v1",
            Arc::new(MemoryStorage::default()),
            online_fetcher(),
            clients.clone(),
        )
        .await;

        let notification = worker.on_push(Some(br#"{"title":"New message","url":"/inbox"}"#));
        assert_eq!(notification.title, "New message");
        assert_eq!(notification.url, "https://tunes.example/inbox");

        assert_eq!(
            worker.on_notification_click(&notification, Some("dismiss")),
            ClickOutcome::Dismissed
        );
        assert_eq!(
            worker.on_notification_click(&notification, Some("open")),
            ClickOutcome::OpenWindow("https://tunes.example/inbox".to_string())
        );

        let (id, _rx) = clients.connect("https://tunes.example/inbox");
        assert_eq!(
            worker.on_notification_click(&notification, None),
            ClickOutcome::Focused(id)
        );
    }

    #[tokio::test]
    async fn test_supersede_and_terminate() {
        let worker = active_worker(
            "v1",
            Arc::new(MemoryStorage::default()),
            online_fetcher(),
            Arc::new(ClientHub::new()),
        )
        .await;

        worker.supersede().unwrap();
        assert_eq!(worker.state(), WorkerState::Superseded);
        assert!(worker.supersede().is_err());
        assert!(matches!(
            worker.handle_fetch(&get("https://ipfs.io/ipfs/bafy")).await.unwrap(),
            FetchOutcome::Passthrough
        ));

        worker.terminate();
        assert_eq!(worker.state(), WorkerState::Terminated);
    }
}
