//! Per-origin registration holding at most one waiting and one active worker.
//!
//! Registering a new version installs it next to the running one. The new
//! worker only takes over when a page posts `SKIP_WAITING`; the previous
//! worker is then superseded and terminated.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clients::ClientHub;
use crate::lifecycle::{InstallReport, ServiceWorker};
use crate::messaging::{MessageOutcome, PageMessage};
use crate::notification::Notification;
use crate::{CacheStorage, Fetcher, Request, Response, WorkerConfig, WorkerError};

pub struct Registration {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<ClientHub>,
    waiting: RwLock<Option<Arc<ServiceWorker>>>,
    active: RwLock<Option<Arc<ServiceWorker>>>,
}

impl Registration {
    pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            storage,
            fetcher,
            clients: Arc::new(ClientHub::new()),
            waiting: RwLock::new(None),
            active: RwLock::new(None),
        }
    }

    pub fn clients(&self) -> &Arc<ClientHub> {
        &self.clients
    }

    /// The active worker controlling pages, if any
    pub fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.active.read().clone()
    }

    pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.waiting.read().clone()
    }

    /// Install a worker for `config`.
    ///
    /// On success the worker waits for `SKIP_WAITING`; a worker that was
    /// already waiting is discarded.
    pub async fn register(&self, config: WorkerConfig) -> Result<InstallReport, WorkerError> {
        let worker = Arc::new(ServiceWorker::new(
            config,
            self.storage.clone(),
            self.fetcher.clone(),
            self.clients.clone(),
        )?);

        let report = worker.install().await?;

        let previous = self.waiting.write().replace(worker.clone());
        if let Some(previous) = previous {
            debug!(version = %previous.version(), "Discarding previously waiting worker");
            previous.terminate();
        }
        info!(version = %worker.version(), "Worker installed and waiting");
        Ok(report)
    }

    /// Activate the waiting worker, replacing the current controller.
    /// Returns `Ignored` when nothing is waiting.
    pub async fn promote_waiting(&self) -> Result<MessageOutcome, WorkerError> {
        let Some(worker) = self.waiting.write().take() else {
            return Ok(MessageOutcome::Ignored);
        };

        let outcome = worker.handle_message(PageMessage::SkipWaiting).await?;

        let previous = self.active.write().replace(worker);
        if let Some(previous) = previous {
            if let Err(e) = previous.supersede() {
                warn!(version = %previous.version(), error = %e, "Replaced worker was not active");
            }
            previous.terminate();
        }
        Ok(outcome)
    }

    /// Deliver a page message to the worker it is meant for
    pub async fn post_message(&self, message: PageMessage) -> Result<MessageOutcome, WorkerError> {
        match message {
            PageMessage::SkipWaiting => self.promote_waiting().await,
            PageMessage::XmtpSync => match self.controller() {
                Some(worker) => worker.handle_message(message).await,
                None => Ok(MessageOutcome::Ignored),
            },
        }
    }

    /// Fetch through the controller, or straight from the network when uncontrolled
    pub async fn fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        match self.controller() {
            Some(worker) => worker.fetch(request).await,
            None => Ok(self.fetcher.fetch(request).await?),
        }
    }

    pub fn sync(&self, tag: &str) -> usize {
        self.controller().map_or(0, |worker| worker.on_sync(tag))
    }

    pub fn push(&self, payload: Option<&[u8]>) -> Option<Notification> {
        self.controller().map(|worker| worker.on_push(payload))
    }
}
