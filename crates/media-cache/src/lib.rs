//! # Media Cache
//!
//! A request-intercepting cache manager modelled on a browser background
//! worker. Every outgoing request is classified into a traffic class, and
//! each class maps to one caching strategy over a versioned cache partition.
//!
//! ## Features
//!
//! - Ordered traffic classification with media streaming always passed through
//! - Immutable cache-first for content-addressed (IPFS) responses
//! - Network-first navigation with an offline app-shell fallback
//! - Stale-while-revalidate for API reads, refreshed on a task tracker
//! - Versioned partitions purged on activation
//! - Explicit worker lifecycle (installing, waiting, active, superseded, terminated)
//! - Page messaging, background sync and push notifications
//! - Memory (moka) and file-backed partition storage

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod messaging;
pub mod notification;
pub mod policy;
pub mod registration;
pub mod request;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::{
    CacheKey, CacheMetadata, CacheProvider, CacheStorage, FileStorage, MemoryStorage, Partition,
    PartitionKind, PartitionSet, StorageConfig,
};
pub use classify::{Classifier, Strategy, TrafficClass};
pub use clients::{ClientEvent, ClientHub, ClientId};
pub use config::{ClassifierConfig, WorkerConfig};
pub use error::{FetchError, WorkerError};
pub use fetcher::{Fetcher, HttpFetcher};
pub use lifecycle::{ActivateReport, InstallReport, ServiceWorker, WorkerState};
pub use messaging::{MessageOutcome, PageMessage, SYNC_TAG, SyncAction, WorkerMessage};
pub use notification::{ClickOutcome, Notification, NotificationAction, NotificationConfig};
pub use policy::{FetchOutcome, PolicyEngine, ResponseSource};
pub use registration::Registration;
pub use request::{DEFAULT_CONTENT_TYPE, Request, Response};
