//! Page ↔ worker messages. Both directions are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::WorkerError;
use crate::lifecycle::ActivateReport;

/// Background-sync tag registered by [`PageMessage::XmtpSync`]
pub const SYNC_TAG: &str = "resync messages";

/// Messages posted by a page to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    /// Activate the waiting worker now
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Ask for a background sync of live messages
    #[serde(rename = "XMTPSYNC")]
    XmtpSync,
}

impl PageMessage {
    pub fn from_json(json: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, WorkerError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages broadcast by the worker to its clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "XMTPSYNC")]
    XmtpSync { action: SyncAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    /// Clients should refresh their live message state
    SyncMessages,
}

impl WorkerMessage {
    pub fn sync_messages() -> Self {
        WorkerMessage::XmtpSync {
            action: SyncAction::SyncMessages,
        }
    }

    pub fn to_json(&self) -> Result<String, WorkerError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What handling a page message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Activated(ActivateReport),
    SyncRegistered(String),
    /// Valid message with nothing to act on, e.g. `SKIP_WAITING` with no waiting worker
    Ignored,
}
