//! Pages connected to the worker.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::messaging::WorkerMessage;
use crate::notification::ClickOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Events delivered to a connected page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(WorkerMessage),
    /// A worker of `version` now controls the page
    ControllerChanged { version: String },
    /// The page should bring itself to the foreground
    Focus,
}

#[derive(Debug)]
struct ClientEntry {
    url: String,
    controller: Option<String>,
    sender: mpsc::UnboundedSender<ClientEvent>,
}

/// Registry of open pages, shared by every worker version of an origin
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page showing `url`
    pub fn connect(&self, url: impl Into<String>) -> (ClientId, mpsc::UnboundedReceiver<ClientEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId(Uuid::new_v4());
        let url = url.into();
        debug!(client = %id, url = %url, "Client connected");
        self.clients.write().insert(
            id,
            ClientEntry {
                url,
                controller: None,
                sender,
            },
        );
        (id, receiver)
    }

    pub fn disconnect(&self, id: ClientId) {
        self.clients.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Version of the worker controlling `id`, if any
    pub fn controller_of(&self, id: ClientId) -> Option<String> {
        self.clients
            .read()
            .get(&id)
            .and_then(|entry| entry.controller.clone())
    }

    /// Take control of every connected page. Returns how many were claimed.
    pub fn claim(&self, version: &str) -> usize {
        let mut clients = self.clients.write();
        clients.retain(|_, entry| {
            entry.controller = Some(version.to_string());
            entry
                .sender
                .send(ClientEvent::ControllerChanged {
                    version: version.to_string(),
                })
                .is_ok()
        });
        clients.len()
    }

    /// Send `message` to every connected page. Returns how many received it.
    pub fn broadcast(&self, message: &WorkerMessage) -> usize {
        let mut clients = self.clients.write();
        clients.retain(|_, entry| entry.sender.send(ClientEvent::Message(message.clone())).is_ok());
        clients.len()
    }

    /// Focus a page already showing `url`, or ask for a new window
    pub fn focus_or_open(&self, url: &str) -> ClickOutcome {
        let clients = self.clients.read();
        let target = clients
            .iter()
            .find(|(_, entry)| entry.url == url && !entry.sender.is_closed());

        match target {
            Some((id, entry)) if entry.sender.send(ClientEvent::Focus).is_ok() => {
                ClickOutcome::Focused(*id)
            }
            _ => ClickOutcome::OpenWindow(url.to_string()),
        }
    }
}
