//! Push notifications rendered by the worker.

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::clients::ClientId;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

/// Fallback values for push payloads that omit fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// App-relative URL opened when the notification is clicked
    pub url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "New notification".to_string(),
            body: "You have new activity".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            url: "/".to_string(),
        }
    }
}

/// JSON body of a push message; every field is optional
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Absolute, same-origin URL to open on click
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build a notification from a raw push payload.
    ///
    /// Missing or malformed payloads produce the configured defaults. A URL
    /// pointing outside `origin` is replaced by the default URL.
    pub fn from_push(payload: Option<&[u8]>, defaults: &NotificationConfig, origin: &Url) -> Self {
        let payload = match payload.filter(|p| !p.is_empty()) {
            Some(bytes) => serde_json::from_slice::<PushPayload>(bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed push payload");
                PushPayload::default()
            }),
            None => PushPayload::default(),
        };

        let default_url = origin
            .join(&defaults.url)
            .map(String::from)
            .unwrap_or_else(|_| origin.to_string());

        let url = payload
            .url
            .and_then(|url| match origin.join(&url) {
                Ok(resolved) if resolved.origin() == origin.origin() => Some(resolved.to_string()),
                _ => {
                    warn!(url = %url, "Ignoring cross-origin notification URL");
                    None
                }
            })
            .unwrap_or(default_url);

        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
            badge: defaults.badge.clone(),
            url,
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

/// Result of a notification click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    /// An open client already showing the URL was focused
    Focused(ClientId),
    /// No client shows the URL; the embedder should open a window
    OpenWindow(String),
}
