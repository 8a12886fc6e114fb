//! # Worker Configuration
//!
//! Everything the cache manager needs to know about the application it
//! serves: the cache version, the app shell, and the traffic signatures of
//! the collaborators whose requests it must recognise.

use ipfs_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::WorkerError;
use crate::notification::NotificationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache version tag; bumping it purges every older partition on activation
    pub version: String,
    /// Prefix of partition names, `{prefix}-{kind}-{version}`
    pub cache_prefix: String,
    /// Origin of the web application the worker controls
    pub origin: String,
    /// App-shell assets stored at install time, relative to the origin
    pub precache: Vec<String>,
    /// Cached entries served, in order, when a navigation fails offline
    pub app_shell: Vec<String>,
    pub gateways: GatewayConfig,
    pub classifier: ClassifierConfig,
    pub notifications: NotificationConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            cache_prefix: "tunes".to_string(),
            origin: "http://localhost:3000".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            app_shell: vec!["/index.html".to_string(), "/".to_string()],
            gateways: GatewayConfig::default(),
            classifier: ClassifierConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.version.trim().is_empty() {
            return Err(WorkerError::InvalidConfig(
                "cache version must not be empty".to_string(),
            ));
        }

        if self.cache_prefix.is_empty()
            || self
                .cache_prefix
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(WorkerError::InvalidConfig(format!(
                "invalid cache prefix '{}'",
                self.cache_prefix
            )));
        }

        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(WorkerError::InvalidConfig(format!(
                "origin '{}' must use http or https",
                self.origin
            )));
        }

        for path in self.precache.iter().chain(&self.app_shell) {
            self.resolve(path)?;
        }

        self.gateways.validate()?;
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, WorkerError> {
        Url::parse(&self.origin)
            .map_err(|e| WorkerError::InvalidConfig(format!("invalid origin '{}': {e}", self.origin)))
    }

    /// Resolve an app-relative path against the origin
    pub fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| WorkerError::InvalidConfig(format!("invalid asset path '{path}': {e}")))
    }
}

/// Traffic signatures used by the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// File extensions of audio and video resources, lowercase, without dot
    pub media_extensions: Vec<String>,
    /// Database and object-storage hosts; their traffic is never intercepted
    pub database_hosts: Vec<String>,
    /// Hosts serving JSON API reads
    pub api_hosts: Vec<String>,
    /// Same-origin API path prefixes
    pub api_path_prefixes: Vec<String>,
    /// Realtime messaging hosts
    pub realtime_hosts: Vec<String>,
    /// Content-addressed hosts beyond the configured gateways
    pub content_hosts: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            media_extensions: strings(&[
                "mp3", "wav", "ogg", "oga", "m4a", "aac", "flac", "opus", "weba", "mp4", "m4v",
                "webm", "mov", "mkv",
            ]),
            database_hosts: strings(&["supabase.co", "supabase.in"]),
            api_hosts: Vec::new(),
            api_path_prefixes: strings(&["/api/"]),
            realtime_hosts: strings(&["xmtp.network", "xmtp.chat"]),
            content_hosts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.resolve("/index.html").unwrap().as_str(),
            "http://localhost:3000/index.html"
        );
    }

    #[test]
    fn test_invalid_configs() {
        let config = WorkerConfig {
            version: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::InvalidConfig(_))));

        let config = WorkerConfig {
            cache_prefix: "a/b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            origin: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.gateways.primary = "nobody".to_string();
        assert!(matches!(config.validate(), Err(WorkerError::Gateway(_))));
    }

    #[test]
    fn test_toml_sections() {
        let config: WorkerConfig = toml::from_str(
            r#"
            version = "v7"
            origin = "https://tunes.example"

            [classifier]
            api_hosts = ["api.tunes.example"]

            [gateways]
            primary = "ipfs.io"
            "#,
        )
        .unwrap();

        assert_eq!(config.version, "v7");
        assert_eq!(config.classifier.api_hosts, vec!["api.tunes.example"]);
        assert_eq!(config.classifier.realtime_hosts.len(), 2);
        assert_eq!(config.gateways.primary, "ipfs.io");
        assert!(config.validate().is_ok());
    }
}
