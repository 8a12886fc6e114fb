use anyhow::{Context, Result};
use media_cache::{StorageConfig, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file of the CLI.
///
/// Every section is optional; missing keys keep their defaults.
///
/// ```toml
/// request_timeout_secs = 20
///
/// [worker]
/// version = "v3"
/// origin = "https://tunes.example"
///
/// [worker.gateways]
/// primary = "w3s"
///
/// [storage]
/// type = "file"
/// root = "/var/cache/tunes"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overall timeout of network requests made by `fetch`, in seconds
    pub request_timeout_secs: u64,

    /// Cache worker settings, including the gateway list
    pub worker: WorkerConfig,

    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            worker: WorkerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config_path`, or defaults when none is given
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse configuration file")?;
        config
            .worker
            .validate()
            .context("Invalid worker configuration")?;
        Ok(config)
    }

    /// Point the cache at a directory, switching to file storage
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(root) = dir {
            self.storage = StorageConfig::File { root };
        }
        self
    }

    /// Show current configuration as a formatted string
    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration for display")
    }
}
