use ipfs_gateway::GatewayError;
use thiserror::Error;

use crate::lifecycle::WorkerState;

/// Errors raised while talking to the network
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Network unavailable: {0}")]
    Network(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Invalid worker state: expected {expected}, found {actual}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("Gateway configuration error: {0}")]
    Gateway(#[from] GatewayError),
}
