use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] ipfs_gateway::GatewayError),

    #[error("Worker error: {0}")]
    Worker(#[from] media_cache::WorkerError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] media_cache::FetchError),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
