use thiserror::Error;

/// A single failed candidate during a fallback resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("All {} candidate URLs failed", .attempts.len())]
    Exhausted { attempts: Vec<FailedAttempt> },
}
