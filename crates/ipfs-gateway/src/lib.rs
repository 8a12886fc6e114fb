//! # IPFS Gateway
//!
//! Client-side resolution of content identifiers (CIDs) to fetchable URLs
//! across several independent IPFS gateways.
//!
//! ## Features
//!
//! - One centralised gateway list with a primary gateway and a same-origin
//!   proxy of last resort
//! - Ordered, de-duplicated candidate URL lists for consumer-driven fallback
//! - Gateway liveness probing with bounded timeouts
//! - [`FallbackSource`], a reusable retry cursor that owns index advancement
//!   so media consumers do not each re-implement it

pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod probe;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{HttpConfig, HttpConfigBuilder, create_client};
pub use config::{DEFAULT_PROBE_CID, DEFAULT_PROXY_ROUTE, Gateway, GatewayConfig};
pub use error::{FailedAttempt, GatewayError};
pub use fallback::{ExhaustedReport, FallbackSource};
pub use probe::{GatewayProber, ProbeReport};
pub use resolver::GatewayResolver;
