//! Gateway liveness probing.
//!
//! Probing is diagnostic only: it never feeds back into resolution order and
//! never returns an error. Every failure mode collapses into `false`.

use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::{Gateway, GatewayConfig};
use crate::{GatewayError, HttpConfig, create_client};

/// Outcome of probing one gateway
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub gateway: Gateway,
    pub healthy: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayProber {
    client: Client,
    probe_cid: String,
    timeout: Duration,
}

impl GatewayProber {
    /// Create a prober with its own HTTP client
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = HttpConfig::builder()
            .with_timeout(config.probe_timeout())
            .build();
        Ok(Self::with_client(create_client(&http)?, config))
    }

    /// Create a prober that shares an existing HTTP client
    pub fn with_client(client: Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            probe_cid: config.probe_cid.clone(),
            timeout: config.probe_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// HEAD the probe CID on `gateway`; `true` only on a 2xx within the timeout
    #[instrument(skip(self), fields(gateway = %gateway.name))]
    pub async fn probe_gateway(&self, gateway: &Gateway) -> bool {
        let url = gateway.url_for(&self.probe_cid);
        let request = self.client.head(&url).send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let healthy = response.status().is_success();
                debug!(url = %url, status = %response.status(), healthy, "Gateway probe finished");
                healthy
            }
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "Gateway probe failed");
                false
            }
            Err(_) => {
                debug!(url = %url, timeout = ?self.timeout, "Gateway probe timed out");
                false
            }
        }
    }

    /// Probe every gateway concurrently, reporting in configuration order
    pub async fn probe_all(&self, gateways: &[Gateway]) -> Vec<ProbeReport> {
        let probes = gateways.iter().map(|gateway| async move {
            let started = Instant::now();
            let healthy = self.probe_gateway(gateway).await;
            ProbeReport {
                gateway: gateway.clone(),
                healthy,
                elapsed: started.elapsed(),
            }
        });
        join_all(probes).await
    }
}
