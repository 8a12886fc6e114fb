//! # Gateway Configuration
//!
//! The single source of truth for which gateways exist, which one is
//! preferred and where the same-origin proxy lives. Both the resolver and
//! the cache manager's traffic classifier read from this structure, so the
//! gateway list is edited in one place only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::GatewayError;

/// Route of the same-origin proxy that fans out to the gateway list server-side
pub const DEFAULT_PROXY_ROUTE: &str = "/api/ipfs";

/// Empty UnixFS directory, served by every public gateway
pub const DEFAULT_PROBE_CID: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 8;

/// A content-addressed storage gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    /// Short human-readable name, also used to select the primary gateway
    pub name: String,
    /// Base URL, e.g. `https://ipfs.io/ipfs`. The CID is appended as `/{cid}`.
    pub base_url: String,
}

impl Gateway {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of `cid` on this gateway
    pub fn url_for(&self, cid: &str) -> String {
        join_cid(&self.base_url, cid)
    }

    /// Host name of the gateway, if the base URL parses
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }
}

pub(crate) fn join_cid(base: &str, cid: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), cid)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateways in fallback priority order
    pub gateways: Vec<Gateway>,
    /// Name of the preferred gateway; tried first
    pub primary: String,
    /// Same-origin proxy route, e.g. `/api/ipfs`
    pub proxy_route: String,
    /// Origin of the web application. When unset, proxy URLs are relative.
    pub app_origin: Option<String>,
    /// CID used for liveness probes
    pub probe_cid: String,
    /// Probe timeout in seconds
    pub probe_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateways: vec![
                Gateway::new("pinata", "https://gateway.pinata.cloud/ipfs"),
                Gateway::new("ipfs.io", "https://ipfs.io/ipfs"),
                Gateway::new("dweb", "https://dweb.link/ipfs"),
                Gateway::new("w3s", "https://w3s.link/ipfs"),
                Gateway::new("nftstorage", "https://nftstorage.link/ipfs"),
                Gateway::new("cloudflare", "https://cloudflare-ipfs.com/ipfs"),
                Gateway::new("4everland", "https://4everland.io/ipfs"),
            ],
            primary: "pinata".to_string(),
            proxy_route: DEFAULT_PROXY_ROUTE.to_string(),
            app_origin: None,
            probe_cid: DEFAULT_PROBE_CID.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// Check the configuration for mistakes that would silently break resolution
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.gateways.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "at least one gateway is required".to_string(),
            ));
        }

        for gateway in &self.gateways {
            let url = Url::parse(&gateway.base_url).map_err(|e| {
                GatewayError::InvalidConfig(format!(
                    "gateway '{}' has an invalid base URL '{}': {e}",
                    gateway.name, gateway.base_url
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(GatewayError::InvalidConfig(format!(
                    "gateway '{}' must use http or https",
                    gateway.name
                )));
            }
        }

        if self.primary_gateway().is_none() {
            return Err(GatewayError::InvalidConfig(format!(
                "primary gateway '{}' is not in the gateway list",
                self.primary
            )));
        }

        if !self.proxy_route.starts_with('/') {
            return Err(GatewayError::InvalidConfig(format!(
                "proxy route '{}' must start with '/'",
                self.proxy_route
            )));
        }

        if let Some(origin) = &self.app_origin {
            let url = Url::parse(origin)
                .map_err(|e| GatewayError::InvalidConfig(format!("invalid app origin: {e}")))?;
            // A same-origin proxy on a gateway host would be classified as gateway traffic
            if let Some(host) = url.host_str() {
                if self.gateway_hosts().contains(&host.to_ascii_lowercase()) {
                    return Err(GatewayError::InvalidConfig(format!(
                        "app origin '{origin}' must not be a gateway host"
                    )));
                }
            }
        }

        if self.probe_timeout_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "probe timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The preferred gateway
    pub fn primary_gateway(&self) -> Option<&Gateway> {
        self.gateways.iter().find(|g| g.name == self.primary)
    }

    /// Distinct host names of all configured gateways
    pub fn gateway_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::with_capacity(self.gateways.len());
        for host in self.gateways.iter().filter_map(Gateway::host) {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Base of proxy URLs: `{origin}{route}` or just `{route}`
    pub fn proxy_base(&self) -> String {
        let route = self.proxy_route.trim_end_matches('/');
        match &self.app_origin {
            Some(origin) => format!("{}{}", origin.trim_end_matches('/'), route),
            None => route.to_string(),
        }
    }
}
