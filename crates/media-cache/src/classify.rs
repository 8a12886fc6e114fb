//! # Traffic Classification
//!
//! Every intercepted GET request falls into exactly one [`TrafficClass`].
//! Classification is a single ordered rule table evaluated top to bottom;
//! the first matching rule wins and [`TrafficClass::Default`] catches the rest.

use std::fmt;

use ipfs_gateway::GatewayConfig;
use reqwest::header::{ACCEPT, RANGE};
use url::Url;

use crate::cache::PartitionKind;
use crate::config::ClassifierConfig;
use crate::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Audio/video and database traffic, including byte-range requests
    MediaPassthrough,
    /// Immutable responses from IPFS gateways
    ContentAddressed,
    /// Same-origin page loads
    Navigation,
    /// The same-origin gateway proxy route
    ProxyPassthrough,
    Api,
    /// Live messaging traffic
    RealtimePassthrough,
    Default,
}

/// How a traffic class is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted; goes straight to the network
    Passthrough,
    /// Serve from cache, fetch and store on a miss
    CacheFirst(PartitionKind),
    /// Fetch and store, serve from cache when the network fails
    NetworkFirst(PartitionKind),
    /// Serve from cache immediately, refresh in the background
    StaleWhileRevalidate(PartitionKind),
}

impl TrafficClass {
    pub fn strategy(self) -> Strategy {
        match self {
            TrafficClass::MediaPassthrough
            | TrafficClass::ProxyPassthrough
            | TrafficClass::RealtimePassthrough => Strategy::Passthrough,
            TrafficClass::ContentAddressed => Strategy::CacheFirst(PartitionKind::Ipfs),
            TrafficClass::Navigation => Strategy::NetworkFirst(PartitionKind::Static),
            TrafficClass::Api => Strategy::StaleWhileRevalidate(PartitionKind::Api),
            TrafficClass::Default => Strategy::CacheFirst(PartitionKind::Dynamic),
        }
    }

    pub fn is_intercepted(self) -> bool {
        self.strategy() != Strategy::Passthrough
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrafficClass::MediaPassthrough => "media-passthrough",
            TrafficClass::ContentAddressed => "content-addressed",
            TrafficClass::Navigation => "navigation",
            TrafficClass::ProxyPassthrough => "proxy-passthrough",
            TrafficClass::Api => "api",
            TrafficClass::RealtimePassthrough => "realtime-passthrough",
            TrafficClass::Default => "default",
        };
        f.write_str(name)
    }
}

type Rule = fn(&Classifier, &Request) -> bool;

const RULES: &[(TrafficClass, Rule)] = &[
    (TrafficClass::MediaPassthrough, Classifier::is_media),
    // Proxied gateway content is never intercepted, whatever it looks like
    (TrafficClass::ProxyPassthrough, Classifier::is_proxy),
    (TrafficClass::ContentAddressed, Classifier::is_content_addressed),
    (TrafficClass::Navigation, Classifier::is_navigation),
    (TrafficClass::Api, Classifier::is_api),
    (TrafficClass::RealtimePassthrough, Classifier::is_realtime),
];

#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    proxy_route: String,
    content_hosts: Vec<String>,
    config: ClassifierConfig,
}

impl Classifier {
    /// Build a classifier; content-addressed hosts come from the shared gateway configuration
    pub fn new(origin: Url, gateways: &GatewayConfig, config: ClassifierConfig) -> Self {
        let mut content_hosts = gateways.gateway_hosts();
        for host in &config.content_hosts {
            let host = host.to_ascii_lowercase();
            if !content_hosts.contains(&host) {
                content_hosts.push(host);
            }
        }

        Self {
            origin,
            proxy_route: gateways.proxy_route.trim_end_matches('/').to_string(),
            content_hosts,
            config,
        }
    }

    pub fn classify(&self, request: &Request) -> TrafficClass {
        RULES
            .iter()
            .find(|(_, matches)| matches(self, request))
            .map(|(class, _)| *class)
            .unwrap_or(TrafficClass::Default)
    }

    fn is_media(&self, request: &Request) -> bool {
        if request.headers.contains_key(RANGE) {
            return true;
        }

        let accepts_media = request
            .header(ACCEPT)
            .map(|accept| {
                let accept = accept.to_ascii_lowercase();
                accept.contains("audio/") || accept.contains("video/")
            })
            .unwrap_or(false);
        if accepts_media {
            return true;
        }

        if let Some(extension) = path_extension(&request.url) {
            if self.config.media_extensions.iter().any(|e| *e == extension) {
                return true;
            }
        }

        host_in(&request.url, &self.config.database_hosts)
    }

    fn is_content_addressed(&self, request: &Request) -> bool {
        host_in(&request.url, &self.content_hosts)
    }

    fn is_navigation(&self, request: &Request) -> bool {
        let path = request.url.path();
        request.url.origin() == self.origin.origin() && (path == "/" || path.ends_with(".html"))
    }

    fn is_proxy(&self, request: &Request) -> bool {
        !self.proxy_route.is_empty() && request.url.path().contains(&self.proxy_route)
    }

    fn is_api(&self, request: &Request) -> bool {
        if host_in(&request.url, &self.config.api_hosts) {
            return true;
        }
        let path = request.url.path();
        self.config
            .api_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn is_realtime(&self, request: &Request) -> bool {
        host_in(&request.url, &self.config.realtime_hosts)
    }
}

/// Lowercase extension of the last path segment
fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, extension) = segment.rsplit_once('.')?;
    Some(extension.to_ascii_lowercase())
}

/// Whether the URL's host is one of `hosts` or a subdomain of one
fn host_in(url: &Url, hosts: &[String]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    hosts.iter().any(|candidate| {
        let candidate = candidate.to_ascii_lowercase();
        host == candidate
            || (host.len() > candidate.len()
                && host.ends_with(&candidate)
                && host.as_bytes()[host.len() - candidate.len() - 1] == b'.')
    })
}
