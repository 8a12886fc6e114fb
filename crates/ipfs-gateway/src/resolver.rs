//! # Gateway Resolver
//!
//! Turns a CID into fetchable URLs. The resolver is pure: it performs no I/O,
//! keeps no retry state and never caches. Retry state belongs to the consumer
//! (see [`crate::FallbackSource`]).

use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use crate::config::{Gateway, GatewayConfig, join_cid};
use crate::GatewayError;

#[derive(Debug, Clone)]
pub struct GatewayResolver {
    config: Arc<GatewayConfig>,
    primary: usize,
}

impl GatewayResolver {
    /// Create a resolver over a validated gateway configuration
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let primary = config
            .gateways
            .iter()
            .position(|g| g.name == config.primary)
            .ok_or_else(|| {
                GatewayError::InvalidConfig(format!("unknown primary gateway '{}'", config.primary))
            })?;

        Ok(Self {
            config: Arc::new(config),
            primary,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The preferred gateway
    pub fn primary(&self) -> &Gateway {
        &self.config.gateways[self.primary]
    }

    /// All gateways in static priority order
    pub fn list_gateways(&self) -> &[Gateway] {
        &self.config.gateways
    }

    /// Uniformly random gateway, for naive load distribution in debug paths
    pub fn pick_random_gateway(&self) -> &Gateway {
        let gateways = &self.config.gateways;
        let index = rand::rng().random_range(0..gateways.len());
        &gateways[index]
    }

    /// Build a single URL for `cid`.
    ///
    /// Returns an empty string for an empty CID so optional media slots can
    /// pass through whatever they were given. `use_proxy` wins over
    /// `preferred_gateway`.
    pub fn build_url(&self, cid: &str, preferred_gateway: Option<&str>, use_proxy: bool) -> String {
        let cid = cid.trim();
        if cid.is_empty() {
            return String::new();
        }

        if use_proxy {
            return self.proxy_url(cid);
        }

        match preferred_gateway.map(str::trim).filter(|g| !g.is_empty()) {
            Some(base) => join_cid(base, cid),
            None => self.primary().url_for(cid),
        }
    }

    /// Same-origin proxy URL for `cid`
    pub fn proxy_url(&self, cid: &str) -> String {
        let cid = cid.trim();
        if cid.is_empty() {
            return String::new();
        }
        join_cid(&self.config.proxy_base(), cid)
    }

    /// Build up to `max_count` distinct candidate URLs for `cid`.
    ///
    /// The primary gateway comes first, then the remaining gateways in
    /// configuration order. When `include_proxy_last` is set the proxy URL
    /// takes the final slot, so the list never exceeds `max_count` entries.
    pub fn build_url_list(
        &self,
        cid: &str,
        max_count: usize,
        include_proxy_last: bool,
    ) -> Vec<String> {
        self.candidates(cid, None, max_count, include_proxy_last)
    }

    /// Like [`Self::build_url_list`], with a caller-chosen gateway base first
    pub fn build_preferred_url_list(
        &self,
        cid: &str,
        preferred_gateway: &str,
        max_count: usize,
        include_proxy_last: bool,
    ) -> Vec<String> {
        self.candidates(cid, Some(preferred_gateway), max_count, include_proxy_last)
    }

    fn candidates(
        &self,
        cid: &str,
        preferred: Option<&str>,
        max_count: usize,
        include_proxy_last: bool,
    ) -> Vec<String> {
        let cid = cid.trim();
        if cid.is_empty() || max_count == 0 {
            return Vec::new();
        }

        let gateway_slots = if include_proxy_last {
            max_count - 1
        } else {
            max_count
        };

        let others = self
            .config
            .gateways
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.primary)
            .map(|(_, g)| g.base_url.as_str());

        let bases = preferred
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .into_iter()
            .chain(std::iter::once(self.primary().base_url.as_str()))
            .chain(others);

        let mut urls: Vec<String> = Vec::with_capacity(max_count);
        for base in bases {
            if urls.len() >= gateway_slots {
                break;
            }
            let url = join_cid(base, cid);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }

        if include_proxy_last {
            let proxy = self.proxy_url(cid);
            if !urls.contains(&proxy) {
                urls.push(proxy);
            }
        }

        trace!(cid = cid, count = urls.len(), "Built candidate URL list");
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    const CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    fn resolver() -> GatewayResolver {
        GatewayResolver::new(GatewayConfig::default()).unwrap()
    }

    #[test]
    fn test_build_url_uses_primary_by_default() {
        let url = resolver().build_url(CID, None, false);
        assert_eq!(url, format!("https://gateway.pinata.cloud/ipfs/{CID}"));
    }

    #[test]
    fn test_build_url_with_preferred_gateway() {
        let url = resolver().build_url(CID, Some("https://w3s.link/ipfs/"), false);
        assert_eq!(url, format!("https://w3s.link/ipfs/{CID}"));
    }

    #[test]
    fn test_build_url_proxy_overrides_preferred() {
        let resolver = resolver();
        let url = resolver.build_url(CID, Some("https://w3s.link/ipfs"), true);
        assert_eq!(url, format!("/api/ipfs/{CID}"));
        assert_eq!(url, resolver.build_url(CID, None, true));
    }

    #[test]
    fn test_build_url_empty_cid_returns_empty_string() {
        let resolver = resolver();
        assert_eq!(resolver.build_url("", None, false), "");
        assert_eq!(resolver.build_url("   ", Some("https://ipfs.io/ipfs"), true), "");
        assert!(resolver.build_url_list("", 5, true).is_empty());
    }

    #[test]
    fn test_malformed_cid_still_produces_url() {
        let url = resolver().build_url("not a cid/..", None, false);
        assert!(url.ends_with("/not a cid/.."));
    }

    #[test]
    fn test_every_url_ends_with_cid() {
        let resolver = resolver();
        for cid in [CID, "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG", "bafyExample123"] {
            assert!(resolver.build_url(cid, None, false).ends_with(&format!("/{cid}")));
            assert!(resolver.build_url(cid, None, true).ends_with(&format!("/{cid}")));
            for url in resolver.build_url_list(cid, 10, true) {
                assert!(!url.is_empty());
                assert!(url.ends_with(&format!("/{cid}")));
            }
        }
    }

    #[test]
    fn test_url_list_bounds_order_and_distinctness() {
        let resolver = resolver();
        let gateway_count = resolver.list_gateways().len();

        for max in 0..=gateway_count + 3 {
            let urls = resolver.build_url_list(CID, max, false);
            assert!(urls.len() <= max);
            assert_eq!(urls.len(), max.min(gateway_count));

            let unique: HashSet<_> = urls.iter().collect();
            assert_eq!(unique.len(), urls.len(), "entries must be distinct");

            let expected: Vec<String> = resolver
                .list_gateways()
                .iter()
                .take(max)
                .map(|g| g.url_for(CID))
                .collect();
            assert_eq!(urls, expected, "static priority order");
        }
    }

    #[test]
    fn test_url_list_with_proxy_last() {
        let resolver = resolver();
        let urls = resolver.build_url_list(CID, 4, true);
        assert_eq!(urls.len(), 4);
        assert_eq!(urls.last().unwrap(), &resolver.proxy_url(CID));
        assert_eq!(urls[0], resolver.primary().url_for(CID));

        let all = resolver.build_url_list(CID, 100, true);
        assert_eq!(all.len(), resolver.list_gateways().len() + 1);
        assert_eq!(all.last().unwrap(), &format!("/api/ipfs/{CID}"));

        let only_proxy = resolver.build_url_list(CID, 1, true);
        assert_eq!(only_proxy, vec![resolver.proxy_url(CID)]);
    }

    #[test]
    fn test_primary_comes_first_when_not_listed_first() {
        let config = GatewayConfig {
            primary: "dweb".to_string(),
            ..Default::default()
        };
        let resolver = GatewayResolver::new(config).unwrap();
        let urls = resolver.build_url_list(CID, 3, false);
        assert_eq!(urls[0], format!("https://dweb.link/ipfs/{CID}"));
        assert_eq!(urls[1], format!("https://gateway.pinata.cloud/ipfs/{CID}"));
        assert_eq!(urls[2], format!("https://ipfs.io/ipfs/{CID}"));
    }

    #[test]
    fn test_preferred_list_deduplicates_known_gateway() {
        let resolver = resolver();
        let urls = resolver.build_preferred_url_list(CID, "https://ipfs.io/ipfs", 3, false);
        assert_eq!(
            urls,
            vec![
                format!("https://ipfs.io/ipfs/{CID}"),
                format!("https://gateway.pinata.cloud/ipfs/{CID}"),
                format!("https://dweb.link/ipfs/{CID}"),
            ]
        );
    }

    #[test]
    fn test_proxy_url_uses_app_origin() {
        let config = GatewayConfig {
            app_origin: Some("https://tunes.example".to_string()),
            ..Default::default()
        };
        let resolver = GatewayResolver::new(config).unwrap();
        assert_eq!(
            resolver.build_url(CID, None, true),
            format!("https://tunes.example/api/ipfs/{CID}")
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = resolver();
        assert_eq!(
            resolver.build_url(CID, None, false),
            resolver.build_url(CID, None, false)
        );
        assert_eq!(
            resolver.build_url_list(CID, 5, true),
            resolver.build_url_list(CID, 5, true)
        );
    }

    #[test]
    fn test_pick_random_gateway_is_roughly_uniform() {
        let resolver = resolver();
        let gateway_count = resolver.list_gateways().len();
        let trials = 14_000;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..trials {
            *counts.entry(resolver.pick_random_gateway().name.as_str()).or_default() += 1;
        }

        assert_eq!(counts.len(), gateway_count, "every gateway gets picked");
        let expected = trials / gateway_count;
        for (name, count) in counts {
            // 2000 expected per gateway; 30% tolerance is many standard deviations wide
            assert!(
                count > expected * 7 / 10 && count < expected * 13 / 10,
                "gateway {name} picked {count} times, expected about {expected}"
            );
        }
    }
}
