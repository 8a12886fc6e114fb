//! # Cache Types
//!
//! Keys, metadata and partition naming shared by every storage backend.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{Request, Response};

/// Traffic-class scoped partition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// App shell, written at install and by navigations
    Static,
    /// Everything else that is cacheable
    Dynamic,
    /// Immutable content-addressed responses
    Ipfs,
    /// API reads
    Api,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 4] = [
        PartitionKind::Static,
        PartitionKind::Dynamic,
        PartitionKind::Ipfs,
        PartitionKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Dynamic => "dynamic",
            PartitionKind::Ipfs => "ipfs",
            PartitionKind::Api => "api",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartitionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown partition kind '{s}'"))
    }
}

/// The four partition names of one cache version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    prefix: String,
    version: String,
}

impl PartitionSet {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `{prefix}-{kind}-{version}`
    pub fn name(&self, kind: PartitionKind) -> String {
        format!("{}-{}-{}", self.prefix, kind, self.version)
    }

    pub fn names(&self) -> Vec<String> {
        PartitionKind::ALL.iter().map(|kind| self.name(*kind)).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        PartitionKind::ALL.iter().any(|kind| self.name(*kind) == name)
    }
}

/// Cache key for identifying stored responses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    /// Absolute URL without fragment
    pub url: String,
}

impl CacheKey {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let url = match url.split_once('#') {
            Some((without_fragment, _)) => without_fragment.to_string(),
            None => url,
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            url,
        }
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.as_str(), request.url.as_str())
    }

    /// Convert to a filename-safe string
    pub fn to_filename(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());

        let hash = hasher.finalize();
        format!("{hash:x}")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Metadata stored next to a cached response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub key: CacheKey,
    pub cached_at: DateTime<Utc>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// URL the response was served from
    pub url: String,
    pub content_type: String,
    pub size: u64,
}

impl CacheMetadata {
    pub fn from_response(key: CacheKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            key,
            cached_at: Utc::now(),
            status: response.status.as_u16(),
            headers,
            url: response.url.clone(),
            content_type: response.content_type().to_string(),
            size: response.body.len() as u64,
        }
    }

    /// Rebuild the response from its stored body
    pub fn to_response(&self, body: Bytes) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        Response {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body,
            url: self.url.clone(),
        }
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// A type representing the result of a cache lookup operation
pub type CacheLookupResult = CacheResult<Option<(Bytes, CacheMetadata)>>;
