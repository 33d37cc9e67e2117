//! URL validation and size-bounded downloads for catalog sources
//!
//! The host check is a static inspection of the URL literal. It does not
//! resolve DNS, so a public hostname that resolves to a private address at
//! request time is not caught here.

use dockyard_common::{Error, Result};
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, info};

/// Default download ceiling (50 MiB)
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

const MAX_REDIRECTS: usize = 10;

/// Which URLs may be fetched
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlPolicy {
    /// Skip the loopback/private host checks (LAN catalogs, tests)
    pub allow_private_hosts: bool,
}

impl UrlPolicy {
    /// Parse and check a URL against the policy
    pub fn validate(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url).map_err(|e| Error::UnsafeUrl(format!("{}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::UnsafeUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::UnsafeUrl(format!("{} has no host", url)))?;

        if !self.allow_private_hosts && is_internal_host(host) {
            return Err(Error::UnsafeUrl(format!(
                "host '{}' points at a local or private network",
                host
            )));
        }

        Ok(parsed)
    }

    /// Decide whether to follow redirect number `hop` (counting from 1)
    pub fn check_redirect(&self, url: &str, hop: usize) -> Result<Url> {
        if hop > MAX_REDIRECTS {
            return Err(Error::Network(format!(
                "too many redirects (more than {})",
                MAX_REDIRECTS
            )));
        }
        self.validate(url)
    }
}

fn is_internal_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    match literal.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_internal_v4(v4),
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.to_ipv4_mapped().is_some_and(is_internal_v4)
        }
        Err(_) => false,
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    // 0.0.0.0/8, 127/8, 10/8, 172.16/12, 192.168/16
    ip.octets()[0] == 0 || ip.is_loopback() || ip.is_private()
}

/// HTTP client that enforces the URL policy and a download ceiling
#[derive(Clone)]
pub struct SafeFetcher {
    client: reqwest::Client,
    policy: UrlPolicy,
    max_bytes: u64,
}

impl SafeFetcher {
    /// Create a fetcher; redirect targets are checked with the same policy
    pub fn new(policy: UrlPolicy, max_bytes: u64, timeout: Duration) -> Result<Self> {
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            // `previous` holds every URL requested so far in the chain
            let hop = attempt.previous().len();
            match policy.check_redirect(attempt.url().as_str(), hop) {
                Ok(_) => attempt.follow(),
                Err(e) => attempt.error(e.to_string()),
            }
        });

        let client = reqwest::Client::builder()
            .redirect(redirect)
            .timeout(timeout)
            .user_agent(concat!("dockyard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy,
            max_bytes,
        })
    }

    /// Check a URL without fetching it
    pub fn validate(&self, url: &str) -> Result<Url> {
        self.policy.validate(url)
    }

    /// Download a URL using the configured ceiling
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_with_limit(url, self.max_bytes).await
    }

    /// Download a URL, failing as soon as more than `max_bytes` arrive
    pub async fn fetch_with_limit(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>> {
        let parsed = self.validate(url)?;

        debug!("Fetching {}", parsed);

        let mut response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", parsed, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "Failed to fetch {}: HTTP {}",
                parsed, status
            )));
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(Error::SizeLimitExceeded { limit: max_bytes });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", parsed, e)))?
        {
            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(Error::SizeLimitExceeded { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        info!("Fetched {} bytes from {}", body.len(), parsed);
        Ok(body)
    }

    /// Download and parse a JSON document
    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        let body = self.fetch(url).await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::CatalogParse(format!("Invalid JSON from {}: {}", url, e)))
    }
}
