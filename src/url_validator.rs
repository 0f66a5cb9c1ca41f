//! Validation of the user-supplied sync proxy endpoint.
//!
//! The proxy is a script the user deploys themselves, so any host is
//! accepted over http or https. The endpoint must be an absolute URL.

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlValidationError {
    /// URL is malformed or cannot be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Scheme is neither http nor https
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Check if a host refers to the local machine
fn is_loopback_host(host: &Host<String>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(v4) => IpAddr::V4(*v4).is_loopback(),
        Host::Ipv6(v6) => IpAddr::V6(*v6).is_loopback(),
    }
}

/// Validate the sync proxy endpoint.
///
/// # Returns
/// * `Ok(Url)` - The parsed endpoint
/// * `Err(UrlValidationError)` - If it is malformed or not http(s)
pub fn validate_proxy_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())
        .map_err(|e| UrlValidationError::InvalidUrl(e.to_string()))?;

    let host = url
        .host()
        .map(|h| h.to_owned())
        .ok_or_else(|| UrlValidationError::InvalidUrl("No host in URL".to_string()))?;

    let scheme = url.scheme().to_string();
    match scheme.as_str() {
        "https" => Ok(url),
        "http" => {
            if !is_loopback_host(&host) {
                warn!(%host, "sync proxy uses plain http to a remote host");
            }
            Ok(url)
        }
        other => Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }
}
