//! URL validation for configured service endpoints.
//!
//! Credentials travel with every request to these URLs, so plaintext
//! schemes are only accepted for loopback hosts (local mocks and tunnels).

use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be {expected}, got: {actual}")]
    SchemeNotAllowed {
        expected: &'static str,
        actual: String,
    },

    #[error("URL must have a host")]
    MissingHost,

    #[error("Plaintext {0} is only allowed for loopback hosts")]
    InsecureRemoteHost(String),
}

/// Whether `host` names the local machine.
pub fn is_loopback_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => IpAddr::V4(*ip).is_loopback(),
        Host::Ipv6(ip) => IpAddr::V6(*ip).is_loopback(),
    }
}

fn validate_scheme(
    raw: &str,
    secure: &'static str,
    plain: &'static str,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;
    let host = url.host().ok_or(UrlValidationError::MissingHost)?;

    match url.scheme() {
        s if s == secure => Ok(url),
        s if s == plain => {
            if is_loopback_host(&host) {
                Ok(url)
            } else {
                Err(UrlValidationError::InsecureRemoteHost(plain.to_string()))
            }
        }
        other => Err(UrlValidationError::SchemeNotAllowed {
            expected: secure,
            actual: other.to_string(),
        }),
    }
}

/// Validate a recognize endpoint: `wss://`, or `ws://` on loopback.
pub fn validate_endpoint_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_scheme(url, "wss", "ws")
}

/// Validate a token service URL: `https://`, or `http://` on loopback.
pub fn validate_token_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_scheme(url, "https", "http")
}
