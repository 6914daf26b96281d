//! Host allow-list checks for the `Host` and `Origin` handshake headers.
//!
//! Pattern syntax:
//! - `*` matches any host
//! - `.example.com` matches `example.com` and every subdomain of it
//! - anything else matches exactly
//!
//! Matching is case-insensitive and ignores ports and a trailing dot.

use axum::http::HeaderMap;
use axum::http::header::{HOST, ORIGIN};
use parley_core::RelayError;
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
enum HostPattern {
    Any,
    Domain(String),
    Exact(String),
}

impl HostPattern {
    fn parse(raw: &str) -> Option<Self> {
        let pattern = raw.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return None;
        }
        Some(if pattern == "*" {
            Self::Any
        } else if let Some(domain) = pattern.strip_prefix('.') {
            Self::Domain(domain.to_string())
        } else {
            Self::Exact(pattern)
        })
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Domain(domain) => {
                host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
            Self::Exact(exact) => host == exact,
        }
    }
}

/// Compiled host allow-list.
#[derive(Clone, Debug)]
pub struct HostAllowList {
    patterns: Vec<HostPattern>,
}

impl HostAllowList {
    /// Compile patterns. Blank entries are ignored.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter_map(|p| HostPattern::parse(p.as_ref()))
                .collect(),
        }
    }

    /// Whether the list contains `*`.
    pub fn allows_any(&self) -> bool {
        self.patterns.contains(&HostPattern::Any)
    }

    /// Whether a `Host` header value (optionally with a port) is allowed.
    pub fn allows_host(&self, host: &str) -> bool {
        let domain = domain_of(host);
        !domain.is_empty() && self.patterns.iter().any(|p| p.matches(&domain))
    }

    /// Whether an `Origin` header value is allowed.
    ///
    /// A missing or opaque (`null`) origin only passes a `*` list.
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return self.allows_any();
        };
        match Url::parse(origin) {
            Ok(url) => url.host_str().is_some_and(|host| self.allows_host(host)),
            Err(_) => self.allows_any(),
        }
    }

    /// Validate handshake headers.
    ///
    /// The returned error carries the reason for the log; it is never sent
    /// to the peer.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let host = headers.get(HOST).and_then(|v| v.to_str().ok());
        match host {
            Some(host) if self.allows_host(host) => {}
            Some(host) => {
                return Err(RelayError::authorization(format!(
                    "host {host:?} not in allow-list"
                )));
            }
            None if self.allows_any() => {}
            None => return Err(RelayError::authorization("missing host header")),
        }

        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        if self.allows_origin(origin) {
            Ok(())
        } else {
            Err(RelayError::authorization(format!(
                "origin {:?} not in allow-list",
                origin.unwrap_or("<missing>")
            )))
        }
    }
}

/// Lowercased domain part of a host, without port or trailing dot.
fn domain_of(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    let domain = if host.starts_with('[') {
        // IPv6 literal: keep the brackets, drop any port after them.
        match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => return String::new(),
        }
    } else {
        match host.rsplit_once(':') {
            Some((domain, port)) if port.chars().all(|c| c.is_ascii_digit()) => domain.to_string(),
            Some(_) => return String::new(),
            None => host,
        }
    };
    domain.strip_suffix('.').map(str::to_string).unwrap_or(domain)
}
