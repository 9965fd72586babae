//! Client identity resolution and login identifiers.
//!
//! # Trust boundary
//!
//! `X-Forwarded-For` and `X-Real-IP` are supplied by the client. They only
//! identify the caller when a trusted reverse proxy overwrites them before the
//! request reaches this process. Deploying without such a proxy lets any
//! caller pick its own identity and sidestep per-client limits. Nothing here
//! can detect that situation at runtime.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Identity used when no usable address is available.
pub const LOOPBACK_PLACEHOLDER: &str = "127.0.0.1";

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Header carrying a single client address set by some proxies.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// The parts of an inbound request needed to identify the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Raw `X-Forwarded-For` value
    #[serde(default)]
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` value
    #[serde(default)]
    pub real_ip: Option<String>,
    /// Address of the directly connected peer
    #[serde(default)]
    pub peer_addr: Option<String>,
}

impl RequestMetadata {
    /// Metadata for a request with only a peer address.
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self {
            peer_addr: Some(peer.to_string()),
            ..Self::default()
        }
    }

    /// Build metadata from header name/value pairs. Names match case-insensitively.
    pub fn from_headers<'a, I>(headers: I, peer: Option<SocketAddr>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut meta = Self {
            peer_addr: peer.map(|p| p.to_string()),
            ..Self::default()
        };
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(FORWARDED_FOR_HEADER) {
                meta.forwarded_for = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(REAL_IP_HEADER) {
                meta.real_ip = Some(value.to_string());
            }
        }
        meta
    }

    /// Resolve the client identity for this request.
    ///
    /// Sources are tried in order: first entry of `X-Forwarded-For`,
    /// `X-Real-IP`, the peer address. A source that is missing or does not
    /// parse as an address is skipped. With no usable source the result is
    /// [`LOOPBACK_PLACEHOLDER`].
    pub fn client_identity(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .and_then(parse_address);

        forwarded
            .or_else(|| self.real_ip.as_deref().and_then(parse_address))
            .or_else(|| self.peer_addr.as_deref().and_then(parse_address))
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| LOOPBACK_PLACEHOLDER.to_string())
    }
}

/// Parse a bare IP or an `ip:port` pair, discarding the port.
fn parse_address(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

/// Normalize an account reference (an email) for keying: trimmed and lower-cased.
pub fn normalize_account(account: &str) -> String {
    account.trim().to_lowercase()
}

/// Brute-force tracking key: one per (client, account) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier from a resolved client identity and a raw account reference.
    ///
    /// Clients containing a colon (IPv6) are bracketed, so the separator
    /// before the account is always unambiguous.
    pub fn new(client: &str, account: &str) -> Self {
        let account = normalize_account(account);
        if client.contains(':') {
            Self(format!("[{}]:{}", client, account))
        } else {
            Self(format!("{}:{}", client, account))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_first_entry_wins() {
        let meta = RequestMetadata {
            forwarded_for: Some(" 203.0.113.7 , 10.0.0.1".to_string()),
            real_ip: Some("198.51.100.2".to_string()),
            peer_addr: Some("10.0.0.1:5000".to_string()),
        };
        assert_eq!(meta.client_identity(), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_used_without_forwarded_for() {
        let meta = RequestMetadata {
            forwarded_for: None,
            real_ip: Some("198.51.100.2".to_string()),
            peer_addr: Some("10.0.0.1:5000".to_string()),
        };
        assert_eq!(meta.client_identity(), "198.51.100.2");
    }

    #[test]
    fn test_peer_address_drops_port() {
        let meta = RequestMetadata::from_peer("192.0.2.10:44321".parse().unwrap());
        assert_eq!(meta.client_identity(), "192.0.2.10");
    }

    #[test]
    fn test_ipv6_peer() {
        let meta = RequestMetadata::from_peer("[2001:db8::1]:443".parse().unwrap());
        assert_eq!(meta.client_identity(), "2001:db8::1");
    }

    #[test]
    fn test_missing_everything_is_loopback() {
        assert_eq!(RequestMetadata::default().client_identity(), LOOPBACK_PLACEHOLDER);
    }

    #[test]
    fn test_garbage_falls_through() {
        let meta = RequestMetadata {
            forwarded_for: Some("not-an-ip, 1.2.3.4".to_string()),
            real_ip: Some("".to_string()),
            peer_addr: Some("10.1.1.1:80".to_string()),
        };
        assert_eq!(meta.client_identity(), "10.1.1.1");

        let meta = RequestMetadata {
            forwarded_for: Some("unknown".to_string()),
            real_ip: None,
            peer_addr: None,
        };
        assert_eq!(meta.client_identity(), LOOPBACK_PLACEHOLDER);
    }

    #[test]
    fn test_from_headers_case_insensitive() {
        let headers = [("X-Forwarded-For", "1.2.3.4"), ("X-REAL-IP", "5.6.7.8")];
        let meta = RequestMetadata::from_headers(headers, None);
        assert_eq!(meta.forwarded_for.as_deref(), Some("1.2.3.4"));
        assert_eq!(meta.real_ip.as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn test_identifier_normalizes_account() {
        let a = Identifier::new("1.2.3.4", "  Bob@Example.COM ");
        let b = Identifier::new("1.2.3.4", "bob@example.com");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "1.2.3.4:bob@example.com");
        assert_ne!(a, Identifier::new("1.2.3.5", "bob@example.com"));
    }

    #[test]
    fn test_ipv6_identifier_is_bracketed() {
        let a = Identifier::new("2001:db8::", "1:x");
        let b = Identifier::new("2001:db8::1", "x");
        assert_eq!(a.as_str(), "[2001:db8::]:1:x");
        assert_eq!(b.as_str(), "[2001:db8::1]:x");
        assert_ne!(a, b);
    }
}
