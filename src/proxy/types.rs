//! Proxy data model (§3).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    Unknown,
}

/// Identity key for a proxy: `host:port`. Used as the map key everywhere the
/// runtime pool and the refresh pipeline need to dedup or look up a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyId {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub timeout_seconds: f64,
    pub anonymity: Anonymity,
    pub exit_ip: String,
    pub ip_check_passed: bool,
    pub verified_at: DateTime<Utc>,
}

impl Proxy {
    pub fn id(&self) -> ProxyId {
        ProxyId { host: self.host.clone(), port: self.port }
    }

    /// `protocol://host:port`, the line format of the plain-text mirror (§6).
    pub fn to_uri_line(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// `http://host:port`, the form the Fetcher contract (§6) accepts.
    pub fn to_proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Invariant check from §3/§8: Transparent proxies and same-/24 exit IPs
    /// never enter the published pool.
    pub fn is_publishable(&self, local_egress_ip: Ipv4Addr) -> bool {
        if matches!(self.anonymity, Anonymity::Transparent) {
            return false;
        }
        match Ipv4Addr::from_str(&self.exit_ip) {
            Ok(exit_ip) => !same_slash_24(exit_ip, local_egress_ip),
            Err(_) => true,
        }
    }
}

/// Returns true iff `a` and `b` share the same /24 network.
pub fn same_slash_24(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    let a = u32::from(a) & 0xFFFF_FF00;
    let b = u32::from(b) & 0xFFFF_FF00;
    a == b
}

/// A candidate scraped by the refresh pipeline's `Scrape` stage, before
/// liveness/anonymity/subnet/quality filtering (§4.2.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
}

impl ProxyCandidate {
    pub fn id(&self) -> ProxyId {
        ProxyId { host: self.host.clone(), port: self.port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_24_detects_shared_subnet() {
        let a = Ipv4Addr::new(203, 0, 113, 5);
        let b = Ipv4Addr::new(203, 0, 113, 250);
        let c = Ipv4Addr::new(203, 0, 114, 5);
        assert!(same_slash_24(a, b));
        assert!(!same_slash_24(a, c));
    }

    #[test]
    fn transparent_proxy_never_publishable() {
        let proxy = Proxy {
            host: "1.2.3.4".into(),
            port: 8080,
            protocol: ProxyProtocol::Http,
            timeout_seconds: 1.0,
            anonymity: Anonymity::Transparent,
            exit_ip: "8.8.8.8".into(),
            ip_check_passed: true,
            verified_at: Utc::now(),
        };
        assert!(!proxy.is_publishable(Ipv4Addr::new(1, 1, 1, 1)));
    }

    #[test]
    fn same_subnet_exit_ip_rejected() {
        let proxy = Proxy {
            host: "1.2.3.4".into(),
            port: 8080,
            protocol: ProxyProtocol::Http,
            timeout_seconds: 1.0,
            anonymity: Anonymity::Elite,
            exit_ip: "10.0.0.99".into(),
            ip_check_passed: true,
            verified_at: Utc::now(),
        };
        assert!(!proxy.is_publishable(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(proxy.is_publishable(Ipv4Addr::new(192, 168, 1, 1)));
    }
}
