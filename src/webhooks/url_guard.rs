//! Destination checks for merchant webhook URLs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockedUrl {
    #[error("malformed url: {0}")]
    Malformed(String),
    #[error("scheme '{0}' is not allowed")]
    Scheme(String),
    #[error("url has no host")]
    MissingHost,
    #[error("host '{0}' is internal")]
    InternalHost(String),
    #[error("non-default port {0}")]
    Port(u16),
}

const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

/// Parses `raw` and rejects anything that could reach the service's own
/// network: non-https schemes, private or loopback addresses, cloud metadata
/// endpoints and explicit ports. `allow_insecure` only keeps the parse and
/// the http/https scheme check.
pub fn validate_webhook_url(raw: &str, allow_insecure: bool) -> Result<Url, BlockedUrl> {
    let url = Url::parse(raw.trim()).map_err(|e| BlockedUrl::Malformed(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        other => return Err(BlockedUrl::Scheme(other.to_string())),
    }
    if allow_insecure {
        return Ok(url);
    }

    match url.host() {
        None => return Err(BlockedUrl::MissingHost),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain == "localhost"
                || BLOCKED_SUFFIXES.iter().any(|suffix| domain.ends_with(suffix))
            {
                return Err(BlockedUrl::InternalHost(domain));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_internal_ip(IpAddr::V4(ip)) {
                return Err(BlockedUrl::InternalHost(ip.to_string()));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_internal_ip(IpAddr::V6(ip)) {
                return Err(BlockedUrl::InternalHost(ip.to_string()));
            }
        }
    }

    // `port()` is None when the URL uses the scheme default
    if let Some(port) = url.port() {
        return Err(BlockedUrl::Port(port));
    }

    Ok(url)
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_internal_v4(v4),
            None => is_internal_v6(v6),
        },
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (64..128).contains(&b))
        || a == 0
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
}
