use anyhow::{Result, anyhow};
use ipnet::IpNet;
use std::net::IpAddr;

/// Parses the original client IP from X-Forwarded-For header
/// Format: "client, proxy1, proxy2, ..." - returns the leftmost (original client) IP
#[must_use]
pub fn parse_original_client_ip(xff_header: &str) -> Option<String> {
    xff_header
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Parses allowlist entries, each either a single address or a CIDR network.
pub fn parse_allowlist(entries: &[String]) -> Result<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            if let Ok(ip) = entry.parse::<IpAddr>() {
                let prefix = if ip.is_ipv4() { 32 } else { 128 };
                IpNet::new(ip, prefix).map_err(|e| anyhow!("Invalid allowlist entry {entry}: {e}"))
            } else {
                entry
                    .parse::<IpNet>()
                    .map_err(|_| anyhow!("Invalid IP address or CIDR in allowed_proxy_ips: {entry}"))
            }
        })
        .collect()
}

/// Returns true if no allowlist is configured or if `peer` falls inside any entry.
#[must_use]
pub fn is_peer_allowed(peer: IpAddr, allowlist: Option<&[IpNet]>) -> bool {
    let Some(networks) = allowlist else {
        return true;
    };
    // IPv4 peers may arrive as IPv4-mapped IPv6 on dual-stack listeners.
    let peer = match peer {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(peer, IpAddr::V4),
        IpAddr::V4(_) => peer,
    };
    networks.iter().any(|net| net.contains(&peer))
}
