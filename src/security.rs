use anyhow::{Result, anyhow};
use ipnet::IpNet;
use std::net::IpAddr;

/// Parses the original client IP from an X-Forwarded-For header.
/// Format: "client, proxy1, proxy2, ..." - returns the leftmost entry.
/// The relay usually sits behind an edge platform, so the TCP peer address
/// is the edge, not the client.
#[must_use]
pub fn parse_original_client_ip(xff_header: &str) -> Option<String> {
    xff_header
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Checks whether the connecting proxy IP is on the configured allowlist.
/// Returns true when no allowlist is configured (allow all) or the IP
/// matches an entry (plain address or CIDR subnet).
pub fn is_proxy_ip_allowed(proxy_ip: IpAddr, allowed_ips: Option<&Vec<String>>) -> Result<bool> {
    let Some(allowed_list) = allowed_ips else {
        return Ok(true); // No restrictions configured
    };

    for allowed_entry in allowed_list {
        if let Ok(allowed_ip) = allowed_entry.parse::<IpAddr>() {
            if proxy_ip == allowed_ip {
                return Ok(true);
            }
        } else if let Ok(allowed_net) = allowed_entry.parse::<IpNet>() {
            if allowed_net.contains(&proxy_ip) {
                return Ok(true);
            }
        } else {
            return Err(anyhow!(
                "Invalid IP address or CIDR in allowed_proxy_ips: {}",
                allowed_entry
            ));
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xff_returns_leftmost_ip() {
        assert_eq!(
            parse_original_client_ip("203.0.113.7, 172.16.0.1"),
            Some("203.0.113.7".to_string())
        );
        assert_eq!(parse_original_client_ip(""), None);
        assert_eq!(parse_original_client_ip(" , 1.2.3.4"), None);
    }

    #[test]
    fn allowlist_matches_plain_and_cidr() {
        let list = vec!["192.0.2.1".to_string(), "10.0.0.0/8".to_string()];
        assert!(is_proxy_ip_allowed("192.0.2.1".parse().unwrap(), Some(&list)).unwrap());
        assert!(is_proxy_ip_allowed("10.42.0.9".parse().unwrap(), Some(&list)).unwrap());
        assert!(!is_proxy_ip_allowed("203.0.113.1".parse().unwrap(), Some(&list)).unwrap());
        assert!(is_proxy_ip_allowed("203.0.113.1".parse().unwrap(), None).unwrap());
    }

    #[test]
    fn invalid_allowlist_entry_is_an_error() {
        let list = vec!["not-an-ip".to_string()];
        assert!(is_proxy_ip_allowed("192.0.2.1".parse().unwrap(), Some(&list)).is_err());
    }
}
