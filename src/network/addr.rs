/*!
Address canonicalisation.

Every address or network that is compared, stored or enqueued goes through this module first,
so that `10.0.0.01`, `::ffff:10.0.0.1` and `10.0.0.1` all end up as the same `IpAddr`.
*/

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid netmask: {0}")]
    InvalidMask(String),
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

/// Parse a textual address into its canonical form.
///
/// Accepts dotted quads with leading zeros (`010.000.000.001`), IPv6 with an optional zone
/// suffix (`fe80::1%eth0`) and IPv4-mapped IPv6, which is folded back to IPv4.
pub fn canonical_ip(text: &str) -> Result<IpAddr, AddrError> {
    let trimmed = text.trim();
    let without_zone = trimmed.split('%').next().unwrap_or(trimmed);
    if without_zone.is_empty() {
        return Err(AddrError::InvalidAddress(text.to_string()));
    }

    if without_zone.contains(':') {
        let v6: Ipv6Addr = without_zone
            .parse()
            .map_err(|_| AddrError::InvalidAddress(text.to_string()))?;
        return Ok(fold_mapped(IpAddr::V6(v6)));
    }

    let octets: Vec<&str> = without_zone.split('.').collect();
    if octets.len() != 4 {
        return Err(AddrError::InvalidAddress(text.to_string()));
    }
    let mut bytes = [0u8; 4];
    for (slot, octet) in bytes.iter_mut().zip(octets) {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddrError::InvalidAddress(text.to_string()));
        }
        *slot = octet
            .parse::<u8>()
            .map_err(|_| AddrError::InvalidAddress(text.to_string()))?;
    }
    Ok(IpAddr::V4(Ipv4Addr::from(bytes)))
}

/// IPv4-mapped IPv6 addresses describe the same host as their IPv4 counterpart.
pub fn fold_mapped(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Convert a netmask (dotted or IPv6 form) to a prefix length.
pub fn mask_to_prefix(mask: IpAddr) -> Result<u8, AddrError> {
    ipnetwork::ip_mask_to_prefix(mask).map_err(|_| AddrError::InvalidMask(mask.to_string()))
}

/// Netmask for a prefix length in the given family.
pub fn prefix_to_mask(prefix: u8, ipv6: bool) -> Result<IpAddr, AddrError> {
    if ipv6 {
        Ipv6Network::new(Ipv6Addr::UNSPECIFIED, prefix)
            .map(|n| IpAddr::V6(n.mask()))
            .map_err(|_| AddrError::InvalidMask(format!("/{prefix}")))
    } else {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, prefix)
            .map(|n| IpAddr::V4(n.mask()))
            .map_err(|_| AddrError::InvalidMask(format!("/{prefix}")))
    }
}

/// Build the canonical network (host bits cleared) containing `ip` with the given prefix length.
pub fn network_from_prefix(ip: IpAddr, prefix: u8) -> Result<IpNetwork, AddrError> {
    let ip = fold_mapped(ip);
    let with_host = IpNetwork::new(ip, prefix)
        .map_err(|_| AddrError::InvalidNetwork(format!("{ip}/{prefix}")))?;
    IpNetwork::new(with_host.network(), prefix)
        .map_err(|_| AddrError::InvalidNetwork(format!("{ip}/{prefix}")))
}

/// Build the canonical network containing `ip` under `mask`.
pub fn network_from_mask(ip: IpAddr, mask: IpAddr) -> Result<IpNetwork, AddrError> {
    if ip.is_ipv4() != mask.is_ipv4() {
        return Err(AddrError::InvalidNetwork(format!("{ip} {mask}")));
    }
    network_from_prefix(ip, mask_to_prefix(mask)?)
}

/// Parse `a.b.c.d/len`, `a.b.c.d/m.m.m.m`, `a.b.c.d m.m.m.m` or a bare host address
/// (treated as a host route) into a canonical network.
pub fn canonical_network(text: &str) -> Result<IpNetwork, AddrError> {
    let trimmed = text.trim();
    let (addr_part, mask_part) = match trimmed.split_once('/') {
        Some((a, m)) => (a, Some(m)),
        None => match trimmed.split_once(char::is_whitespace) {
            Some((a, m)) => (a, Some(m.trim())),
            None => (trimmed, None),
        },
    };
    let ip = canonical_ip(addr_part).map_err(|_| AddrError::InvalidNetwork(text.to_string()))?;

    match mask_part {
        None => network_from_prefix(ip, if ip.is_ipv4() { 32 } else { 128 }),
        Some(m) if m.bytes().all(|b| b.is_ascii_digit()) && !m.is_empty() => {
            let prefix = m
                .parse::<u8>()
                .map_err(|_| AddrError::InvalidNetwork(text.to_string()))?;
            network_from_prefix(ip, prefix)
        }
        Some(m) => {
            let mask = canonical_ip(m).map_err(|_| AddrError::InvalidMask(m.to_string()))?;
            network_from_mask(ip, mask)
        }
    }
}

/// True when `inner` lies completely within `outer` (equal networks included).
pub fn network_contains(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && outer.prefix() <= inner.prefix()
        && outer.contains(inner.network())
}

/// A next hop worth crawling: a unicast, routable address that isn't the unspecified,
/// loopback, link-local, multicast or broadcast address.
pub fn is_crawlable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_unspecified() || v6.is_loopback() || v6.is_multicast() || link_local)
        }
    }
}
