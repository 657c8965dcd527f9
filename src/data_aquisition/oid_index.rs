/*!
Decoding of table indexes built from InetAddressType/InetAddress pairs (INET-ADDRESS-MIB).

In tables such as inetCidrRouteTable or ipAddressTable an address is encoded in the row OID as
`<type>.<length>.<octet>...<octet>`. The helpers here turn those components back into addresses,
so that nothing outside the SNMP layer has to know about the encoding.
*/

use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OidIndexError {
    #[error("index ended early: needed {needed} more component(s)")]
    Truncated { needed: usize },
    #[error("unsupported InetAddressType {0}")]
    UnsupportedType(u64),
    #[error("address length {length} doesn't match InetAddressType {addr_type}")]
    LengthMismatch { addr_type: u64, length: u64 },
    #[error("component {0} is not an octet")]
    NotAnOctet(u64),
}

/// InetAddressType values.
pub const INET_UNKNOWN: u64 = 0;
pub const INET_IPV4: u64 = 1;
pub const INET_IPV6: u64 = 2;
pub const INET_IPV4Z: u64 = 3;
pub const INET_IPV6Z: u64 = 4;
pub const INET_DNS: u64 = 16;

/// An address decoded from a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InetAddress {
    /// `unknown(0)` with zero length: used e.g. for the next hop of a directly connected route.
    Unspecified,
    Ip { addr: IpAddr, zone: Option<u32> },
}

impl InetAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            InetAddress::Unspecified => None,
            InetAddress::Ip { addr, .. } => Some(*addr),
        }
    }
}

impl Display for InetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InetAddress::Unspecified => write!(f, "unknown"),
            InetAddress::Ip { addr, zone: None } => write!(f, "{addr}"),
            InetAddress::Ip { addr, zone: Some(z) } => write!(f, "{addr}%{z}"),
        }
    }
}

fn take(components: &[u64], count: usize) -> Result<(&[u64], &[u64]), OidIndexError> {
    if components.len() < count {
        return Err(OidIndexError::Truncated {
            needed: count - components.len(),
        });
    }
    Ok(components.split_at(count))
}

fn octets<const N: usize>(components: &[u64]) -> Result<[u8; N], OidIndexError> {
    let mut out = [0u8; N];
    for (slot, c) in out.iter_mut().zip(components) {
        *slot = u8::try_from(*c).map_err(|_| OidIndexError::NotAnOctet(*c))?;
    }
    Ok(out)
}

fn zone(components: &[u64]) -> Result<u32, OidIndexError> {
    Ok(u32::from_be_bytes(octets::<4>(components)?))
}

/// Decode `octets` (already stripped of type and length) for the given address type.
pub fn decode_typed_octets(addr_type: u64, raw: &[u64]) -> Result<InetAddress, OidIndexError> {
    let length = raw.len() as u64;
    let mismatch = || OidIndexError::LengthMismatch { addr_type, length };
    match addr_type {
        INET_UNKNOWN if raw.is_empty() => Ok(InetAddress::Unspecified),
        INET_IPV4 if raw.len() == 4 => Ok(InetAddress::Ip {
            addr: IpAddr::V4(Ipv4Addr::from(octets::<4>(raw)?)),
            zone: None,
        }),
        INET_IPV6 if raw.len() == 16 => Ok(InetAddress::Ip {
            addr: IpAddr::V6(Ipv6Addr::from(octets::<16>(raw)?)),
            zone: None,
        }),
        INET_IPV4Z if raw.len() == 8 => Ok(InetAddress::Ip {
            addr: IpAddr::V4(Ipv4Addr::from(octets::<4>(&raw[..4])?)),
            zone: Some(zone(&raw[4..])?),
        }),
        INET_IPV6Z if raw.len() == 20 => Ok(InetAddress::Ip {
            addr: IpAddr::V6(Ipv6Addr::from(octets::<16>(&raw[..16])?)),
            zone: Some(zone(&raw[16..])?),
        }),
        INET_UNKNOWN | INET_IPV4 | INET_IPV6 | INET_IPV4Z | INET_IPV6Z => Err(mismatch()),
        other => Err(OidIndexError::UnsupportedType(other)),
    }
}

/// Decode a length-prefixed address whose type has already been read.
/// Returns the address and the number of components consumed.
pub fn decode_inet_address(addr_type: u64, components: &[u64]) -> Result<(InetAddress, usize), OidIndexError> {
    let (len, rest) = take(components, 1)?;
    let length = len[0] as usize;
    let (raw, _) = take(rest, length)?;
    Ok((decode_typed_octets(addr_type, raw)?, 1 + length))
}

/// Decode `<type>.<length>.<octets>` from the front of `components`.
/// Returns the address and the number of components consumed.
pub fn decode_typed_address(components: &[u64]) -> Result<(InetAddress, usize), OidIndexError> {
    let (ty, rest) = take(components, 1)?;
    let (addr, used) = decode_inet_address(ty[0], rest)?;
    Ok((addr, 1 + used))
}

/// Decoded index of an inetCidrRouteTable row:
/// `destType.dest.pfxLen.policy.nextHopType.nextHop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InetCidrRouteIndex {
    pub destination: InetAddress,
    pub prefix_len: u8,
    pub policy: Vec<u64>,
    pub next_hop: InetAddress,
}

pub fn decode_inet_cidr_route_index(components: &[u64]) -> Result<InetCidrRouteIndex, OidIndexError> {
    let (destination, used) = decode_typed_address(components)?;
    let rest = &components[used..];

    let (pfx, rest) = take(rest, 1)?;
    let prefix_len = u8::try_from(pfx[0]).map_err(|_| OidIndexError::NotAnOctet(pfx[0]))?;

    // The policy is an OBJECT IDENTIFIER, encoded as its length followed by its sub-identifiers.
    let (policy_len, rest) = take(rest, 1)?;
    let (policy, rest) = take(rest, policy_len[0] as usize)?;

    let (next_hop, _) = decode_typed_address(rest)?;
    Ok(InetCidrRouteIndex {
        destination,
        prefix_len,
        policy: policy.to_vec(),
        next_hop,
    })
}

/// Decoded index of an ipCidrRouteTable row: `dest(4).mask(4).tos.nextHop(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCidrRouteIndex {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub tos: u64,
    pub next_hop: Ipv4Addr,
}

pub fn decode_ip_cidr_route_index(components: &[u64]) -> Result<IpCidrRouteIndex, OidIndexError> {
    let (dest, rest) = take(components, 4)?;
    let (mask, rest) = take(rest, 4)?;
    let (tos, rest) = take(rest, 1)?;
    let (next_hop, _) = take(rest, 4)?;
    Ok(IpCidrRouteIndex {
        destination: Ipv4Addr::from(octets::<4>(dest)?),
        mask: Ipv4Addr::from(octets::<4>(mask)?),
        tos: tos[0],
        next_hop: Ipv4Addr::from(octets::<4>(next_hop)?),
    })
}

/// Index of ipAddrTable and ipRouteTable rows: a bare dotted IPv4 address.
pub fn decode_ipv4_index(components: &[u64]) -> Result<Ipv4Addr, OidIndexError> {
    let (raw, _) = take(components, 4)?;
    Ok(Ipv4Addr::from(octets::<4>(raw)?))
}
