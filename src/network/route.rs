use std::{fmt::Display, net::IpAddr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::network::addr::{self, AddrError};

/// Source of a route as reported by the device. The SNMP numbering follows IANAipRouteProtocol,
/// the CLI parsers map each vendor's route codes onto the same set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteProtocol {
    Connected,
    Local,
    Static,
    Rip,
    Ospf,
    IsIs,
    Bgp,
    Eigrp,
    Igrp,
    Odr,
    Lisp,
    Nhrp,
    Vpn,
    Nat,
    Dhcp,
    Other(String),
}

impl RouteProtocol {
    pub fn label(&self) -> &str {
        match self {
            RouteProtocol::Connected => "connected",
            RouteProtocol::Local => "local",
            RouteProtocol::Static => "static",
            RouteProtocol::Rip => "rip",
            RouteProtocol::Ospf => "ospf",
            RouteProtocol::IsIs => "isis",
            RouteProtocol::Bgp => "bgp",
            RouteProtocol::Eigrp => "eigrp",
            RouteProtocol::Igrp => "igrp",
            RouteProtocol::Odr => "odr",
            RouteProtocol::Lisp => "lisp",
            RouteProtocol::Nhrp => "nhrp",
            RouteProtocol::Vpn => "vpn",
            RouteProtocol::Nat => "nat",
            RouteProtocol::Dhcp => "dhcp",
            RouteProtocol::Other(s) => s.as_str(),
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "connected" | "direct" => RouteProtocol::Connected,
            "local" => RouteProtocol::Local,
            "static" | "netmgmt" => RouteProtocol::Static,
            "rip" => RouteProtocol::Rip,
            "ospf" => RouteProtocol::Ospf,
            "isis" | "is-is" => RouteProtocol::IsIs,
            "bgp" => RouteProtocol::Bgp,
            "eigrp" => RouteProtocol::Eigrp,
            "igrp" => RouteProtocol::Igrp,
            "odr" => RouteProtocol::Odr,
            "lisp" => RouteProtocol::Lisp,
            "nhrp" => RouteProtocol::Nhrp,
            "vpn" => RouteProtocol::Vpn,
            "nat" => RouteProtocol::Nat,
            "dhcp" => RouteProtocol::Dhcp,
            other => RouteProtocol::Other(other.to_string()),
        }
    }

    /// IANAipRouteProtocol value as found in ipCidrRouteProto / inetCidrRouteProto.
    pub fn from_iana(value: i64) -> Self {
        match value {
            2 => RouteProtocol::Local,
            3 => RouteProtocol::Static,
            8 => RouteProtocol::Rip,
            9 => RouteProtocol::IsIs,
            11 => RouteProtocol::Igrp,
            13 => RouteProtocol::Ospf,
            14 => RouteProtocol::Bgp,
            16 => RouteProtocol::Eigrp,
            other => RouteProtocol::Other(format!("proto{other}")),
        }
    }

    /// Conventional administrative distance, used when the source doesn't report one.
    pub fn default_admin_distance(&self) -> Option<u32> {
        match self {
            RouteProtocol::Connected | RouteProtocol::Local => Some(0),
            RouteProtocol::Static | RouteProtocol::Vpn => Some(1),
            RouteProtocol::Bgp => Some(20),
            RouteProtocol::Eigrp => Some(90),
            RouteProtocol::Igrp => Some(100),
            RouteProtocol::Ospf => Some(110),
            RouteProtocol::IsIs => Some(115),
            RouteProtocol::Rip => Some(120),
            RouteProtocol::Odr => Some(160),
            _ => None,
        }
    }

    pub fn is_directly_connected(&self) -> bool {
        matches!(self, RouteProtocol::Connected | RouteProtocol::Local)
    }
}

impl Display for RouteProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One entry of a device routing table, already canonicalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: IpNetwork,
    pub next_hop: Option<IpAddr>,
    pub protocol: RouteProtocol,
    pub admin_distance: Option<u32>,
    pub metric: Option<u32>,
}

impl RouteEntry {
    pub fn new(destination: IpNetwork, next_hop: Option<IpAddr>, protocol: RouteProtocol) -> Self {
        let admin_distance = protocol.default_admin_distance();
        Self {
            destination,
            next_hop: next_hop.map(addr::fold_mapped).filter(|nh| !nh.is_unspecified()),
            protocol,
            admin_distance,
            metric: None,
        }
    }

    pub fn with_distance(mut self, admin_distance: Option<u32>, metric: Option<u32>) -> Self {
        if admin_distance.is_some() {
            self.admin_distance = admin_distance;
        }
        self.metric = metric;
        self
    }

    /// Netmask form of the destination prefix.
    pub fn netmask(&self) -> IpAddr {
        self.destination.mask()
    }

    /// Key used to de-duplicate entries reported more than once.
    pub fn dedup_key(&self) -> (IpNetwork, Option<IpAddr>) {
        (self.destination, self.next_hop)
    }
}

/// Remove entries sharing destination and next hop, keeping the first occurrence.
pub fn dedup_routes(routes: Vec<RouteEntry>) -> Vec<RouteEntry> {
    let mut seen = std::collections::HashSet::new();
    routes
        .into_iter()
        .filter(|route| seen.insert(route.dedup_key()))
        .collect()
}

/// An address configured on one of the device's interfaces, together with the subnet it attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub network: IpNetwork,
}

impl InterfaceAddress {
    pub fn from_mask(address: IpAddr, netmask: IpAddr) -> Result<Self, AddrError> {
        Ok(Self {
            address: addr::fold_mapped(address),
            network: addr::network_from_mask(address, netmask)?,
        })
    }

    pub fn from_prefix(address: IpAddr, prefix: u8) -> Result<Self, AddrError> {
        Ok(Self {
            address: addr::fold_mapped(address),
            network: addr::network_from_prefix(address, prefix)?,
        })
    }

    pub fn netmask(&self) -> IpAddr {
        self.network.mask()
    }

    /// Loopback, unspecified and link-local addresses don't attach the device to any shared
    /// subnet: every link carries the same link-local prefix.
    pub fn is_attachment(&self) -> bool {
        let link_local = match self.address {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        };
        !(self.address.is_loopback() || self.address.is_unspecified() || link_local)
    }
}

/// Distinct subnets the device is attached to, in first-seen order.
pub fn local_networks(interfaces: &[InterfaceAddress]) -> Vec<IpNetwork> {
    let mut out: Vec<IpNetwork> = Vec::new();
    for iface in interfaces.iter().filter(|i| i.is_attachment()) {
        if !out.contains(&iface.network) {
            out.push(iface.network);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_network_uses_mask_not_address() {
        let a = InterfaceAddress::from_mask("10.0.0.1".parse().unwrap(), "255.255.255.0".parse().unwrap()).unwrap();
        let b = InterfaceAddress::from_mask("10.0.0.2".parse().unwrap(), "255.255.255.0".parse().unwrap()).unwrap();
        let c = InterfaceAddress::from_prefix("10.0.1.1".parse().unwrap(), 24).unwrap();
        let lo = InterfaceAddress::from_prefix("127.0.0.1".parse().unwrap(), 8).unwrap();
        let ll = InterfaceAddress::from_prefix("fe80::1".parse().unwrap(), 64).unwrap();
        let nets = local_networks(&[a, b, c, lo, ll]);
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0], "10.0.0.0/24".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn unspecified_next_hop_means_connected() {
        let route = RouteEntry::new(
            "10.0.0.0/24".parse().unwrap(),
            Some("0.0.0.0".parse().unwrap()),
            RouteProtocol::Connected,
        );
        assert_eq!(route.next_hop, None);
        assert_eq!(route.admin_distance, Some(0));
        assert_eq!(route.netmask(), "255.255.255.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn dedup_keeps_first() {
        let dest: IpNetwork = "10.9.0.0/16".parse().unwrap();
        let nh: IpAddr = "10.0.0.9".parse().unwrap();
        let routes = vec![
            RouteEntry::new(dest, Some(nh), RouteProtocol::Ospf),
            RouteEntry::new(dest, Some(nh), RouteProtocol::Static),
            RouteEntry::new(dest, None, RouteProtocol::Static),
        ];
        let out = dedup_routes(routes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].protocol, RouteProtocol::Ospf);
    }

    #[test]
    fn protocol_labels_round_trip() {
        for proto in [RouteProtocol::Connected, RouteProtocol::Ospf, RouteProtocol::Vpn, RouteProtocol::Nat] {
            assert_eq!(RouteProtocol::from_label(proto.label()), proto);
        }
        assert_eq!(RouteProtocol::from_iana(13), RouteProtocol::Ospf);
        assert_eq!(RouteProtocol::from_iana(99).label(), "proto99");
    }
}
