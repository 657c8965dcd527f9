/*!
MIB knowledge: which OIDs hold system, forwarding, address and route information, and how walked
rows of those tables turn into the domain types. Everything here is pure; the SNMP client only
hands over varbinds.
*/

use std::net::IpAddr;

use tracing::debug;

use crate::{
    data_aquisition::{
        core::{DeviceValue, oid_to_string},
        oid_index::{self, InetAddress},
        snmp::{SnmpTableRow, Varbind},
    },
    network::{
        addr,
        route::{InterfaceAddress, RouteEntry, RouteProtocol},
        router::SystemInfo,
    },
};

pub const SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
pub const SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
pub const IP_FORWARDING: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 1, 0];

/// A conceptual table: the entry OID and the columns we read from it.
#[derive(Debug, Clone, Copy)]
pub struct MibTable {
    pub entry: &'static [u64],
    pub columns: &'static [u64],
}

impl MibTable {
    pub fn column_oid(&self, column: u64) -> Vec<u64> {
        let mut oid = self.entry.to_vec();
        oid.push(column);
        oid
    }
}

/// IP-MIB ipAddrTable (IPv4 only): ipAdEntAddr(1), ipAdEntNetMask(3).
pub const IP_ADDR_TABLE: MibTable = MibTable {
    entry: &[1, 3, 6, 1, 2, 1, 4, 20, 1],
    columns: &[1, 3],
};

/// IP-MIB ipAddressTable: ipAddressType(4), ipAddressPrefix(5).
pub const IP_ADDRESS_TABLE: MibTable = MibTable {
    entry: &[1, 3, 6, 1, 2, 1, 4, 34, 1],
    columns: &[4, 5],
};

/// IP-FORWARD-MIB inetCidrRouteTable: Type(8), Proto(9), Metric1(12).
pub const INET_CIDR_ROUTE_TABLE: MibTable = MibTable {
    entry: &[1, 3, 6, 1, 2, 1, 4, 24, 7, 1],
    columns: &[8, 9, 12],
};

/// IP-FORWARD-MIB ipCidrRouteTable: Type(6), Proto(7), Metric1(11).
pub const IP_CIDR_ROUTE_TABLE: MibTable = MibTable {
    entry: &[1, 3, 6, 1, 2, 1, 4, 24, 4, 1],
    columns: &[6, 7, 11],
};

/// RFC1213 ipRouteTable: Dest(1), Metric1(3), NextHop(7), Type(8), Proto(9), Mask(11).
pub const IP_ROUTE_TABLE: MibTable = MibTable {
    entry: &[1, 3, 6, 1, 2, 1, 4, 21, 1],
    columns: &[1, 3, 7, 8, 9, 11],
};

/// Route tables in the order they are tried.
pub const ROUTE_TABLES: [MibTable; 3] = [INET_CIDR_ROUTE_TABLE, IP_CIDR_ROUTE_TABLE, IP_ROUTE_TABLE];

fn value_for<'a>(varbinds: &'a [Varbind], oid: &[u64]) -> Option<&'a DeviceValue> {
    varbinds
        .iter()
        .find(|vb| vb.oid == oid)
        .map(|vb| &vb.value)
        .filter(|v| !v.is_exception())
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|s| !s.trim().is_empty())
}

pub fn system_info_from(varbinds: &[Varbind]) -> SystemInfo {
    SystemInfo {
        hostname: non_empty(value_for(varbinds, SYS_NAME).and_then(DeviceValue::as_text)),
        description: non_empty(value_for(varbinds, SYS_DESCR).and_then(DeviceValue::as_text)),
        object_id: non_empty(value_for(varbinds, SYS_OBJECT_ID).and_then(DeviceValue::as_text)),
    }
}

/// `Some(true)` for forwarding(1), `Some(false)` for notForwarding(2).
pub fn forwarding_from(varbinds: &[Varbind]) -> Option<bool> {
    match value_for(varbinds, IP_FORWARDING).and_then(DeviceValue::as_integer) {
        Some(1) => Some(true),
        Some(2) => Some(false),
        _ => None,
    }
}

fn ipv4_of(value: Option<&DeviceValue>) -> Option<IpAddr> {
    match value {
        Some(DeviceValue::IpAddress(ip)) => Some(IpAddr::V4(*ip)),
        Some(DeviceValue::OctetString(s)) => addr::canonical_ip(s).ok(),
        _ => None,
    }
}

fn metric_of(value: Option<&DeviceValue>) -> Option<u32> {
    value
        .and_then(DeviceValue::as_integer)
        .filter(|m| *m >= 0)
        .and_then(|m| u32::try_from(m).ok())
}

pub fn interfaces_from_ip_addr_table(rows: &[SnmpTableRow]) -> Vec<InterfaceAddress> {
    rows.iter()
        .filter_map(|row| {
            let address = ipv4_of(row.columns.get(&1))
                .or_else(|| oid_index::decode_ipv4_index(&row.row_index_suffix).ok().map(IpAddr::V4))?;
            let mask = ipv4_of(row.columns.get(&3))?;
            match InterfaceAddress::from_mask(address, mask) {
                Ok(iface) => Some(iface),
                Err(e) => {
                    debug!("ipAddrTable row {address}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// The prefix length of an ipAddressTable row lives at the end of the ipAddressPrefix row pointer
/// (`ipAddressPrefixOrigin.<ifIndex>.<type>.<len>.<octets>.<prefixLength>`).
fn prefix_from_row_pointer(value: Option<&DeviceValue>) -> Option<u8> {
    match value {
        Some(DeviceValue::ObjectIdentifier(pointer)) if pointer.len() > 2 => {
            pointer.last().and_then(|p| u8::try_from(*p).ok())
        }
        _ => None,
    }
}

pub fn interfaces_from_ip_address_table(rows: &[SnmpTableRow]) -> Vec<InterfaceAddress> {
    rows.iter()
        .filter_map(|row| {
            // broadcast(3) entries are not interface addresses
            if row.columns.get(&4).and_then(DeviceValue::as_integer) == Some(3) {
                return None;
            }
            let address = match oid_index::decode_typed_address(&row.row_index_suffix) {
                Ok((InetAddress::Ip { addr, .. }, _)) => addr,
                Ok((InetAddress::Unspecified, _)) => return None,
                Err(e) => {
                    debug!("ipAddressTable index {}: {e}", oid_to_string(&row.row_index_suffix));
                    return None;
                }
            };
            let prefix = prefix_from_row_pointer(row.columns.get(&5))?;
            InterfaceAddress::from_prefix(address, prefix).ok()
        })
        .collect()
}

fn protocol_for(proto: Option<i64>, next_hop: Option<IpAddr>) -> RouteProtocol {
    match proto.map(RouteProtocol::from_iana) {
        Some(RouteProtocol::Local) | Some(RouteProtocol::Other(_)) | None if next_hop.is_none() => {
            RouteProtocol::Connected
        }
        Some(RouteProtocol::Local) => RouteProtocol::Static,
        Some(p) => p,
        None => RouteProtocol::Other("unknown".to_string()),
    }
}

pub fn routes_from_inet_cidr_table(rows: &[SnmpTableRow]) -> Vec<RouteEntry> {
    rows.iter()
        .filter_map(|row| {
            // reject(2) and blackhole(5) don't lead anywhere
            if matches!(row.columns.get(&8).and_then(DeviceValue::as_integer), Some(2) | Some(5)) {
                return None;
            }
            let index = match oid_index::decode_inet_cidr_route_index(&row.row_index_suffix) {
                Ok(index) => index,
                Err(e) => {
                    debug!("inetCidrRouteTable index {}: {e}", oid_to_string(&row.row_index_suffix));
                    return None;
                }
            };
            let destination = addr::network_from_prefix(index.destination.ip()?, index.prefix_len).ok()?;
            let next_hop = index.next_hop.ip().filter(|ip| !ip.is_unspecified());
            let protocol = protocol_for(row.columns.get(&9).and_then(DeviceValue::as_integer), next_hop);
            Some(RouteEntry::new(destination, next_hop, protocol).with_distance(None, metric_of(row.columns.get(&12))))
        })
        .collect()
}

pub fn routes_from_ip_cidr_table(rows: &[SnmpTableRow]) -> Vec<RouteEntry> {
    rows.iter()
        .filter_map(|row| {
            if row.columns.get(&6).and_then(DeviceValue::as_integer) == Some(2) {
                return None;
            }
            let index = oid_index::decode_ip_cidr_route_index(&row.row_index_suffix).ok()?;
            let destination =
                addr::network_from_mask(IpAddr::V4(index.destination), IpAddr::V4(index.mask)).ok()?;
            let next_hop = Some(IpAddr::V4(index.next_hop)).filter(|ip| !ip.is_unspecified());
            let protocol = protocol_for(row.columns.get(&7).and_then(DeviceValue::as_integer), next_hop);
            Some(RouteEntry::new(destination, next_hop, protocol).with_distance(None, metric_of(row.columns.get(&11))))
        })
        .collect()
}

pub fn routes_from_ip_route_table(rows: &[SnmpTableRow]) -> Vec<RouteEntry> {
    rows.iter()
        .filter_map(|row| {
            let route_type = row.columns.get(&8).and_then(DeviceValue::as_integer);
            // invalid(2)
            if route_type == Some(2) {
                return None;
            }
            let dest = ipv4_of(row.columns.get(&1))
                .or_else(|| oid_index::decode_ipv4_index(&row.row_index_suffix).ok().map(IpAddr::V4))?;
            let mask = ipv4_of(row.columns.get(&11))?;
            let destination = addr::network_from_mask(dest, mask).ok()?;
            // direct(3) routes report the interface's own address as next hop
            let next_hop = ipv4_of(row.columns.get(&7))
                .filter(|ip| !ip.is_unspecified())
                .filter(|_| route_type != Some(3));
            let protocol = protocol_for(row.columns.get(&9).and_then(DeviceValue::as_integer), next_hop);
            Some(RouteEntry::new(destination, next_hop, protocol).with_distance(None, metric_of(row.columns.get(&3))))
        })
        .collect()
}

/// Map the rows of one of `ROUTE_TABLES` to routes.
pub fn routes_from_table(table: &MibTable, rows: &[SnmpTableRow]) -> Vec<RouteEntry> {
    if table.entry == INET_CIDR_ROUTE_TABLE.entry {
        routes_from_inet_cidr_table(rows)
    } else if table.entry == IP_CIDR_ROUTE_TABLE.entry {
        routes_from_ip_cidr_table(rows)
    } else {
        routes_from_ip_route_table(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnetwork::IpNetwork;

    use super::*;

    fn vb(oid: Vec<u64>, value: DeviceValue) -> Varbind {
        Varbind { oid, value }
    }

    fn column(table: &MibTable, col: u64, index: &[u64]) -> Vec<u64> {
        let mut oid = table.column_oid(col);
        oid.extend_from_slice(index);
        oid
    }

    #[test]
    fn reads_system_group() {
        let varbinds = vec![
            vb(SYS_DESCR.to_vec(), DeviceValue::OctetString("Cisco IOS Software, C2900 Software".into())),
            vb(SYS_OBJECT_ID.to_vec(), DeviceValue::ObjectIdentifier(vec![1, 3, 6, 1, 4, 1, 9, 1, 1208])),
            vb(SYS_NAME.to_vec(), DeviceValue::NoSuchObject),
        ];
        let info = system_info_from(&varbinds);
        assert_eq!(info.description.as_deref(), Some("Cisco IOS Software, C2900 Software"));
        assert_eq!(info.object_id.as_deref(), Some("1.3.6.1.4.1.9.1.1208"));
        assert_eq!(info.hostname, None);
    }

    #[test]
    fn reads_forwarding() {
        assert_eq!(forwarding_from(&[vb(IP_FORWARDING.to_vec(), DeviceValue::Integer(1))]), Some(true));
        assert_eq!(forwarding_from(&[vb(IP_FORWARDING.to_vec(), DeviceValue::Integer(2))]), Some(false));
        assert_eq!(forwarding_from(&[vb(IP_FORWARDING.to_vec(), DeviceValue::NoSuchInstance)]), None);
    }

    #[test]
    fn maps_ip_addr_table() {
        let index = [10, 0, 0, 1];
        let varbinds = vec![
            vb(column(&IP_ADDR_TABLE, 1, &index), DeviceValue::IpAddress(Ipv4Addr::new(10, 0, 0, 1))),
            vb(column(&IP_ADDR_TABLE, 3, &index), DeviceValue::IpAddress(Ipv4Addr::new(255, 255, 255, 0))),
            vb(column(&IP_ADDR_TABLE, 3, &[10, 0, 1, 1]), DeviceValue::IpAddress(Ipv4Addr::new(255, 255, 255, 252))),
        ];
        let rows = SnmpTableRow::group_into_rows(varbinds, IP_ADDR_TABLE.entry, 1);
        let mut ifaces = interfaces_from_ip_addr_table(&rows);
        ifaces.sort_by_key(|i| i.address);
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[0].network, "10.0.0.0/24".parse::<IpNetwork>().unwrap());
        assert_eq!(ifaces[1].network, "10.0.1.0/30".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn maps_ip_address_table_with_prefix_pointer() {
        let index = [2, 16, 0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut pointer = vec![1, 3, 6, 1, 2, 1, 4, 32, 1, 5, 2];
        pointer.extend_from_slice(&index);
        pointer.push(64);
        let varbinds = vec![
            vb(column(&IP_ADDRESS_TABLE, 4, &index), DeviceValue::Integer(1)),
            vb(column(&IP_ADDRESS_TABLE, 5, &index), DeviceValue::ObjectIdentifier(pointer)),
            vb(column(&IP_ADDRESS_TABLE, 4, &[1, 4, 10, 0, 0, 255]), DeviceValue::Integer(3)),
        ];
        let rows = SnmpTableRow::group_into_rows(varbinds, IP_ADDRESS_TABLE.entry, 1);
        let ifaces = interfaces_from_ip_address_table(&rows);
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].network, "2001:db8::/64".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn maps_inet_cidr_route_table() {
        let remote = [1, 4, 10, 1, 0, 0, 16, 2, 0, 0, 1, 4, 10, 0, 0, 2];
        let connected = [1, 4, 10, 0, 0, 0, 24, 2, 0, 0, 0, 0];
        let blackhole = [1, 4, 192, 0, 2, 0, 24, 2, 0, 0, 0, 0];
        let t = INET_CIDR_ROUTE_TABLE;
        let varbinds = vec![
            vb(column(&t, 8, &remote), DeviceValue::Integer(4)),
            vb(column(&t, 9, &remote), DeviceValue::Integer(13)),
            vb(column(&t, 12, &remote), DeviceValue::Integer(20)),
            vb(column(&t, 8, &connected), DeviceValue::Integer(3)),
            vb(column(&t, 9, &connected), DeviceValue::Integer(2)),
            vb(column(&t, 12, &connected), DeviceValue::Integer(-1)),
            vb(column(&t, 8, &blackhole), DeviceValue::Integer(5)),
        ];
        let rows = SnmpTableRow::group_into_rows(varbinds, t.entry, 1);
        let mut routes = routes_from_table(&t, &rows);
        routes.sort_by_key(|r| r.destination.to_string());
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].destination.to_string(), "10.0.0.0/24");
        assert_eq!(routes[0].protocol, RouteProtocol::Connected);
        assert_eq!(routes[0].next_hop, None);
        assert_eq!(routes[0].metric, None);
        assert_eq!(routes[1].destination.to_string(), "10.1.0.0/16");
        assert_eq!(routes[1].protocol, RouteProtocol::Ospf);
        assert_eq!(routes[1].next_hop, Some("10.0.0.2".parse().unwrap()));
        assert_eq!(routes[1].admin_distance, Some(110));
        assert_eq!(routes[1].metric, Some(20));
    }

    #[test]
    fn maps_ip_cidr_route_table() {
        let t = IP_CIDR_ROUTE_TABLE;
        let default = [0, 0, 0, 0, 0, 0, 0, 0, 0, 192, 168, 1, 1];
        let varbinds = vec![
            vb(column(&t, 6, &default), DeviceValue::Integer(4)),
            vb(column(&t, 7, &default), DeviceValue::Integer(3)),
        ];
        let rows = SnmpTableRow::group_into_rows(varbinds, t.entry, 1);
        let routes = routes_from_table(&t, &rows);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination.prefix(), 0);
        assert_eq!(routes[0].protocol, RouteProtocol::Static);
        assert_eq!(routes[0].next_hop, Some("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn maps_legacy_ip_route_table() {
        let t = IP_ROUTE_TABLE;
        let direct = [10, 0, 0, 0];
        let indirect = [172, 16, 0, 0];
        let varbinds = vec![
            vb(column(&t, 1, &direct), DeviceValue::IpAddress(Ipv4Addr::new(10, 0, 0, 0))),
            vb(column(&t, 7, &direct), DeviceValue::IpAddress(Ipv4Addr::new(10, 0, 0, 1))),
            vb(column(&t, 8, &direct), DeviceValue::Integer(3)),
            vb(column(&t, 9, &direct), DeviceValue::Integer(2)),
            vb(column(&t, 11, &direct), DeviceValue::IpAddress(Ipv4Addr::new(255, 255, 255, 0))),
            vb(column(&t, 1, &indirect), DeviceValue::IpAddress(Ipv4Addr::new(172, 16, 0, 0))),
            vb(column(&t, 3, &indirect), DeviceValue::Integer(2)),
            vb(column(&t, 7, &indirect), DeviceValue::IpAddress(Ipv4Addr::new(10, 0, 0, 9))),
            vb(column(&t, 8, &indirect), DeviceValue::Integer(4)),
            vb(column(&t, 9, &indirect), DeviceValue::Integer(8)),
            vb(column(&t, 11, &indirect), DeviceValue::IpAddress(Ipv4Addr::new(255, 240, 0, 0))),
        ];
        let rows = SnmpTableRow::group_into_rows(varbinds, t.entry, 1);
        let mut routes = routes_from_table(&t, &rows);
        routes.sort_by_key(|r| r.destination.to_string());
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].protocol, RouteProtocol::Connected);
        assert_eq!(routes[0].next_hop, None);
        assert_eq!(routes[1].destination.to_string(), "172.16.0.0/12");
        assert_eq!(routes[1].protocol, RouteProtocol::Rip);
        assert_eq!(routes[1].metric, Some(2));
    }
}
