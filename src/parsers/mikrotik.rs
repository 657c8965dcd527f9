use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
    router::SystemInfo,
};
use crate::parsers::{ParseResult, VendorProfile, common};

static MODEL_BOARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)board-name:\s*(\S.*?)\s*$").unwrap());
static MODEL_DESCR: Lazy<Regex> = Lazy::new(|| Regex::new(r"RouterOS\s+(\S+)").unwrap());

/// Route type from the flag column. RouterOS 6 prints `C`/`S`, RouterOS 7 prints `c`/`s`;
/// `X` (disabled) and the blackhole/unreachable/prohibit types don't forward anywhere.
fn flags_protocol(flags: &str) -> Option<RouteProtocol> {
    if flags.contains(['X', 'B', 'U', 'P']) {
        return None;
    }
    let protocol = flags.chars().find_map(|c| match c {
        'C' | 'c' => Some(RouteProtocol::Connected),
        'S' | 's' => Some(RouteProtocol::Static),
        'o' => Some(RouteProtocol::Ospf),
        'b' => Some(RouteProtocol::Bgp),
        'r' => Some(RouteProtocol::Rip),
        'd' => Some(RouteProtocol::Dhcp),
        'v' => Some(RouteProtocol::Vpn),
        'm' => Some(RouteProtocol::Other("mme".to_string())),
        _ => None,
    });
    Some(protocol.unwrap_or(RouteProtocol::Static))
}

/// Gateways are printed as an address, `address%interface`, or a bare interface name.
fn gateway_address(gateway: &str) -> Option<std::net::IpAddr> {
    addr::canonical_ip(gateway).ok()
}

fn route_from(flags: &str, dst: &str, gateway: Option<&str>, distance: Option<&str>) -> Option<RouteEntry> {
    let protocol = flags_protocol(flags)?;
    let destination = addr::canonical_network(dst).ok()?;
    let next_hop = if protocol.is_directly_connected() {
        None
    } else {
        gateway.and_then(gateway_address)
    };
    let distance = distance.and_then(|d| d.parse().ok());
    Some(RouteEntry::new(destination, next_hop, protocol).with_distance(distance, None))
}

/// `/ip route print terse`: `index flags key=value ...` per line.
fn parse_terse_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    for line in output.lines().filter(|l| l.contains("dst-address=")) {
        recognized = true;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let flags: String = tokens
            .iter()
            .take_while(|t| !t.contains('='))
            .filter(|t| !t.bytes().all(|b| b.is_ascii_digit()))
            .copied()
            .collect();
        let values: HashMap<&str, &str> = tokens.iter().filter_map(|t| t.split_once('=')).collect();
        let Some(dst) = values.get("dst-address") else {
            continue;
        };
        // RouterOS 7 drops the `gateway=` of connected routes but keeps `immediate-gw=`
        let gateway = values.get("gateway").or_else(|| values.get("immediate-gw")).copied();
        if let Some(route) = route_from(&flags, dst, gateway, values.get("distance").copied()) {
            routes.push(route);
        }
    }
    (routes, recognized)
}

/// `/ip route print`: `index flags DST-ADDRESS [PREF-SRC] GATEWAY DISTANCE` columns.
/// RouterOS 7 omits the index on dynamic routes.
fn parse_tabular_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    for line in output.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("Flags:") || trimmed.starts_with("Columns:") || trimmed.starts_with('#') {
            recognized = true;
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(dst_pos) = tokens.iter().position(|t| t.contains('/') && addr::canonical_network(t).is_ok()) else {
            continue;
        };
        recognized = true;
        let flags: String = tokens[..dst_pos]
            .iter()
            .filter(|t| !t.bytes().all(|b| b.is_ascii_digit()))
            .copied()
            .collect();
        let mut rest = &tokens[dst_pos + 1..];
        let distance = match rest.last() {
            Some(last) if last.bytes().all(|b| b.is_ascii_digit()) => {
                rest = &rest[..rest.len() - 1];
                Some(*last)
            }
            _ => None,
        };
        if let Some(route) = route_from(&flags, tokens[dst_pos], rest.last().copied(), distance) {
            routes.push(route);
        }
    }
    (routes, recognized)
}

/// `/ip address print terse`: `address=a.b.c.d/len`; tabular output has the same value first.
fn parse_addresses(output: &str) -> Vec<InterfaceAddress> {
    let mut out = Vec::new();
    for line in output.lines() {
        let token = line
            .split_whitespace()
            .map(|t| t.strip_prefix("address=").unwrap_or(t))
            .find(|t| t.contains('/') && !t.contains('='));
        let Some((ip, len)) = token.and_then(|t| t.split_once('/')) else {
            continue;
        };
        let (Ok(ip), Ok(len)) = (addr::canonical_ip(ip), len.parse::<u8>()) else {
            continue;
        };
        if flags_disabled(line) {
            continue;
        }
        if let Ok(iface) = InterfaceAddress::from_prefix(ip, len) {
            out.push(iface);
        }
    }
    out
}

fn flags_disabled(line: &str) -> bool {
    line.split_whitespace()
        .take_while(|t| !t.contains('=') && !t.contains('/'))
        .any(|t| !t.bytes().all(|b| b.is_ascii_digit()) && t.contains('X'))
}

pub struct Mikrotik;

impl VendorProfile for Mikrotik {
    fn name(&self) -> &'static str {
        "mikrotik"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn identify(&self, system: &SystemInfo) -> bool {
        let descr = system.description_lower();
        descr.contains("routeros") || descr.contains("mikrotik") || system.object_id_str().starts_with("1.3.6.1.4.1.14988.")
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["/ip route print terse without-paging", "/ip route print without-paging"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["/ip address print terse without-paging"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("/system resource print without-paging")
    }

    fn parse_routes(&self, output: &str, _command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let (routes, recognized) = if output.contains("dst-address=") {
            parse_terse_routes(output)
        } else {
            parse_tabular_routes(output)
        };
        common::finish(routes, recognized, output)
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::precheck(output)?;
        common::finish(parse_addresses(output), false, output)
    }

    fn extract_model(&self, description: &str) -> Option<String> {
        MODEL_BOARD
            .captures(description)
            .or_else(|| MODEL_DESCR.captures(description))
            .map(|caps| caps[1].to_string())
    }
}
