//! Parsing helpers shared between vendor profiles: rejection detection, Linux-style route
//! tables and the usual ways devices print an interface address.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
};
use crate::parsers::{ParseError, ParseResult};

const REJECTION_MARKERS: &[&str] = &[
    "% invalid input",
    "% unknown command",
    "% incomplete command",
    "% ambiguous command",
    "% bad ip address",
    "invalid input detected",
    "syntax error",
    "unknown command",
    "bad command name",
    "command not found",
    "no such command",
    "error: ",
];

/// Reject empty output and output that is an error banner rather than a table.
pub fn precheck(output: &str) -> ParseResult<()> {
    if output.trim().is_empty() {
        return Err(ParseError::EmptyOutput);
    }
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()).take(4) {
        let lower = line.to_ascii_lowercase();
        if REJECTION_MARKERS.iter().any(|marker| lower.starts_with(marker) || lower.contains(marker)) {
            return Err(ParseError::CommandRejected(snippet(line)));
        }
    }
    Ok(())
}

/// First meaningful line of the output, shortened for error messages.
pub fn snippet(output: &str) -> String {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    line.chars().take(80).collect()
}

/// Turn a parse pass into a result: nothing recognisable in the output is an error,
/// a recognised but empty table is not.
pub fn finish<T>(items: Vec<T>, recognized: bool, output: &str) -> ParseResult<Vec<T>> {
    if items.is_empty() && !recognized {
        return Err(ParseError::Unrecognized(snippet(output)));
    }
    Ok(items)
}

/// Network written as `default`, `a.b.c.d/len`, or a bare host.
fn linux_destination(token: &str, ipv6_hint: bool) -> Option<IpNetwork> {
    if token == "default" {
        let text = if ipv6_hint { "::/0" } else { "0.0.0.0/0" };
        return addr::canonical_network(text).ok();
    }
    addr::canonical_network(token).ok()
}

fn linux_protocol(proto: Option<&str>, has_gateway: bool) -> RouteProtocol {
    match proto {
        Some("kernel") | None if !has_gateway => RouteProtocol::Connected,
        Some("kernel") | Some("boot") | Some("static") | None => RouteProtocol::Static,
        Some("dhcp") | Some("ra") => RouteProtocol::Dhcp,
        Some("zebra") | Some("bird") => RouteProtocol::Other("zebra".to_string()),
        Some(other) => RouteProtocol::from_label(other),
    }
}

/// `ip route` / `ip -6 route` output.
pub fn parse_iproute2(output: &str) -> (Vec<RouteEntry>, bool) {
    const SKIPPED_TYPES: &[&str] = &[
        "local", "broadcast", "anycast", "multicast", "blackhole", "unreachable", "prohibit", "throw", "nat",
    ];
    let mut routes = Vec::new();
    let mut recognized = false;
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = tokens.first() else {
            continue;
        };
        if !tokens.contains(&"dev") && !tokens.contains(&"via") {
            continue;
        }
        recognized = true;
        if SKIPPED_TYPES.contains(&first) {
            continue;
        }
        let value_of = |key: &str| {
            tokens
                .iter()
                .position(|t| *t == key)
                .and_then(|i| tokens.get(i + 1))
                .copied()
        };
        let next_hop = value_of("via").and_then(|v| addr::canonical_ip(v).ok());
        let ipv6_hint = next_hop.is_some_and(|nh| nh.is_ipv6()) || line.contains("inet6");
        let Some(destination) = linux_destination(first, ipv6_hint) else {
            continue;
        };
        let protocol = linux_protocol(value_of("proto"), next_hop.is_some());
        let metric = value_of("metric").and_then(|m| m.parse().ok());
        routes.push(RouteEntry::new(destination, next_hop, protocol).with_distance(None, metric));
    }
    (routes, recognized)
}

/// `route -n` and `netstat -rn`, Linux columns (`Destination Gateway Genmask Flags ...`)
/// or BSD columns (`Destination Gateway Flags Netif`).
pub fn parse_route_n(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }
        if tokens[0] == "Destination" || line.contains("routing table") || line.starts_with("Routing tables") {
            recognized = true;
            continue;
        }
        let gateway = match tokens[1] {
            "*" => None,
            g => match addr::canonical_ip(g) {
                Ok(ip) => Some(ip),
                Err(_) if g.starts_with("link#") || g.contains(':') && !g.contains('.') => None,
                Err(_) => continue,
            },
        };
        let destination = match addr::canonical_ip(tokens[2]) {
            // Linux layout: third column is the genmask
            Ok(mask) if tokens[0] != "default" => {
                let Ok(dest) = addr::canonical_ip(tokens[0]) else {
                    continue;
                };
                match addr::network_from_mask(dest, mask) {
                    Ok(network) => network,
                    Err(_) => continue,
                }
            }
            _ => match linux_destination(tokens[0], gateway.is_some_and(|g| g.is_ipv6())) {
                Some(network) => network,
                None => continue,
            },
        };
        recognized = true;
        let next_hop = gateway.filter(|g| !g.is_unspecified());
        let protocol = if next_hop.is_some() {
            RouteProtocol::Static
        } else {
            RouteProtocol::Connected
        };
        let metric = if tokens.len() >= 8 { tokens[4].parse().ok() } else { None };
        routes.push(RouteEntry::new(destination, next_hop, protocol).with_distance(None, metric));
    }
    (routes, recognized)
}

static INET_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\binet6?\s+(?:addr:\s*)?([0-9A-Fa-f.:]+)(?:%\S+)?/(\d{1,3})").unwrap()
});
static INET_NETMASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\binet\s+(?:addr:)?(\d{1,3}(?:\.\d{1,3}){3})\s.*?(?:netmask|Mask:)\s*(0x[0-9A-Fa-f]{8}|\d{1,3}(?:\.\d{1,3}){3})")
        .unwrap()
});
static CISCO_INTERNET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:Internet address is|Secondary address)\s+(\d{1,3}(?:\.\d{1,3}){3})/(\d{1,2})").unwrap()
});
static ASA_IP_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"IP address (\d{1,3}(?:\.\d{1,3}){3}), subnet mask (\d{1,3}(?:\.\d{1,3}){3})").unwrap()
});

fn hex_mask(text: &str) -> Option<IpAddr> {
    let bits = u32::from_str_radix(text.trim_start_matches("0x"), 16).ok()?;
    Some(IpAddr::V4(bits.into()))
}

fn push_unique(out: &mut Vec<InterfaceAddress>, iface: InterfaceAddress) {
    if !out.contains(&iface) {
        out.push(iface);
    }
}

/// Interface addresses in any of the common textual layouts: iproute2 and JunOS `a/len`,
/// ifconfig `netmask`/`Mask:`, IOS "Internet address is" and ASA "IP address X, subnet mask M".
pub fn parse_inet_addresses(output: &str) -> Vec<InterfaceAddress> {
    let mut out = Vec::new();
    for caps in INET_PREFIX.captures_iter(output).chain(CISCO_INTERNET_ADDRESS.captures_iter(output)) {
        let (Ok(ip), Ok(prefix)) = (addr::canonical_ip(&caps[1]), caps[2].parse::<u8>()) else {
            continue;
        };
        if let Ok(iface) = InterfaceAddress::from_prefix(ip, prefix) {
            push_unique(&mut out, iface);
        }
    }
    for caps in INET_NETMASK.captures_iter(output).chain(ASA_IP_ADDRESS.captures_iter(output)) {
        let Ok(ip) = addr::canonical_ip(&caps[1]) else {
            continue;
        };
        let mask = if caps[2].starts_with("0x") {
            hex_mask(&caps[2])
        } else {
            addr::canonical_ip(&caps[2]).ok()
        };
        if let Some(Ok(iface)) = mask.map(|m| InterfaceAddress::from_mask(ip, m)) {
            push_unique(&mut out, iface);
        }
    }
    out
}

/// Interface parsing shared by the profiles: precheck, then the textual layouts above.
pub fn interfaces_or_error(output: &str) -> ParseResult<Vec<InterfaceAddress>> {
    precheck(output)?;
    let found = parse_inet_addresses(output);
    finish(found, false, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rejections() {
        assert_eq!(precheck("  \n"), Err(ParseError::EmptyOutput));
        let rejected = precheck("show ip route\n% Invalid input detected at '^' marker.\n");
        assert!(matches!(rejected, Err(ParseError::CommandRejected(_))));
        assert!(precheck("bash: route: command not found").is_err());
        assert!(precheck("default via 10.0.0.1 dev eth0").is_ok());
    }

    #[test]
    fn parses_iproute2() {
        let output = "default via 192.168.1.1 dev eth0 proto dhcp metric 100\n\
                      10.8.0.0/16 via 192.168.1.254 dev eth0 proto static\n\
                      192.168.1.0/24 dev eth0 proto kernel scope link src 192.168.1.20\n\
                      local 192.168.1.20 dev eth0 table local proto kernel scope host src 192.168.1.20\n";
        let (routes, recognized) = parse_iproute2(output);
        assert!(recognized);
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].destination, "0.0.0.0/0".parse::<IpNetwork>().unwrap());
        assert_eq!(routes[0].protocol, RouteProtocol::Dhcp);
        assert_eq!(routes[0].metric, Some(100));
        assert_eq!(routes[1].next_hop, Some("192.168.1.254".parse().unwrap()));
        assert_eq!(routes[2].next_hop, None);
        assert_eq!(routes[2].protocol, RouteProtocol::Connected);
    }

    #[test]
    fn parses_route_n_layouts() {
        let linux = "Kernel IP routing table\n\
                     Destination     Gateway         Genmask         Flags Metric Ref    Use Iface\n\
                     0.0.0.0         10.0.0.1        0.0.0.0         UG    100    0        0 eth0\n\
                     10.0.0.0        0.0.0.0         255.255.255.0   U     0      0        0 eth0\n";
        let (routes, recognized) = parse_route_n(linux);
        assert!(recognized);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].next_hop, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(routes[0].metric, Some(100));
        assert_eq!(routes[1].destination, "10.0.0.0/24".parse::<IpNetwork>().unwrap());

        let bsd = "Routing tables\n\nInternet:\n\
                   Destination        Gateway            Flags        Netif Expire\n\
                   default            192.168.1.1        UGScg          en0\n\
                   192.168.1.0/24     link#4             UCS            en0      !\n";
        let (routes, _) = parse_route_n(bsd);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].destination.prefix(), 0);
        assert_eq!(routes[1].next_hop, None);
    }

    #[test]
    fn parses_interface_layouts() {
        let output = "2: eth0: <BROADCAST,MULTICAST,UP> mtu 1500\n\
                      inet 192.168.1.20/24 brd 192.168.1.255 scope global eth0\n\
                      inet6 fe80::1/64 scope link\n\
                      eth1: flags=4163<UP>  mtu 1500\n\
                      inet 10.1.1.1  netmask 255.255.255.252  broadcast 10.1.1.3\n\
                      em0: inet 172.16.0.1 netmask 0xffff0000 broadcast 172.16.255.255\n";
        let found = parse_inet_addresses(output);
        let networks: Vec<String> = found.iter().map(|i| i.network.to_string()).collect();
        assert!(networks.contains(&"192.168.1.0/24".to_string()));
        assert!(networks.contains(&"10.1.1.0/30".to_string()));
        assert!(networks.contains(&"172.16.0.0/16".to_string()));
        assert!(networks.contains(&"fe80::/64".to_string()));
    }

    #[test]
    fn unrecognised_output_is_an_error() {
        let res: ParseResult<Vec<RouteEntry>> = finish(Vec::new(), false, "\nhello there\n");
        assert_eq!(res, Err(ParseError::Unrecognized("hello there".to_string())));
        assert_eq!(finish::<RouteEntry>(Vec::new(), true, "x"), Ok(Vec::new()));
    }
}
