use std::net::IpAddr;

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
    router::SystemInfo,
};
use crate::parsers::{ParseResult, VendorProfile, common};

const IPV4: &str = r"\d{1,3}(?:\.\d{1,3}){3}";

/// A route line starts in column 0 with a one or two letter code (plus `*` and a sub-type such as
/// `E2` or `IA`), followed by the destination in CIDR, dotted-mask or classful form.
static ROUTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<code>[A-Za-z+%]{{1,2}}\*?(?:\s?(?:IA|E1|E2|N1|N2|L1|L2|ia|su|EX))?\*?)\s+(?P<dest>{IPV4})(?:/(?P<len>\d{{1,2}})|\s+(?P<mask>{IPV4}))?(?P<rest>.*)$"
    ))
    .unwrap()
});
static SUBNETTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^\s+(?P<net>{IPV4})/(?P<len>\d{{1,2}}) is subnetted")).unwrap());
static CONTINUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+\[(\d+)/(\d+)\]\s+via\s+([0-9A-Fa-f.:]+)").unwrap());
static VIA: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)/(\d+)\]\s+via\s+([0-9A-Fa-f.:]+)").unwrap());
static DISTANCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)/(\d+)\]").unwrap());

static IPV6_ROUTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<code>[A-Za-z]{1,2}\*?(?:\s?(?:IA|E1|E2|N1|N2|L1|L2|EX))?)\s+(?P<dest>[0-9A-Fa-f:]+/\d{1,3})\s+\[(?P<ad>\d+)/(?P<metric>\d+)\]")
        .unwrap()
});
static IPV6_VIA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+via\s+([^,\s]+)").unwrap());

static MODEL_PROCESSOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^cisco\s+(\S+)\s+(?:\([^)]*\)\s+)*processor").unwrap());
static MODEL_SOFTWARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Cisco IOS(?: XE)? Software(?: \[[^\]]+\])?,\s+(?:IOS-XE Software,\s+)?([A-Za-z0-9_\-]+) Software").unwrap()
});

fn ios_protocol(code: &str) -> RouteProtocol {
    let main = code.split(|c: char| c == '*' || c.is_whitespace()).next().unwrap_or_default();
    match main {
        "C" => RouteProtocol::Connected,
        "L" => RouteProtocol::Local,
        "S" | "U" | "P" => RouteProtocol::Static,
        "R" => RouteProtocol::Rip,
        "B" => RouteProtocol::Bgp,
        "D" => RouteProtocol::Eigrp,
        "O" => RouteProtocol::Ospf,
        "i" => RouteProtocol::IsIs,
        "o" => RouteProtocol::Odr,
        "l" => RouteProtocol::Lisp,
        "H" => RouteProtocol::Nhrp,
        "M" => RouteProtocol::Other("mobile".to_string()),
        "a" => RouteProtocol::Other("application".to_string()),
        other => RouteProtocol::Other(other.to_ascii_lowercase()),
    }
}

/// Classful prefix length for destinations printed without one.
fn classful_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(v4) => match v4.octets()[0] {
            0..=127 => 8,
            128..=191 => 16,
            _ => 24,
        },
        IpAddr::V6(_) => 128,
    }
}

/// Parse Cisco-style route tables. IOS prints CIDR lengths, ASA prints dotted masks; both share
/// the layout, the `[distance/metric] via` notation and ECMP continuation lines. Route codes are
/// mapped through `protocol_of`.
pub(crate) fn parse_cisco_routes(output: &str, protocol_of: fn(&str) -> RouteProtocol) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    // "172.16.0.0/24 is subnetted": classful major network and the length its subnets use
    let mut subnetted: Option<(IpNetwork, u8)> = None;
    // destination and protocol of the last route line, for continuation lines
    let mut last: Option<(IpNetwork, RouteProtocol)> = None;

    for line in output.lines() {
        if line.starts_with("Codes:") || line.starts_with("Gateway of last resort") {
            recognized = true;
            continue;
        }
        if let Some(caps) = SUBNETTED.captures(line) {
            recognized = true;
            let major = addr::canonical_ip(&caps["net"])
                .and_then(|ip| addr::network_from_prefix(ip, classful_prefix(ip)));
            subnetted = major.ok().zip(caps["len"].parse().ok());
            continue;
        }
        if let Some(caps) = CONTINUATION.captures(line) {
            if let (Some((dest, proto)), Ok(nh)) = (&last, addr::canonical_ip(&caps[3])) {
                let route = RouteEntry::new(*dest, Some(nh), proto.clone())
                    .with_distance(caps[1].parse().ok(), caps[2].parse().ok());
                routes.push(route);
            }
            continue;
        }
        let Some(caps) = ROUTE_LINE.captures(line) else {
            if !line.starts_with(char::is_whitespace) {
                last = None;
            }
            continue;
        };
        let Ok(ip) = addr::canonical_ip(&caps["dest"]) else {
            continue;
        };
        let destination = if let Some(len) = caps.name("len") {
            addr::canonical_network(&format!("{}/{}", &caps["dest"], len.as_str()))
        } else if let Some(mask) = caps.name("mask") {
            addr::canonical_network(&format!("{} {}", &caps["dest"], mask.as_str()))
        } else {
            let prefix = match subnetted {
                Some((major, len)) if major.contains(ip) => len,
                _ => classful_prefix(ip),
            };
            addr::network_from_prefix(ip, prefix)
        };
        let Ok(destination) = destination else {
            continue;
        };
        recognized = true;
        let protocol = protocol_of(&caps["code"]);
        let rest = &caps["rest"];
        last = Some((destination, protocol.clone()));

        if rest.contains("directly connected") || rest.contains("connected by VPN") {
            routes.push(RouteEntry::new(destination, None, protocol));
        } else if let Some(via) = VIA.captures(rest) {
            // "via FastEthernet0/1" names an interface
            let nh = addr::canonical_ip(&via[3]).ok();
            routes.push(
                RouteEntry::new(destination, nh, protocol)
                    .with_distance(via[1].parse().ok(), via[2].parse().ok()),
            );
        } else if rest.contains("is a summary") || rest.contains("Null0") {
            // summary and discard routes point nowhere
            last = None;
        } else if let Some(distance) = DISTANCE.captures(rest) {
            // e.g. "[1/0] via Tunnel0": no address to follow
            routes.push(
                RouteEntry::new(destination, None, protocol)
                    .with_distance(distance[1].parse().ok(), distance[2].parse().ok()),
            );
        }
        // otherwise the next hop arrives on a continuation line
    }
    (routes, recognized)
}

/// `show ipv6 route`: destination lines followed by indented `via` lines.
fn parse_ipv6_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    let mut current: Option<(IpNetwork, RouteProtocol, u32, u32)> = None;
    for line in output.lines() {
        if line.starts_with("IPv6 Routing Table") || line.starts_with("Codes:") {
            recognized = true;
            continue;
        }
        if let Some(caps) = IPV6_ROUTE_LINE.captures(line) {
            let Ok(dest) = addr::canonical_network(&caps["dest"]) else {
                current = None;
                continue;
            };
            recognized = true;
            let ad = caps["ad"].parse().unwrap_or_default();
            let metric = caps["metric"].parse().unwrap_or_default();
            current = Some((dest, ios_protocol(&caps["code"]), ad, metric));
            continue;
        }
        let (Some(caps), Some((dest, protocol, ad, metric))) = (IPV6_VIA.captures(line), &current) else {
            continue;
        };
        // "via GigabitEthernet0/0, directly connected" names an interface, not an address
        let next_hop = addr::canonical_ip(&caps[1]).ok();
        if next_hop.is_none() && line.contains("receive") {
            continue;
        }
        routes.push(RouteEntry::new(*dest, next_hop, protocol.clone()).with_distance(Some(*ad), Some(*metric)));
    }
    (routes, recognized)
}

pub struct CiscoIos;

impl VendorProfile for CiscoIos {
    fn name(&self) -> &'static str {
        "cisco_ios"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn identify(&self, system: &SystemInfo) -> bool {
        let descr = system.description_lower();
        descr.contains("cisco ios")
            || descr.contains("ios-xe")
            || descr.contains("ios xe")
            || descr.contains("cisco")
            || system.object_id_str().starts_with("1.3.6.1.4.1.9.")
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["show ip route", "show ipv6 route"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["show ip interface"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("show version")
    }

    fn parse_routes(&self, output: &str, command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let (routes, recognized) = if command.contains("ipv6") {
            parse_ipv6_routes(output)
        } else {
            parse_cisco_routes(output, ios_protocol)
        };
        common::finish(routes, recognized, output)
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::interfaces_or_error(output)
    }

    fn extract_model(&self, description: &str) -> Option<String> {
        MODEL_PROCESSOR
            .captures(description)
            .or_else(|| MODEL_SOFTWARE.captures(description))
            .map(|caps| caps[1].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::ParseError;

    const SHOW_IP_ROUTE: &str = "\
Codes: L - local, C - connected, S - static, R - RIP, M - mobile, B - BGP
       D - EIGRP, EX - EIGRP external, O - OSPF, IA - OSPF inter area
       E1 - OSPF external type 1, E2 - OSPF external type 2

Gateway of last resort is 10.0.12.2 to network 0.0.0.0

S*    0.0.0.0/0 [1/0] via 10.0.12.2
      10.0.0.0/8 is variably subnetted, 5 subnets, 3 masks
C        10.0.12.0/30 is directly connected, GigabitEthernet0/0
L        10.0.12.1/32 is directly connected, GigabitEthernet0/0
O        10.0.34.0/30 [110/2] via 10.0.12.2, 00:10:01, GigabitEthernet0/0
D EX     10.5.0.0/16
           [170/2816] via 10.0.12.2, 00:01:00, GigabitEthernet0/0
O E2     10.9.0.0/16 [110/20] via 10.0.12.2, 00:00:10, GigabitEthernet0/0
                     [110/20] via 10.0.13.2, 00:00:10, GigabitEthernet0/1
      172.16.0.0/24 is subnetted, 2 subnets
C        172.16.1.0 is directly connected, Vlan10
B        172.16.2.0 [20/0] via 192.0.2.9, 1d02h
";

    #[test]
    fn parses_show_ip_route() {
        let routes = CiscoIos.parse_routes(SHOW_IP_ROUTE, "show ip route").unwrap();
        assert_eq!(routes.len(), 9);

        let default = &routes[0];
        assert_eq!(default.destination.prefix(), 0);
        assert_eq!(default.protocol, RouteProtocol::Static);
        assert_eq!(default.next_hop, Some("10.0.12.2".parse().unwrap()));
        assert_eq!(default.admin_distance, Some(1));

        assert_eq!(routes[1].protocol, RouteProtocol::Connected);
        assert_eq!(routes[1].next_hop, None);
        assert_eq!(routes[2].protocol, RouteProtocol::Local);

        assert_eq!(routes[3].protocol, RouteProtocol::Ospf);
        assert_eq!(routes[3].metric, Some(2));

        // wrapped line
        assert_eq!(routes[4].destination, "10.5.0.0/16".parse::<IpNetwork>().unwrap());
        assert_eq!(routes[4].protocol, RouteProtocol::Eigrp);
        assert_eq!(routes[4].admin_distance, Some(170));

        // ECMP continuation
        assert_eq!(routes[5].next_hop, Some("10.0.12.2".parse().unwrap()));
        assert_eq!(routes[6].destination, routes[5].destination);
        assert_eq!(routes[6].next_hop, Some("10.0.13.2".parse().unwrap()));

        // prefix length taken from the "is subnetted" header
        assert_eq!(routes[7].destination, "172.16.1.0/24".parse::<IpNetwork>().unwrap());
        assert_eq!(routes[8].protocol, RouteProtocol::Bgp);
    }

    #[test]
    fn parses_show_ipv6_route() {
        let output = "\
IPv6 Routing Table - default - 4 entries
Codes: C - Connected, L - Local, S - Static
C   2001:DB8:1::/64 [0/0]
     via GigabitEthernet0/0, directly connected
L   2001:DB8:1::1/128 [0/0]
     via GigabitEthernet0/0, receive
O   2001:DB8:2::/64 [110/2]
     via FE80::2, GigabitEthernet0/0
S   ::/0 [1/0]
     via 2001:DB8:1::FE
";
        let routes = CiscoIos.parse_routes(output, "show ipv6 route").unwrap();
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].next_hop, None);
        assert_eq!(routes[1].next_hop, Some("fe80::2".parse().unwrap()));
        assert_eq!(routes[2].destination.prefix(), 0);
        assert_eq!(routes[2].next_hop, Some("2001:db8:1::fe".parse().unwrap()));
    }

    #[test]
    fn rejected_and_garbage_output() {
        let rejected = CiscoIos.parse_routes("% Invalid input detected at '^' marker.", "show ip route");
        assert!(matches!(rejected, Err(ParseError::CommandRejected(_))));
        let garbage = CiscoIos.parse_routes("Welcome to the jungle", "show ip route");
        assert!(matches!(garbage, Err(ParseError::Unrecognized(_))));
        assert_eq!(CiscoIos.parse_routes("", "show ip route"), Err(ParseError::EmptyOutput));
    }

    #[test]
    fn parses_show_ip_interface() {
        let output = "\
GigabitEthernet0/0 is up, line protocol is up
  Internet address is 10.0.12.1/30
  Broadcast address is 255.255.255.255
GigabitEthernet0/1 is up, line protocol is up
  Internet address is 10.0.13.1/30
  Secondary address 192.168.50.1/24
Loopback0 is up, line protocol is up
  Internet address is 1.1.1.1/32
";
        let ifaces = CiscoIos.parse_interfaces(output).unwrap();
        assert_eq!(ifaces.len(), 4);
        assert_eq!(ifaces[0].network, "10.0.12.0/30".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn identifies_and_extracts_model() {
        let system = SystemInfo {
            description: Some("Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M), Version 15.2(4)M3".into()),
            ..Default::default()
        };
        assert!(CiscoIos.identify(&system));
        assert_eq!(CiscoIos.extract_model(system.description.as_deref().unwrap()).as_deref(), Some("C2900"));

        let version = "Cisco IOS XE Software, Version 17.06.01a\ncisco ISR4331/K9 (1RU) processor with 1795999K/6147K bytes of memory.\n";
        assert_eq!(CiscoIos.extract_model(version).as_deref(), Some("ISR4331/K9"));

        let juniper = SystemInfo {
            description: Some("Juniper Networks, Inc. mx480".into()),
            object_id: Some("1.3.6.1.4.1.2636.1.1.1.2.25".into()),
            ..Default::default()
        };
        assert!(!CiscoIos.identify(&juniper));
    }
}
