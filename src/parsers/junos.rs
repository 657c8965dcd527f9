use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
    router::SystemInfo,
};
use crate::parsers::{ParseResult, VendorProfile, common};

static TABLE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+: \d+ destinations, \d+ routes").unwrap());
static DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<dest>[0-9A-Fa-f:.]+/\d{1,3})\s+[*+\-]?\[(?P<proto>[A-Za-z0-9\-]+)/(?P<pref>\d+)\](?P<rest>.*)$")
        .unwrap()
});
static ALTERNATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+[*+\-]?\[(?P<proto>[A-Za-z0-9\-]+)/(?P<pref>\d+)\](?P<rest>.*)$").unwrap());
static NEXT_HOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*>?\s*to\s+([0-9A-Fa-f:.]+)\s+via").unwrap());
static METRIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"metric (\d+)").unwrap());
static MODEL_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Model:\s*(\S+)").unwrap());
static MODEL_DESCR: Lazy<Regex> = Lazy::new(|| Regex::new(r"Juniper Networks, Inc\.\s+(\S+)").unwrap());

fn junos_protocol(proto: &str) -> RouteProtocol {
    match proto {
        "Direct" => RouteProtocol::Connected,
        "Local" => RouteProtocol::Local,
        "Static" => RouteProtocol::Static,
        "OSPF" | "OSPF3" => RouteProtocol::Ospf,
        "BGP" => RouteProtocol::Bgp,
        "IS-IS" => RouteProtocol::IsIs,
        "RIP" | "RIPng" => RouteProtocol::Rip,
        other => RouteProtocol::Other(other.to_ascii_lowercase()),
    }
}

/// One `[Proto/pref]` block being read, with the next hops seen so far.
struct Block {
    destination: IpNetwork,
    protocol: RouteProtocol,
    preference: Option<u32>,
    metric: Option<u32>,
    hops: usize,
}

impl Block {
    fn close(self, routes: &mut Vec<RouteEntry>) {
        // blocks without a "to" line are interface routes
        if self.hops == 0 {
            routes.push(RouteEntry::new(self.destination, None, self.protocol).with_distance(self.preference, self.metric));
        }
    }
}

/// `show route`: a destination line opens a `[Proto/pref]` block, further blocks for the same
/// destination are indented, and each `to X via ifname` line is one next hop of the open block.
pub(crate) fn parse_junos_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    let mut open: Option<Block> = None;

    for line in output.lines() {
        if TABLE_HEADER.is_match(line) {
            recognized = true;
            if let Some(block) = open.take() {
                block.close(&mut routes);
            }
            continue;
        }
        let (destination, caps) = if let Some(caps) = DESTINATION.captures(line) {
            let Ok(destination) = addr::canonical_network(&caps["dest"]) else {
                continue;
            };
            (destination, caps)
        } else if let Some(caps) = ALTERNATE.captures(line) {
            let Some(destination) = open.as_ref().map(|b| b.destination) else {
                continue;
            };
            (destination, caps)
        } else {
            if let (Some(caps), Some(block)) = (NEXT_HOP.captures(line), open.as_mut()) {
                if let Ok(nh) = addr::canonical_ip(&caps[1]) {
                    block.hops += 1;
                    routes.push(
                        RouteEntry::new(block.destination, Some(nh), block.protocol.clone())
                            .with_distance(block.preference, block.metric),
                    );
                }
            }
            continue;
        };
        recognized = true;
        if let Some(block) = open.take() {
            block.close(&mut routes);
        }
        open = Some(Block {
            destination,
            protocol: junos_protocol(&caps["proto"]),
            preference: caps["pref"].parse().ok(),
            metric: METRIC.captures(&caps["rest"]).and_then(|m| m[1].parse().ok()),
            hops: 0,
        });
    }
    if let Some(block) = open {
        block.close(&mut routes);
    }
    (routes, recognized)
}

/// `show interfaces terse`: the Local column carries `address/len`; whatever follows `-->` is
/// the remote end of a point-to-point link.
fn parse_terse_interfaces(output: &str) -> Vec<InterfaceAddress> {
    let mut out = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "-->" {
                tokens.next();
                continue;
            }
            let Some((ip, len)) = token.split_once('/') else {
                continue;
            };
            let (Ok(ip), Ok(len)) = (addr::canonical_ip(ip), len.parse::<u8>()) else {
                continue;
            };
            if let Ok(iface) = InterfaceAddress::from_prefix(ip, len) {
                if !out.contains(&iface) {
                    out.push(iface);
                }
            }
        }
    }
    out
}

pub struct Junos;

impl VendorProfile for Junos {
    fn name(&self) -> &'static str {
        "junos"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn identify(&self, system: &SystemInfo) -> bool {
        let descr = system.description_lower();
        descr.contains("junos") || descr.contains("juniper") || system.object_id_str().starts_with("1.3.6.1.4.1.2636.")
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["show route | no-more", "show route"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["show interfaces terse | no-more"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("show version | no-more")
    }

    fn parse_routes(&self, output: &str, _command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let (routes, recognized) = parse_junos_routes(output);
        common::finish(routes, recognized, output)
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::precheck(output)?;
        let recognized = output.contains("Admin Link Proto");
        common::finish(parse_terse_interfaces(output), recognized, output)
    }

    fn extract_model(&self, description: &str) -> Option<String> {
        MODEL_LINE
            .captures(description)
            .or_else(|| MODEL_DESCR.captures(description))
            .map(|caps| caps[1].to_string())
    }
}
