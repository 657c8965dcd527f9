use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
    router::SystemInfo,
};
use crate::parsers::{ParseResult, VendorProfile, cisco_ios::parse_cisco_routes, common};

static ASA_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\basav?\d*\b").unwrap());
static MODEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(asa\s?\d{4}(?:-[a-z0-9]+)*|asav\d*|firepower\s\d{4}[a-z0-9\-]*)\b").unwrap()
});
static HARDWARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Hardware:\s+([^,\s]+)").unwrap());

/// `remote ident (addr/mask/prot/port): (172.30.0.0/255.255.0.0/0/0)`
static REMOTE_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"remote ident \(addr/mask/prot/port\):\s*\(([0-9A-Fa-f.:]+)/([0-9A-Fa-f.:]+)/").unwrap()
});
static CURRENT_PEER: Lazy<Regex> = Lazy::new(|| Regex::new(r"current_peer:\s*([0-9A-Fa-f.:]+)").unwrap());
static NAT_DESTINATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Destination - Origin:\s*([0-9A-Fa-f.:]+/\d{1,3})").unwrap());

fn asa_protocol(code: &str) -> RouteProtocol {
    let main = code.split(|c: char| c == '*' || c.is_whitespace()).next().unwrap_or_default();
    match main {
        "C" => RouteProtocol::Connected,
        "L" => RouteProtocol::Local,
        "S" | "U" | "P" | "SI" => RouteProtocol::Static,
        "R" => RouteProtocol::Rip,
        "B" => RouteProtocol::Bgp,
        "D" => RouteProtocol::Eigrp,
        "O" => RouteProtocol::Ospf,
        "i" => RouteProtocol::IsIs,
        "o" => RouteProtocol::Odr,
        "V" => RouteProtocol::Vpn,
        "M" => RouteProtocol::Other("mobile".to_string()),
        other => RouteProtocol::Other(other.to_ascii_lowercase()),
    }
}

/// `show crypto ipsec sa`: every security association names the protected remote subnet and,
/// further down, the peer it is reached through.
fn parse_crypto_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let mut routes = Vec::new();
    let mut recognized = false;
    let mut pending: Option<ipnetwork::IpNetwork> = None;
    for line in output.lines() {
        if line.trim_start().starts_with("interface:")
            || line.contains("Crypto map tag")
            || line.contains("There are no ipsec sas")
        {
            recognized = true;
        }
        if let Some(caps) = REMOTE_IDENT.captures(line) {
            recognized = true;
            if let Some(unpaired) = pending.take() {
                routes.push(RouteEntry::new(unpaired, None, RouteProtocol::Vpn));
            }
            pending = addr::canonical_network(&format!("{} {}", &caps[1], &caps[2])).ok();
        } else if let Some(caps) = CURRENT_PEER.captures(line) {
            if let Some(remote) = pending.take() {
                let peer = addr::canonical_ip(&caps[1]).ok();
                routes.push(RouteEntry::new(remote, peer, RouteProtocol::Vpn));
            }
        }
    }
    if let Some(unpaired) = pending {
        routes.push(RouteEntry::new(unpaired, None, RouteProtocol::Vpn));
    }
    (routes, recognized)
}

/// `show nat detail`: destination subnets of twice-NAT rules are reachable through the firewall.
fn parse_nat_routes(output: &str) -> (Vec<RouteEntry>, bool) {
    let recognized = output.contains("NAT Policies") || output.contains("translate_hits");
    let routes = NAT_DESTINATION
        .captures_iter(output)
        .filter_map(|caps| addr::canonical_network(&caps[1]).ok())
        .map(|network| RouteEntry::new(network, None, RouteProtocol::Nat))
        .collect();
    (routes, recognized)
}

pub struct CiscoAsa;

impl VendorProfile for CiscoAsa {
    fn name(&self) -> &'static str {
        "cisco_asa"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn identify(&self, system: &SystemInfo) -> bool {
        let descr = system.description_lower();
        if descr.contains("adaptive security appliance") || descr.contains("firepower") {
            return true;
        }
        let enterprise_cisco = system.object_id_str().starts_with("1.3.6.1.4.1.9.1.");
        ASA_TOKEN.is_match(&descr) && (enterprise_cisco || descr.contains("cisco") || system.object_id.is_none())
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["show route", "show crypto ipsec sa", "show nat detail"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["show interface"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("show version")
    }

    fn parse_routes(&self, output: &str, command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let (routes, recognized) = if command.contains("crypto") {
            parse_crypto_routes(output)
        } else if command.contains("nat") {
            parse_nat_routes(output)
        } else {
            parse_cisco_routes(output, asa_protocol)
        };
        common::finish(routes, recognized, output)
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::interfaces_or_error(output)
    }

    fn extract_model(&self, description: &str) -> Option<String> {
        HARDWARE
            .captures(description)
            .or_else(|| MODEL.captures(description))
            .map(|caps| caps[1].to_string())
    }
}
