use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    addr,
    route::{InterfaceAddress, RouteEntry, RouteProtocol},
    router::SystemInfo,
};
use crate::parsers::{
    ParseError, ParseResult, VendorProfile, cisco_ios::parse_cisco_routes, common, junos::parse_junos_routes,
};

/// Last resort: any line carrying a prefix followed later by `via <address>` or `gateway <address>`.
static PERMISSIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<dest>[0-9A-Fa-f:.]+/\d{1,3}).*?\b(?:via|gateway|gw|next-?hop)[\s:=]+(?P<nh>[0-9A-Fa-f:.]+)").unwrap()
});

/// Best-effort profile for devices nobody claimed.
pub struct Generic;

type RouteParser = fn(&str) -> (Vec<RouteEntry>, bool);

fn ios_style(output: &str) -> (Vec<RouteEntry>, bool) {
    parse_cisco_routes(output, |code| match code.chars().next() {
        Some('C') => RouteProtocol::Connected,
        Some('L') => RouteProtocol::Local,
        Some('S') => RouteProtocol::Static,
        Some('O') => RouteProtocol::Ospf,
        Some('B') => RouteProtocol::Bgp,
        Some('D') => RouteProtocol::Eigrp,
        Some('R') => RouteProtocol::Rip,
        Some('i') => RouteProtocol::IsIs,
        _ => RouteProtocol::Other(code.trim().to_ascii_lowercase()),
    })
}

fn permissive(output: &str) -> (Vec<RouteEntry>, bool) {
    let routes: Vec<RouteEntry> = output
        .lines()
        .filter_map(|line| PERMISSIVE.captures(line))
        .filter_map(|caps| {
            let destination = addr::canonical_network(&caps["dest"]).ok()?;
            let next_hop = addr::canonical_ip(&caps["nh"]).ok()?;
            Some(RouteEntry::new(destination, Some(next_hop), RouteProtocol::Other("unknown".to_string())))
        })
        .collect();
    let recognized = !routes.is_empty();
    (routes, recognized)
}

impl Generic {
    /// Parsers to try, best guess for the command first. Re-running a parser that already came
    /// up empty is harmless.
    fn parsers_for(command: &str) -> Vec<RouteParser> {
        let mut order: Vec<RouteParser> = match command {
            c if c.starts_with("show ip route") => vec![ios_style as RouteParser],
            c if c.starts_with("show route") => vec![parse_junos_routes as RouteParser, ios_style],
            c if c.starts_with("ip route") => vec![common::parse_iproute2 as RouteParser],
            c if c.starts_with("route") || c.starts_with("netstat") => vec![common::parse_route_n as RouteParser],
            _ => Vec::new(),
        };
        order.extend([ios_style as RouteParser, common::parse_iproute2, common::parse_route_n, permissive]);
        order
    }
}

impl VendorProfile for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn identify(&self, _system: &SystemInfo) -> bool {
        true
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["show ip route", "show route", "ip route", "route -n", "netstat -rn"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["show ip interface", "ip addr", "ifconfig"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("show version")
    }

    fn parse_routes(&self, output: &str, command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let mut recognized_empty = false;
        for parser in Self::parsers_for(command) {
            let (routes, recognized) = parser(output);
            if !routes.is_empty() {
                return Ok(routes);
            }
            recognized_empty |= recognized;
        }
        if recognized_empty {
            return Ok(Vec::new());
        }
        Err(ParseError::Unrecognized(common::snippet(output)))
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::interfaces_or_error(output)
    }

    fn extract_model(&self, _description: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_through_parsers() {
        let ios = "C        10.0.0.0/24 is directly connected, Ethernet0\nS        10.9.0.0/16 [1/0] via 10.0.0.9\n";
        let routes = Generic.parse_routes(ios, "show ip route").unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].next_hop, Some("10.0.0.9".parse().unwrap()));

        // wrong guess from the command, right answer from a later parser
        let linux = "default via 10.0.0.1 dev eth0\n10.0.0.0/24 dev eth0 proto kernel scope link\n";
        let routes = Generic.parse_routes(linux, "show ip route").unwrap();
        assert_eq!(routes.len(), 2);

        let odd = "route 10.44.0.0/16 nexthop 10.0.0.44 (active)\n";
        let routes = Generic.parse_routes(odd, "show route").unwrap();
        assert_eq!(routes[0].next_hop, Some("10.0.0.44".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        let res = Generic.parse_routes("Press any key to continue", "show ip route");
        assert!(matches!(res, Err(ParseError::Unrecognized(_))));
        assert!(Generic.identify(&SystemInfo::default()));
        assert!(Generic.extract_model("anything").is_none());
    }
}
