/*!
Router classification.

A device is scored on the evidence its probe produced:

| evidence | points |
|---|---|
| ipForwarding confirmed on | +3 |
| ipForwarding confirmed off | -1 |
| two or more distinct attached subnets | +2 |
| at least one route to a subnet that isn't attached | +3 |
| router/vendor keyword in the system description | +1 |
| router vendor enterprise number in the object id | +1 |

and is a router when the score reaches `ROUTER_THRESHOLD`. The function is pure; the same input
always yields the same classification.
*/

use std::collections::HashSet;

use ipnetwork::IpNetwork;

use crate::network::{
    route::{InterfaceAddress, RouteEntry, local_networks},
    router::{Forwarding, SystemInfo},
};

pub const ROUTER_THRESHOLD: i32 = 3;

const DESCRIPTION_KEYWORDS: &[&str] = &[
    "router",
    "routing",
    "cisco",
    "juniper",
    "junos",
    "mikrotik",
    "routeros",
    "cradlepoint",
    "adaptive security appliance",
    "vyos",
    "vyatta",
    "edgeos",
    "fortigate",
    "pfsense",
    "opnsense",
    "pan-os",
    "arista",
    "huawei",
    "firewall",
    "gateway",
];

/// Enterprise arcs of router vendors, matched as prefixes of sysObjectID.
const OBJECT_ID_KEYWORDS: &[(&str, &str)] = &[
    ("1.3.6.1.4.1.9.", "cisco"),
    ("1.3.6.1.4.1.2636.", "juniper"),
    ("1.3.6.1.4.1.14988.", "mikrotik"),
    ("1.3.6.1.4.1.20992.", "cradlepoint"),
    ("1.3.6.1.4.1.12356.", "fortinet"),
    ("1.3.6.1.4.1.25461.", "paloalto"),
    ("1.3.6.1.4.1.30065.", "arista"),
    ("1.3.6.1.4.1.2011.", "huawei"),
    ("1.3.6.1.4.1.41112.", "ubiquiti"),
    ("1.3.6.1.4.1.30803.", "vyatta"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_router: bool,
    pub score: i32,
    /// Contributing factors, e.g. `ipForwarding=1, 2_networks, 1_remote_routes`.
    pub reason: String,
}

fn description_keyword(system: &SystemInfo) -> Option<&'static str> {
    let descr = system.description_lower();
    DESCRIPTION_KEYWORDS.iter().copied().find(|kw| descr.contains(kw))
}

fn object_id_keyword(system: &SystemInfo) -> Option<&'static str> {
    let oid = system.object_id_str().trim_start_matches('.').to_ascii_lowercase();
    OBJECT_ID_KEYWORDS
        .iter()
        .find(|(prefix, label)| oid.starts_with(prefix) || oid.contains(label))
        .map(|(_, label)| *label)
}

/// Destinations of routes that leave the device's own subnets. Subnets count as the device's own
/// when an interface is attached to them or the device reports them as connected/local.
pub fn remote_destinations(interfaces: &[InterfaceAddress], routes: &[RouteEntry]) -> Vec<IpNetwork> {
    let mut own: HashSet<IpNetwork> = local_networks(interfaces).into_iter().collect();
    own.extend(
        routes
            .iter()
            .filter(|r| r.protocol.is_directly_connected())
            .map(|r| r.destination),
    );
    let mut remote = Vec::new();
    for route in routes.iter().filter(|r| !r.protocol.is_directly_connected()) {
        if !own.contains(&route.destination) && !remote.contains(&route.destination) {
            remote.push(route.destination);
        }
    }
    remote
}

/// Forwarding flag as it was recorded in an earlier classification reason.
pub fn recorded_forwarding(reason: &str) -> Forwarding {
    let factors: Vec<&str> = reason.split(", ").collect();
    if factors.contains(&"ipForwarding=1") {
        Forwarding::Enabled
    } else if factors.contains(&"ipForwarding=2") {
        Forwarding::Disabled
    } else {
        Forwarding::Unknown
    }
}

pub fn classify(
    system: &SystemInfo,
    forwarding: Forwarding,
    interfaces: &[InterfaceAddress],
    routes: &[RouteEntry],
) -> Classification {
    let mut score = 0;
    let mut factors: Vec<String> = Vec::new();

    match forwarding {
        Forwarding::Enabled => {
            score += 3;
            factors.push("ipForwarding=1".to_string());
        }
        Forwarding::Disabled => {
            score -= 1;
            factors.push("ipForwarding=2".to_string());
        }
        Forwarding::Unknown => {}
    }

    let networks = local_networks(interfaces).len();
    if networks >= 2 {
        score += 2;
        factors.push(format!("{networks}_networks"));
    }

    let remote = remote_destinations(interfaces, routes).len();
    if remote >= 1 {
        score += 3;
        factors.push(format!("{remote}_remote_routes"));
    }

    if let Some(keyword) = description_keyword(system) {
        score += 1;
        factors.push(format!("descr:{keyword}"));
    }
    if let Some(keyword) = object_id_keyword(system) {
        score += 1;
        factors.push(format!("oid:{keyword}"));
    }

    let reason = if factors.is_empty() {
        "no_evidence".to_string()
    } else {
        factors.join(", ")
    };
    Classification {
        is_router: score >= ROUTER_THRESHOLD,
        score,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::route::RouteProtocol;

    fn iface(addr: &str, prefix: u8) -> InterfaceAddress {
        InterfaceAddress::from_prefix(addr.parse().unwrap(), prefix).unwrap()
    }

    fn route(dest: &str, nh: Option<&str>, protocol: RouteProtocol) -> RouteEntry {
        RouteEntry::new(dest.parse().unwrap(), nh.map(|n| n.parse().unwrap()), protocol)
    }

    #[test]
    fn forwarding_router_with_remote_route() {
        let system = SystemInfo::default();
        let interfaces = [iface("10.0.0.1", 24), iface("10.0.1.1", 24)];
        let routes = [
            route("10.0.0.0/24", None, RouteProtocol::Connected),
            route("10.0.1.0/24", None, RouteProtocol::Connected),
            route("10.9.0.0/16", Some("10.0.1.2"), RouteProtocol::Ospf),
        ];
        let c = classify(&system, Forwarding::Enabled, &interfaces, &routes);
        assert_eq!(c.score, 8);
        assert!(c.is_router);
        assert_eq!(c.reason, "ipForwarding=1, 2_networks, 1_remote_routes");
    }

    #[test]
    fn host_with_forwarding_off() {
        let system = SystemInfo {
            description: Some("Linux printer 4.19".into()),
            ..Default::default()
        };
        let c = classify(&system, Forwarding::Disabled, &[iface("10.0.0.50", 24)], &[]);
        assert_eq!(c.score, -1);
        assert!(!c.is_router);
        assert_eq!(c.reason, "ipForwarding=2");
    }

    #[test]
    fn same_subnet_twice_counts_once() {
        let interfaces = [iface("10.0.0.1", 24), iface("10.0.0.2", 24), iface("127.0.0.1", 8)];
        let c = classify(&SystemInfo::default(), Forwarding::Unknown, &interfaces, &[]);
        assert_eq!(c.score, 0);
        assert_eq!(c.reason, "no_evidence");
    }

    #[test]
    fn keywords_add_one_each() {
        let system = SystemInfo {
            hostname: Some("edge1".into()),
            description: Some("Cisco IOS Software, C2900 Software".into()),
            object_id: Some("1.3.6.1.4.1.9.1.1041".into()),
        };
        let routes = [route("0.0.0.0/0", Some("192.0.2.1"), RouteProtocol::Static)];
        let c = classify(&system, Forwarding::Unknown, &[], &routes);
        assert_eq!(c.score, 5);
        assert!(c.is_router);
        assert_eq!(c.reason, "1_remote_routes, descr:cisco, oid:cisco");
    }

    #[test]
    fn connected_routes_are_not_remote() {
        let routes = [
            route("10.0.0.0/24", None, RouteProtocol::Connected),
            route("10.0.0.1/32", None, RouteProtocol::Local),
            route("10.0.0.0/24", Some("10.0.0.254"), RouteProtocol::Static),
        ];
        assert!(remote_destinations(&[], &routes).is_empty());
    }

    #[test]
    fn forwarding_survives_in_reason() {
        let c = classify(&SystemInfo::default(), Forwarding::Disabled, &[], &[]);
        assert_eq!(recorded_forwarding(&c.reason), Forwarding::Disabled);
        assert_eq!(
            recorded_forwarding("ipForwarding=1, 2_networks"),
            Forwarding::Enabled
        );
        assert_eq!(recorded_forwarding("probe_error: no response"), Forwarding::Unknown);
    }

    #[test]
    fn deterministic() {
        let system = SystemInfo {
            description: Some("RouterOS RB4011".into()),
            ..Default::default()
        };
        let interfaces = [iface("192.168.88.1", 24)];
        let routes = [route("0.0.0.0/0", Some("192.168.88.254"), RouteProtocol::Static)];
        let first = classify(&system, Forwarding::Enabled, &interfaces, &routes);
        for _ in 0..5 {
            assert_eq!(classify(&system, Forwarding::Enabled, &interfaces, &routes), first);
        }
    }
}
