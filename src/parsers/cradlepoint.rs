use once_cell::sync::Lazy;
use regex::Regex;

use crate::network::{
    route::{InterfaceAddress, RouteEntry},
    router::SystemInfo,
};
use crate::parsers::{ParseResult, VendorProfile, common};

static MODEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:IBR|AER|MBR|CBA|COR|ARC|E|R|S|W|L)\d{3,4}(?:-[A-Z0-9]+)*)\b").unwrap());

/// Cradlepoint NetCloud OS. The router shell exposes Linux routing tools.
pub struct Cradlepoint;

impl VendorProfile for Cradlepoint {
    fn name(&self) -> &'static str {
        "cradlepoint"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn identify(&self, system: &SystemInfo) -> bool {
        system.description_lower().contains("cradlepoint") || system.object_id_str().starts_with("1.3.6.1.4.1.20992.")
    }

    fn cli_commands(&self) -> &'static [&'static str] {
        &["ip route", "route -n"]
    }

    fn interface_commands(&self) -> &'static [&'static str] {
        &["ip addr"]
    }

    fn version_command(&self) -> Option<&'static str> {
        Some("get status/product_info")
    }

    fn parse_routes(&self, output: &str, command: &str) -> ParseResult<Vec<RouteEntry>> {
        common::precheck(output)?;
        let (routes, recognized) = if command.starts_with("route") {
            common::parse_route_n(output)
        } else {
            common::parse_iproute2(output)
        };
        common::finish(routes, recognized, output)
    }

    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>> {
        common::interfaces_or_error(output)
    }

    fn extract_model(&self, description: &str) -> Option<String> {
        MODEL.captures(description).map(|caps| caps[1].to_string())
    }
}
