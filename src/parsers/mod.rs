/*!
Vendor strategies for CLI-based collection.

A `VendorProfile` knows which commands to run on one family of devices and how to read their
output. The `VendorRegistry` picks the profile for a device from its self-description, falling back
to a permissive generic profile, so the probe never needs to know which vendor it is talking to.
*/

use thiserror::Error;

use crate::network::{
    route::{InterfaceAddress, RouteEntry},
    router::SystemInfo,
};

pub mod cisco_asa;
pub mod cisco_ios;
pub mod common;
pub mod cradlepoint;
pub mod generic;
pub mod junos;
pub mod mikrotik;
pub mod registry;

pub use registry::VendorRegistry;

/// Output of a command could not be turned into routes or interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("command produced no output")]
    EmptyOutput,
    #[error("device rejected the command: {0}")]
    CommandRejected(String),
    #[error("unrecognised output starting with: {0}")]
    Unrecognized(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Commands and parsers for one family of devices.
pub trait VendorProfile: Send + Sync {
    /// Vendor label stored on the router row.
    fn name(&self) -> &'static str;
    /// Profiles with higher priority are asked to `identify` first.
    fn priority(&self) -> i32;
    fn identify(&self, system: &SystemInfo) -> bool;
    /// Route commands, in the order they are tried.
    fn cli_commands(&self) -> &'static [&'static str];
    /// Commands listing interface addresses, tried when SNMP gave none.
    fn interface_commands(&self) -> &'static [&'static str] {
        &[]
    }
    /// Command whose output describes the device, used when SNMP system info is missing.
    fn version_command(&self) -> Option<&'static str> {
        None
    }
    fn parse_routes(&self, output: &str, command: &str) -> ParseResult<Vec<RouteEntry>>;
    fn parse_interfaces(&self, output: &str) -> ParseResult<Vec<InterfaceAddress>>;
    fn extract_model(&self, description: &str) -> Option<String>;
}
