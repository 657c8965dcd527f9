use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snmp2::Value;

use crate::{
    data_aquisition::{snmp::SnmpClientError, ssh::SshError},
    network::{
        route::{InterfaceAddress, RouteEntry},
        router::SystemInfo,
    },
};

/// SNMP protocol version used to reach a device. Only community-based versions are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

impl SnmpVersion {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Some(SnmpVersion::V1),
            "2" | "2c" | "v2" | "v2c" => Some(SnmpVersion::V2c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnmpVersion::V1 => "1",
            SnmpVersion::V2c => "2c",
        }
    }
}

/// Where and how to send SNMP requests for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpTarget {
    pub address: IpAddr,
    pub community: String,
    pub version: SnmpVersion,
}

/// One username/password pair to try against a device CLI.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliCredential {
    pub username: String,
    pub password: String,
}

impl CliCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse `user:password`.
    pub fn parse(text: &str) -> Option<Self> {
        let (user, pass) = text.split_once(':')?;
        if user.is_empty() {
            return None;
        }
        Some(Self::new(user, pass))
    }
}

// Passwords never end up in logs.
impl std::fmt::Debug for CliCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

/// Replacement for the snmp2::Value type due to lifetime shenanigans
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceValue {
    Integer(i64),
    IpAddress(Ipv4Addr),
    /// Printable octet strings are kept as text, anything else is hex encoded
    OctetString(String),
    ObjectIdentifier(Vec<u64>),
    Counter32(u32),
    Counter64(u64),
    Timeticks(u32),
    Boolean(bool),
    Unsigned32(u32),
    EndOfMibView,
    NoSuchObject,
    NoSuchInstance,
    Unknown,
}

impl DeviceValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DeviceValue::Integer(i) => Some(*i),
            DeviceValue::Counter32(c) | DeviceValue::Unsigned32(c) | DeviceValue::Timeticks(c) => {
                Some(i64::from(*c))
            }
            DeviceValue::Counter64(c) => i64::try_from(*c).ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            DeviceValue::OctetString(s) => Some(s.clone()),
            DeviceValue::ObjectIdentifier(oid) => Some(oid_to_string(oid)),
            DeviceValue::IpAddress(ip) => Some(ip.to_string()),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            DeviceValue::EndOfMibView | DeviceValue::NoSuchObject | DeviceValue::NoSuchInstance
        )
    }
}

impl From<&Value<'_>> for DeviceValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Integer(i) => DeviceValue::Integer(*i),
            Value::IpAddress(ip) => DeviceValue::IpAddress(Ipv4Addr::from(*ip)),
            Value::OctetString(s) => DeviceValue::OctetString(octets_to_text(s)),
            Value::ObjectIdentifier(oid) => match oid.iter() {
                Some(components) => DeviceValue::ObjectIdentifier(components.collect()),
                None => DeviceValue::Unknown,
            },
            Value::Counter32(c) => DeviceValue::Counter32(*c),
            Value::Counter64(c) => DeviceValue::Counter64(*c),
            Value::Timeticks(t) => DeviceValue::Timeticks(*t),
            Value::Boolean(b) => DeviceValue::Boolean(*b),
            Value::Unsigned32(u) => DeviceValue::Unsigned32(*u),
            Value::EndOfMibView => DeviceValue::EndOfMibView,
            Value::NoSuchObject => DeviceValue::NoSuchObject,
            Value::NoSuchInstance => DeviceValue::NoSuchInstance,
            _ => DeviceValue::Unknown,
        }
    }
}

/// sysDescr and friends are usually ASCII, but some agents pad with NULs or return raw bytes.
pub fn octets_to_text(bytes: &[u8]) -> String {
    let trimmed: &[u8] = match bytes.iter().rposition(|b| *b != 0) {
        Some(end) => &bytes[..=end],
        None => &[],
    };
    let printable = trimmed
        .iter()
        .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace());
    if printable {
        String::from_utf8_lossy(trimmed).trim().to_string()
    } else {
        hex::encode(trimmed)
    }
}

pub fn oid_to_string(components: &[u64]) -> String {
    components
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

pub fn parse_oid(text: &str) -> Option<Vec<u64>> {
    text.trim()
        .trim_start_matches('.')
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// The four SNMP lookups the probe adapter needs from a device.
#[async_trait]
pub trait SnmpProbe: Send + Sync {
    async fn system_info(&self, target: &SnmpTarget) -> Result<SystemInfo, SnmpClientError>;
    /// ipForwarding: `true` when the device forwards between interfaces.
    async fn ip_forwarding(&self, target: &SnmpTarget) -> Result<bool, SnmpClientError>;
    async fn interface_addresses(&self, target: &SnmpTarget) -> Result<Vec<InterfaceAddress>, SnmpClientError>;
    async fn routing_table(&self, target: &SnmpTarget) -> Result<Vec<RouteEntry>, SnmpClientError>;
}

/// Runs a single command on a device CLI.
///
/// Every call opens and closes its own session; some device CLIs drop the session after one
/// command, so callers must not expect state to carry over between calls.
#[async_trait]
pub trait CliTransport: Send + Sync {
    async fn run_command(
        &self,
        host: IpAddr,
        credential: &CliCredential,
        command: &str,
    ) -> Result<CliOutput, SshError>;
}
