use std::{fmt::Display, net::IpAddr};

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::route::RouteProtocol;

pub type RouterId = i64;

/// What a device says about itself (SNMPv2-MIB system group, or the CLI version output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub object_id: Option<String>,
}

impl SystemInfo {
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.description.is_none() && self.object_id.is_none()
    }

    pub fn description_lower(&self) -> String {
        self.description.as_deref().unwrap_or_default().to_ascii_lowercase()
    }

    pub fn object_id_str(&self) -> &str {
        self.object_id.as_deref().unwrap_or_default()
    }
}

/// IP-MIB ipForwarding, with "could not be read" kept apart from "not forwarding".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Forwarding {
    Enabled,
    Disabled,
    #[default]
    Unknown,
}

/// A visited address, persisted once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    pub run_id: Uuid,
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub is_router: bool,
    pub score: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Display for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.ip, self.hostname.as_deref().unwrap_or("?"))?;
        if let Some(vendor) = &self.vendor {
            write!(f, " {vendor}")?;
            if let Some(model) = &self.model {
                write!(f, " {model}")?;
            }
        }
        write!(
            f,
            " router={} score={} [{}]",
            self.is_router, self.score, self.reason
        )
    }
}

/// Router row before it has been given an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRouter {
    pub hostname: Option<String>,
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub is_router: bool,
    pub score: i32,
    pub reason: String,
}

impl NewRouter {
    /// Row recorded for an address that answered neither SNMP nor CLI.
    pub fn unreachable(detail: &str) -> Self {
        Self {
            reason: format!("probe_error: {detail}"),
            ..Default::default()
        }
    }
}

/// Subnet attached to one of a router's interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterNetwork {
    pub id: i64,
    pub run_id: Uuid,
    pub router_id: RouterId,
    pub network: IpNetwork,
}

/// Route entry as stored for a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRoute {
    pub id: i64,
    pub run_id: Uuid,
    pub router_id: RouterId,
    pub destination: IpNetwork,
    pub next_hop: Option<IpAddr>,
    pub protocol: RouteProtocol,
    pub admin_distance: Option<u32>,
    pub metric: Option<u32>,
}
