use std::{fmt::Display, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data_aquisition::core::{CliCredential, SnmpTarget, SnmpVersion};

/// Lifecycle of a discovery run.
///
/// PENDING -> RUNNING -> {PAUSED, COMPLETED, FAILED, CANCELLED}; PAUSED, COMPLETED and FAILED runs
/// can be resumed, CANCELLED is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "PAUSED" => Some(RunStatus::Paused),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            "CANCELLED" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }

    /// States `resume` accepts. RUNNING is only resumable when no crawl is driving it.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Completed | RunStatus::Failed | RunStatus::Running)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SNMP parameters shared by every probe of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpSettings {
    pub community: String,
    pub version: SnmpVersion,
}

impl SnmpSettings {
    pub fn new(community: impl Into<String>, version: SnmpVersion) -> Self {
        Self {
            community: community.into(),
            version,
        }
    }

    pub fn target(&self, address: IpAddr) -> SnmpTarget {
        SnmpTarget {
            address,
            community: self.community.clone(),
            version: self.version,
        }
    }
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self::new("public", SnmpVersion::V2c)
    }
}

/// Parameters a run is created with. The credential list belongs to the run, so an old run can
/// be resumed with exactly the credentials it started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub root_ip: IpAddr,
    pub snmp: SnmpSettings,
    pub cli_credentials: Vec<CliCredential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub root_ip: IpAddr,
    pub snmp: SnmpSettings,
    #[serde(skip_serializing, default)]
    pub cli_credentials: Vec<CliCredential>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
