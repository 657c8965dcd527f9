use anyhow::{Result, anyhow};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::data_aquisition::{snmp::SnmpPoller, ssh::SshTransport};
use crate::topology::crawler::CrawlBudget;

/// Runtime settings of the discovery engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryConfig {
    /// Directory holding the SQLite store
    pub data_dir: PathBuf,

    pub snmp_port: u16,
    #[serde(serialize_with = "duration_text")]
    pub snmp_timeout: Duration,
    pub snmp_retries: u32,
    pub snmp_max_repetitions: u32,
    pub snmp_max_walk_rows: usize,

    pub ssh_port: u16,
    #[serde(serialize_with = "duration_text")]
    pub ssh_connect_timeout: Duration,
    #[serde(serialize_with = "duration_text")]
    pub ssh_command_timeout: Duration,

    /// Probes per crawl invocation before the run is paused
    pub max_nodes: usize,
    /// Wall-clock budget per crawl invocation
    #[serde(serialize_with = "duration_text")]
    pub max_duration: Duration,
    /// Frontier addresses probed at the same time
    pub probe_concurrency: usize,
}

const EMPTY_CONFIG: &str = r#"### topology-discovery configuration file

### directory of the discovery database
# data_dir = "~/.topology-discovery"

### SNMP
# snmp_port = 161
# snmp_timeout = "2s"
# snmp_retries = 1
# snmp_max_repetitions = 25
# snmp_max_walk_rows = 10000

### SSH
# ssh_port = 22
# ssh_connect_timeout = "5s"
# ssh_command_timeout = "20s"

### crawl budget, per start/resume
# max_nodes = 1000
# max_duration = "1h"
# probe_concurrency = 1
"#;

fn duration_text<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*duration))
}

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".topology-discovery")
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let poller = SnmpPoller::default();
        let ssh = SshTransport::default();
        let budget = CrawlBudget::default();
        Self {
            data_dir: default_dir(),
            snmp_port: poller.port,
            snmp_timeout: poller.timeout,
            snmp_retries: poller.retries,
            snmp_max_repetitions: poller.max_repetitions,
            snmp_max_walk_rows: poller.max_walk_rows,
            ssh_port: ssh.port,
            ssh_connect_timeout: ssh.connect_timeout,
            ssh_command_timeout: ssh.command_timeout,
            max_nodes: budget.max_nodes,
            max_duration: budget.max_duration,
            probe_concurrency: budget.probe_concurrency,
        }
    }
}

fn parse_value<T: FromStr>(config: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match config.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

fn parse_duration(config: &HashMap<String, String>, key: &str, default: Duration) -> Result<Duration> {
    match config.get(key) {
        Some(raw) => humantime::parse_duration(raw.trim())
            .map_err(|e| anyhow!("Invalid duration '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

/// `~/x` paths are expanded against the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let (Some(rest), Some(home)) = (raw.strip_prefix("~/"), dirs::home_dir()) {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

impl DiscoveryConfig {
    /// Load the configuration file (created with commented defaults when missing), then apply
    /// `TOPOLOGY_DISCOVERY_*` environment overrides.
    pub fn new(path: &Option<String>) -> Result<DiscoveryConfig> {
        let file = match path {
            Some(p) => PathBuf::from(p),
            None => {
                let dir = default_dir();
                std::fs::create_dir_all(&dir).map_err(|e| anyhow!("Unable to create {}: {}", dir.display(), e))?;
                dir.join("config.toml")
            }
        };

        let mut builder = Config::builder();
        if file.exists() {
            builder = builder.add_source(config::File::from(file.as_path()));
        } else {
            std::fs::write(&file, EMPTY_CONFIG)
                .map_err(|e| anyhow!("Unable to create config file {}: {}", file.display(), e))?;
        }

        // e.g. `TOPOLOGY_DISCOVERY_SNMP_TIMEOUT=3s`
        builder = builder.add_source(config::Environment::with_prefix("TOPOLOGY_DISCOVERY"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;
        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;
        Self::from_map(&config)
    }

    fn from_map(config: &HashMap<String, String>) -> Result<DiscoveryConfig> {
        let defaults = DiscoveryConfig::default();
        let loaded = DiscoveryConfig {
            data_dir: config
                .get("data_dir")
                .map(|p| expand_home(p.trim()))
                .unwrap_or(defaults.data_dir),
            snmp_port: parse_value(config, "snmp_port", defaults.snmp_port)?,
            snmp_timeout: parse_duration(config, "snmp_timeout", defaults.snmp_timeout)?,
            snmp_retries: parse_value(config, "snmp_retries", defaults.snmp_retries)?,
            snmp_max_repetitions: parse_value(config, "snmp_max_repetitions", defaults.snmp_max_repetitions)?,
            snmp_max_walk_rows: parse_value(config, "snmp_max_walk_rows", defaults.snmp_max_walk_rows)?,
            ssh_port: parse_value(config, "ssh_port", defaults.ssh_port)?,
            ssh_connect_timeout: parse_duration(config, "ssh_connect_timeout", defaults.ssh_connect_timeout)?,
            ssh_command_timeout: parse_duration(config, "ssh_command_timeout", defaults.ssh_command_timeout)?,
            max_nodes: parse_value(config, "max_nodes", defaults.max_nodes)?,
            max_duration: parse_duration(config, "max_duration", defaults.max_duration)?,
            probe_concurrency: parse_value(config, "probe_concurrency", defaults.probe_concurrency)?,
        };
        if loaded.max_nodes == 0 {
            return Err(anyhow!("max_nodes must be at least 1"));
        }
        if loaded.probe_concurrency == 0 {
            return Err(anyhow!("probe_concurrency must be at least 1"));
        }
        Ok(loaded)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("discovery.sqlite3")
    }

    pub fn snmp_poller(&self) -> SnmpPoller {
        SnmpPoller {
            port: self.snmp_port,
            timeout: self.snmp_timeout,
            retries: self.snmp_retries,
            max_repetitions: self.snmp_max_repetitions,
            max_walk_rows: self.snmp_max_walk_rows,
        }
    }

    pub fn ssh_transport(&self) -> SshTransport {
        SshTransport {
            port: self.ssh_port,
            connect_timeout: self.ssh_connect_timeout,
            command_timeout: self.ssh_command_timeout,
        }
    }

    pub fn crawl_budget(&self) -> CrawlBudget {
        CrawlBudget {
            max_nodes: self.max_nodes,
            max_duration: self.max_duration,
            probe_concurrency: self.probe_concurrency,
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir.display()),
            format!("SQLite Path:        {}", self.sqlite_path().display()),
            format!("SNMP:               port {}, timeout {}, {} retries", self.snmp_port, humantime::format_duration(self.snmp_timeout), self.snmp_retries),
            format!("SSH:                port {}, connect {}, command {}", self.ssh_port, humantime::format_duration(self.ssh_connect_timeout), humantime::format_duration(self.ssh_command_timeout)),
            format!("Crawl Budget:       {} nodes, {}, {} concurrent", self.max_nodes, humantime::format_duration(self.max_duration), self.probe_concurrency),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = DiscoveryConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EMPTY_CONFIG);
        assert_eq!(config.max_nodes, 1000);
        assert_eq!(config.snmp_timeout, Duration::from_secs(2));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "data_dir = \"{}\"\nsnmp_timeout = \"500ms\"\nmax_nodes = 50\nmax_duration = \"10m\"\nprobe_concurrency = 4\n",
                dir.path().display()
            ),
        )
        .unwrap();
        let config = DiscoveryConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.snmp_timeout, Duration::from_millis(500));
        assert_eq!(config.crawl_budget().max_nodes, 50);
        assert_eq!(config.crawl_budget().max_duration, Duration::from_secs(600));
        assert_eq!(config.crawl_budget().probe_concurrency, 4);
        assert_eq!(config.sqlite_path(), dir.path().join("discovery.sqlite3"));
        assert_eq!(config.ssh_transport().port, 22);
    }

    #[test]
    fn rejects_bad_values() {
        let mut map = HashMap::new();
        map.insert("snmp_timeout".to_string(), "soon".to_string());
        assert!(DiscoveryConfig::from_map(&map).is_err());

        let mut map = HashMap::new();
        map.insert("probe_concurrency".to_string(), "0".to_string());
        assert!(DiscoveryConfig::from_map(&map).is_err());

        let mut map = HashMap::new();
        map.insert("ssh_port".to_string(), "70000".to_string());
        assert!(DiscoveryConfig::from_map(&map).is_err());
    }

    #[test]
    fn home_relative_data_dir() {
        let mut map = HashMap::new();
        map.insert("data_dir".to_string(), "~/discovery".to_string());
        let config = DiscoveryConfig::from_map(&map).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_dir, home.join("discovery"));
        }
    }
}
