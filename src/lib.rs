//! Layer-3 topology discovery.
//!
//! Starting from one seed address, devices are probed over SNMP (falling back to SSH CLI with
//! vendor-specific commands), classified as router or not, and linked wherever two routers share
//! an attached subnet. Runs are persisted in SQLite and can be paused, cancelled and resumed.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use topology_discovery::{DiscoveryConfig, RunManager, RunRequest, SnmpSettings, TopologyStore};
//!
//! let config = DiscoveryConfig::new(&None)?;
//! let store = Arc::new(TopologyStore::open(&config.sqlite_path())?);
//! let manager = RunManager::from_config(store, &config);
//! let run = manager
//!     .start(RunRequest {
//!         root_ip: "10.0.0.1".parse()?,
//!         snmp: SnmpSettings::default(),
//!         cli_credentials: Vec::new(),
//!     })
//!     .await?;
//! println!("{}", run.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data_aquisition;
pub mod network;
pub mod parsers;
pub mod topology;

pub use config::DiscoveryConfig;
pub use data_aquisition::core::{CliCredential, SnmpVersion};
pub use network::network_graph::{NetworkGraph, TopologySnapshot};
pub use parsers::VendorRegistry;
pub use topology::{
    DiscoveryError, DiscoveryRun, ProbeAdapter, RunManager, RunRequest, RunStatus, SnmpSettings, TopologyStore,
};
