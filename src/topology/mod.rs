/*!
Topology module

The discovery engine proper, leaf to root:

- `probe`: Device Probe Adapter. SNMP first, vendor CLI over SSH as fallback.
- `classifier`: pure router-or-not scoring of a probe result.
- `edges`: shared-subnet links between routers.
- `crawler`: breadth-first crawl of one run with its budget.
- `manager`: run lifecycle (start, execute, resume, pause, cancel, CLI route ingestion).
- `run`, `schema`, `store`: run records and their SQLite persistence.
- `error`: errors surfaced to callers of the manager.
*/

pub mod classifier;
pub mod crawler;
pub mod edges;
pub mod error;
pub mod manager;
pub mod probe;
pub mod run;
pub mod schema;
pub mod store;

pub use error::{DiscoveryError, DiscoveryResult};
pub use manager::RunManager;
pub use probe::ProbeAdapter;
pub use run::{DiscoveryRun, RunRequest, RunStatus, SnmpSettings};
pub use store::TopologyStore;
