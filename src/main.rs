use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::Level;
use uuid::Uuid;

use topology_discovery::{
    CliCredential, DiscoveryConfig, NetworkGraph, RunManager, RunRequest, SnmpSettings, SnmpVersion, TopologyStore,
};

#[derive(Parser)]
#[clap(author, version, about = "Layer-3 topology discovery over SNMP and SSH", long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.topology-discovery/config.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a discovery run from a root address and crawl until done
    Start {
        /// Address of the first device to probe
        root: IpAddr,

        /// SNMP community string
        #[clap(short = 'C', long, default_value = "public")]
        community: String,

        /// SNMP version: 1 or 2c
        #[clap(short = 'V', long, default_value = "2c")]
        snmp_version: String,

        /// CLI fallback credential as user:password, may be repeated
        #[clap(short = 'u', long = "credential")]
        credentials: Vec<String>,
    },
    /// Resume a paused, finished or abandoned run
    Resume {
        run_id: Uuid,

        /// Extra addresses to probe, may be repeated
        #[clap(short, long = "seed")]
        seeds: Vec<IpAddr>,
    },
    /// Pause a running run; its crawl stops before the next probe
    Pause { run_id: Uuid },
    /// Cancel a pending, running or paused run
    Cancel { run_id: Uuid },
    /// Show the state of a run
    State { run_id: Uuid },
    /// Show routers and edges of a run
    Topology { run_id: Uuid },
    /// Fetch routes of one router over CLI and continue the run from its next hops
    CliRoutes {
        run_id: Uuid,
        router_id: i64,

        /// Credential as user:password, may be repeated
        #[clap(short = 'u', long = "credential", required = true)]
        credentials: Vec<String>,
    },
    /// List all runs, newest first
    Runs,
    /// Print the effective configuration
    Config,
}

fn parse_credentials(raw: &[String]) -> Result<Vec<CliCredential>> {
    raw.iter()
        .map(|c| CliCredential::parse(c).ok_or_else(|| anyhow!("credential must look like user:password")))
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = DiscoveryConfig::new(&cli.config)?;
    if let Commands::Config = cli.command {
        println!("{}", config.summary());
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| anyhow!("Unable to create data directory {}: {}", config.data_dir.display(), e))?;
    let store = Arc::new(TopologyStore::open(&config.sqlite_path())?);
    let manager = RunManager::from_config(store, &config);

    match cli.command {
        Commands::Start {
            root,
            community,
            snmp_version,
            credentials,
        } => {
            let version =
                SnmpVersion::parse(&snmp_version).ok_or_else(|| anyhow!("unsupported SNMP version {snmp_version}"))?;
            let run = manager
                .start(RunRequest {
                    root_ip: root,
                    snmp: SnmpSettings::new(community, version),
                    cli_credentials: parse_credentials(&credentials)?,
                })
                .await?;
            print_json(&run)?;
        }
        Commands::Resume { run_id, seeds } => print_json(&manager.resume(run_id, seeds).await?)?,
        Commands::Pause { run_id } => print_json(&manager.pause(run_id)?)?,
        Commands::Cancel { run_id } => print_json(&manager.cancel(run_id)?)?,
        Commands::State { run_id } => print_json(&manager.state(run_id)?)?,
        Commands::Topology { run_id } => {
            let snapshot = manager.topology(run_id)?;
            let graph = NetworkGraph::build_new(&snapshot);
            print_json(&json!({
                "run_id": snapshot.run_id,
                "routers": graph.router_count(),
                "links": graph.edge_count(),
                "components": graph.component_count(),
                "nodes": snapshot.nodes,
                "edges": snapshot.edges,
            }))?;
        }
        Commands::CliRoutes {
            run_id,
            router_id,
            credentials,
        } => {
            let report = manager
                .ingest_cli_routes(run_id, router_id, parse_credentials(&credentials)?)
                .await?;
            print_json(&report)?;
        }
        Commands::Runs => print_json(&manager.list_runs()?)?,
        Commands::Config => {}
    }
    Ok(())
}
