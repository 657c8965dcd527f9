/*!
Breadth-first crawl of one run.

The crawler owns the frontier and the visited set for the duration of a crawl. Each iteration
first re-reads the run status, so a pause or cancel committed by another caller takes effect
between probes. Up to `probe_concurrency` addresses are probed together; their results are then
persisted, linked and expanded one by one in dequeue order, so storage only ever sees whole nodes
and the edge pass always reads committed rows.
*/

use std::{
    collections::{HashSet, VecDeque},
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    network::{
        addr::{fold_mapped, is_crawlable},
        route::local_networks,
        router::NewRouter,
    },
    topology::{
        classifier::classify,
        edges::link_router,
        probe::{ProbeAdapter, ProbeError, ProbeResult},
        run::{DiscoveryRun, RunStatus},
        store::{StoreResult, TopologyStore},
    },
};

/// Limits applied to a single crawl invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlBudget {
    pub max_nodes: usize,
    pub max_duration: Duration,
    pub probe_concurrency: usize,
}

impl Default for CrawlBudget {
    fn default() -> Self {
        Self {
            max_nodes: 1000,
            max_duration: Duration::from_secs(3600),
            probe_concurrency: 1,
        }
    }
}

/// Why a crawl stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The frontier ran dry.
    Exhausted,
    /// The budget ran out with addresses still queued.
    BudgetExhausted(String),
    /// Someone else moved the run out of RUNNING.
    Interrupted(RunStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub probed: usize,
    pub routers: usize,
    pub failures: usize,
    pub edges: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub stats: CrawlStats,
}

pub struct Crawler {
    store: Arc<TopologyStore>,
    probe: ProbeAdapter,
    budget: CrawlBudget,
}

/// Frontier state of one crawl.
struct Frontier {
    queue: VecDeque<IpAddr>,
    queued: HashSet<IpAddr>,
    visited: HashSet<IpAddr>,
}

impl Frontier {
    fn new(seeds: impl IntoIterator<Item = IpAddr>, visited: HashSet<IpAddr>) -> Self {
        let mut frontier = Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            visited,
        };
        for seed in seeds {
            frontier.push(seed);
        }
        frontier
    }

    fn push(&mut self, address: IpAddr) {
        let address = fold_mapped(address);
        if !self.visited.contains(&address) && self.queued.insert(address) {
            self.queue.push_back(address);
        }
    }

    /// Dequeue up to `limit` addresses that haven't been visited, marking them visited.
    fn take(&mut self, limit: usize) -> Vec<IpAddr> {
        let mut batch = Vec::new();
        while batch.len() < limit {
            let Some(address) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&address);
            if self.visited.insert(address) {
                batch.push(address);
            }
        }
        batch
    }
}

impl Crawler {
    pub fn new(store: Arc<TopologyStore>, probe: ProbeAdapter, budget: CrawlBudget) -> Self {
        Self { store, probe, budget }
    }

    /// Crawl `run` from `seeds`, never probing anything in `visited`. Returns once the frontier is
    /// empty, the budget is spent or the run left RUNNING. Only persistence failures are errors.
    pub async fn crawl(
        &self,
        run: &DiscoveryRun,
        seeds: Vec<IpAddr>,
        visited: HashSet<IpAddr>,
    ) -> StoreResult<CrawlReport> {
        let started = Instant::now();
        let mut frontier = Frontier::new(seeds, visited);
        let mut stats = CrawlStats::default();
        let concurrency = self.budget.probe_concurrency.max(1);

        let outcome = loop {
            let status = self.store.get_run(run.id)?.map(|r| r.status).unwrap_or(RunStatus::Cancelled);
            if status != RunStatus::Running {
                info!("run {} is {status}, stopping crawl", run.id);
                break CrawlOutcome::Interrupted(status);
            }
            if frontier.queue.is_empty() {
                break CrawlOutcome::Exhausted;
            }
            if stats.probed >= self.budget.max_nodes {
                break CrawlOutcome::BudgetExhausted(format!("max_nodes={} reached", self.budget.max_nodes));
            }
            if started.elapsed() >= self.budget.max_duration {
                break CrawlOutcome::BudgetExhausted(format!(
                    "max_duration={} reached",
                    humantime::format_duration(self.budget.max_duration)
                ));
            }

            let batch = frontier.take(concurrency.min(self.budget.max_nodes - stats.probed));
            if batch.is_empty() {
                continue;
            }
            let results = join_all(
                batch
                    .iter()
                    .map(|address| self.probe.probe(*address, &run.snmp, &run.cli_credentials)),
            )
            .await;
            for (address, result) in batch.into_iter().zip(results) {
                stats.probed += 1;
                self.record(run, address, result, &mut frontier, &mut stats)?;
            }
        };

        stats.pending = frontier.queue.len();
        info!(
            "run {}: crawl stopped ({outcome:?}) after {} probes, {} routers, {} failures, {} edges, {} pending",
            run.id, stats.probed, stats.routers, stats.failures, stats.edges, stats.pending
        );
        Ok(CrawlReport { outcome, stats })
    }

    /// Persist one probed address, link it and queue its next hops.
    fn record(
        &self,
        run: &DiscoveryRun,
        address: IpAddr,
        result: Result<ProbeResult, ProbeError>,
        frontier: &mut Frontier,
        stats: &mut CrawlStats,
    ) -> StoreResult<()> {
        let probe = match result {
            Ok(probe) => probe,
            Err(e) => {
                warn!("{address}: probe failed: {e}");
                self.store
                    .record_node(run.id, address, &NewRouter::unreachable(&e.to_string()), &[], &[])?;
                stats.failures += 1;
                return Ok(());
            }
        };

        let classification = classify(&probe.system, probe.forwarding, &probe.interfaces, &probe.routes);
        let row = NewRouter {
            hostname: probe.system.hostname.clone(),
            sys_descr: probe.system.description.clone(),
            sys_object_id: probe.system.object_id.clone(),
            vendor: probe.vendor.clone(),
            model: probe.model.clone(),
            is_router: classification.is_router,
            score: classification.score,
            reason: classification.reason,
        };
        let router = self
            .store
            .record_node(run.id, address, &row, &local_networks(&probe.interfaces), &probe.routes)?;
        info!(
            "{address}: router={} score={} ({}) routes={}{}",
            router.is_router,
            router.score,
            router.reason,
            probe.routes.len(),
            if probe.via_cli { " via cli" } else { "" }
        );
        if router.is_router {
            stats.routers += 1;
            stats.edges += link_router(&self.store, run.id, &router)?;
        }

        for hop in probe.routes.iter().filter_map(|r| r.next_hop) {
            if is_crawlable(&hop) {
                frontier.push(hop);
            } else {
                debug!("{address}: ignoring next hop {hop}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        network::{
            route::{RouteEntry, RouteProtocol},
            router::SystemInfo,
        },
        parsers::VendorRegistry,
        topology::{
            probe::tests::{FakeCli, FakeSnmp, FakeSnmpDevice, iface, ip},
            run::{RunRequest, SnmpSettings},
        },
    };

    fn route(dest: &str, nh: Option<&str>, protocol: RouteProtocol) -> RouteEntry {
        RouteEntry::new(dest.parse().unwrap(), nh.map(ip), protocol)
    }

    /// Two routers sharing 10.0.1.0/24, a host behind the second one and a dead default gateway.
    pub fn lab() -> FakeSnmp {
        let mut snmp = FakeSnmp::default();
        snmp.devices.insert(
            ip("10.0.0.1"),
            FakeSnmpDevice {
                system: SystemInfo {
                    hostname: Some("core1".into()),
                    description: Some("Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M)".into()),
                    object_id: Some("1.3.6.1.4.1.9.1.1041".into()),
                },
                forwarding: Some(true),
                interfaces: vec![iface("10.0.0.1", 24), iface("10.0.1.1", 24)],
                routes: vec![
                    route("10.0.0.0/24", None, RouteProtocol::Connected),
                    route("10.0.1.0/24", None, RouteProtocol::Connected),
                    route("10.0.2.0/24", Some("10.0.1.2"), RouteProtocol::Ospf),
                    route("0.0.0.0/0", Some("10.0.0.254"), RouteProtocol::Static),
                ],
            },
        );
        snmp.devices.insert(
            ip("10.0.1.2"),
            FakeSnmpDevice {
                system: SystemInfo {
                    hostname: Some("edge1".into()),
                    description: Some("Juniper Networks, Inc. mx104 internet router, kernel JUNOS 15.1".into()),
                    object_id: None,
                },
                forwarding: Some(true),
                interfaces: vec![iface("10.0.1.2", 24), iface("10.0.2.1", 24)],
                routes: vec![
                    route("10.0.1.0/24", None, RouteProtocol::Connected),
                    route("10.0.2.0/24", None, RouteProtocol::Connected),
                    route("0.0.0.0/0", Some("10.0.0.1"), RouteProtocol::Static),
                    route("10.0.3.0/24", Some("10.0.2.5"), RouteProtocol::Static),
                    route("224.0.0.0/4", Some("224.0.0.5"), RouteProtocol::Other("other".into())),
                ],
            },
        );
        snmp.devices.insert(
            ip("10.0.2.5"),
            FakeSnmpDevice {
                system: SystemInfo {
                    hostname: Some("printer".into()),
                    description: Some("Linux printer 4.19".into()),
                    object_id: None,
                },
                forwarding: Some(false),
                interfaces: vec![iface("10.0.2.5", 24)],
                routes: Vec::new(),
            },
        );
        snmp
    }

    pub fn running_run(store: &TopologyStore) -> DiscoveryRun {
        store
            .create_run(
                &RunRequest {
                    root_ip: ip("10.0.0.1"),
                    snmp: SnmpSettings::default(),
                    cli_credentials: Vec::new(),
                },
                RunStatus::Running,
            )
            .unwrap()
    }

    fn crawler(store: &Arc<TopologyStore>, snmp: FakeSnmp, budget: CrawlBudget) -> Crawler {
        let probe = ProbeAdapter::new(Arc::new(snmp), Arc::new(FakeCli::default()), VendorRegistry::default());
        Crawler::new(store.clone(), probe, budget)
    }

    #[tokio::test]
    async fn crawls_whole_lab() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        let report = crawler(&store, lab(), CrawlBudget::default())
            .crawl(&run, vec![run.root_ip], HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, CrawlOutcome::Exhausted);
        assert_eq!(report.stats.probed, 4);
        assert_eq!(report.stats.routers, 2);
        assert_eq!(report.stats.failures, 1);

        let routers = store.routers(run.id).unwrap();
        let order: Vec<String> = routers.iter().map(|r| r.ip.to_string()).collect();
        assert_eq!(order, ["10.0.0.1", "10.0.1.2", "10.0.0.254", "10.0.2.5"]);

        let dead = &routers[2];
        assert!(!dead.is_router);
        assert!(dead.reason.starts_with("probe_error:"));

        let printer = &routers[3];
        assert!(!printer.is_router);
        assert_eq!(printer.score, -1);

        assert_eq!(routers[0].vendor.as_deref(), Some("cisco_ios"));
        assert_eq!(routers[1].vendor.as_deref(), Some("junos"));

        let edges = store.edges(run.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].from_router_id, edges[0].to_router_id), (routers[0].id, routers[1].id));
    }

    #[tokio::test]
    async fn visits_each_address_once() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        let snmp = Arc::new(lab());
        let probe = ProbeAdapter::new(snmp.clone(), Arc::new(FakeCli::default()), VendorRegistry::default());
        let crawler = Crawler::new(store.clone(), probe, CrawlBudget::default());
        crawler
            .crawl(&run, vec![run.root_ip, run.root_ip, ip("10.0.1.2")], HashSet::new())
            .await
            .unwrap();
        let calls = snmp.calls.lock().unwrap().clone();
        let distinct: HashSet<_> = calls.iter().collect();
        assert_eq!(calls.len(), distinct.len());
        assert_eq!(calls.len(), store.visited_addresses(run.id).unwrap().len());
    }

    #[tokio::test]
    async fn stops_on_node_budget() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        let budget = CrawlBudget {
            max_nodes: 2,
            ..Default::default()
        };
        let report = crawler(&store, lab(), budget)
            .crawl(&run, vec![run.root_ip], HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, CrawlOutcome::BudgetExhausted("max_nodes=2 reached".into()));
        assert_eq!(report.stats.probed, 2);
        assert_eq!(report.stats.pending, 2);
        assert_eq!(store.routers(run.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stops_when_run_left_running() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        store
            .transition(run.id, &[RunStatus::Running], RunStatus::Paused, None)
            .unwrap();
        let report = crawler(&store, lab(), CrawlBudget::default())
            .crawl(&run, vec![run.root_ip], HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, CrawlOutcome::Interrupted(RunStatus::Paused));
        assert_eq!(report.stats.probed, 0);
    }

    #[tokio::test]
    async fn concurrent_probes_match_sequential_result() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        let budget = CrawlBudget {
            probe_concurrency: 4,
            ..Default::default()
        };
        let report = crawler(&store, lab(), budget)
            .crawl(&run, vec![run.root_ip], HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, CrawlOutcome::Exhausted);
        assert_eq!(store.routers(run.id).unwrap().len(), 4);
        assert_eq!(store.edges(run.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skips_already_visited_seeds() {
        let store = Arc::new(TopologyStore::open_in_memory().unwrap());
        let run = running_run(&store);
        let visited: HashSet<IpAddr> = [ip("10.0.0.1")].into_iter().collect();
        let report = crawler(&store, lab(), CrawlBudget::default())
            .crawl(&run, vec![ip("10.0.0.1")], visited)
            .await
            .unwrap();
        assert_eq!(report.outcome, CrawlOutcome::Exhausted);
        assert_eq!(report.stats.probed, 0);
    }
}
