/*!
Discovery Run Manager.

Entry point for callers: creates runs, drives crawls and moves runs between states. Every status
change is a compare-and-set committed to the store before the next network operation, so the
stored status is the single source of truth. A pause or cancel issued from another task lands in
the store and the crawl loop picks it up before its next probe.

Status changes:

```text
PENDING --execute--> RUNNING --crawl done--> COMPLETED
   |                  |  |  \--storage failure--> FAILED
   |                  |  \--pause / budget--> PAUSED
   \------cancel------+-----cancel-------------> CANCELLED
PAUSED, COMPLETED, FAILED, orphaned RUNNING --resume--> RUNNING
```
*/

use std::{
    collections::HashSet,
    net::IpAddr,
    sync::{Arc, Mutex},
};

use ipnetwork::IpNetwork;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::DiscoveryConfig,
    data_aquisition::core::CliCredential,
    network::{
        addr::{fold_mapped, is_crawlable},
        network_graph::TopologySnapshot,
        route::{InterfaceAddress, RouteEntry, local_networks},
        router::{NewRouter, Router, RouterId, SystemInfo},
    },
    parsers::VendorRegistry,
    topology::{
        classifier::{classify, recorded_forwarding},
        crawler::{CrawlBudget, CrawlOutcome, CrawlStats, Crawler},
        edges::link_router,
        error::{DiscoveryError, DiscoveryResult},
        probe::ProbeAdapter,
        run::{DiscoveryRun, RunRequest, RunStatus},
        store::{StoreError, TopologyStore},
    },
};

/// Result of an out-of-band CLI route fetch for one router.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub router: Router,
    pub new_networks: usize,
    pub new_routes: usize,
    pub new_edges: usize,
    /// Edges dropped because the router was reclassified as a host
    pub dropped_edges: usize,
    /// Next hops the run was resumed from.
    pub seeds: Vec<IpAddr>,
    pub run: DiscoveryRun,
}

#[derive(Clone)]
pub struct RunManager {
    store: Arc<TopologyStore>,
    probe: ProbeAdapter,
    budget: CrawlBudget,
    /// Run currently crawled by this manager.
    active: Arc<Mutex<Option<Uuid>>>,
}

/// Marks a run as crawled by this manager until dropped.
struct ActiveCrawl {
    slot: Arc<Mutex<Option<Uuid>>>,
}

impl Drop for ActiveCrawl {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl RunManager {
    pub fn new(store: Arc<TopologyStore>, probe: ProbeAdapter, budget: CrawlBudget) -> Self {
        Self {
            store,
            probe,
            budget,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Manager probing real devices with the configured SNMP and SSH settings.
    pub fn from_config(store: Arc<TopologyStore>, config: &DiscoveryConfig) -> Self {
        let probe = ProbeAdapter::new(
            Arc::new(config.snmp_poller()),
            Arc::new(config.ssh_transport()),
            VendorRegistry::default(),
        );
        Self::new(store, probe, config.crawl_budget())
    }

    pub fn store(&self) -> &Arc<TopologyStore> {
        &self.store
    }

    fn active_run(&self) -> Option<Uuid> {
        self.active.lock().ok().and_then(|slot| *slot)
    }

    fn claim(&self, run_id: Uuid) -> DiscoveryResult<ActiveCrawl> {
        let mut slot = self.active.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(current) = *slot {
            return Err(DiscoveryError::Conflict(current));
        }
        *slot = Some(run_id);
        Ok(ActiveCrawl {
            slot: self.active.clone(),
        })
    }

    fn load(&self, run_id: Uuid) -> DiscoveryResult<DiscoveryRun> {
        self.store.get_run(run_id)?.ok_or(DiscoveryError::RunNotFound(run_id))
    }

    fn ensure_none_running(&self) -> DiscoveryResult<()> {
        match self.store.running_run()? {
            Some(run) => Err(DiscoveryError::Conflict(run.id)),
            None => Ok(()),
        }
    }

    /// Compare-and-set that reports the run's actual status when it doesn't apply.
    fn transition(
        &self,
        run_id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error_message: Option<&str>,
        operation: &'static str,
    ) -> DiscoveryResult<DiscoveryRun> {
        let changed = match self.store.transition(run_id, from, to, error_message) {
            Ok(changed) => changed,
            Err(StoreError::ActiveRunExists) => {
                let holder = self.store.running_run()?.map(|r| r.id).unwrap_or(run_id);
                return Err(DiscoveryError::Conflict(holder));
            }
            Err(e) => return Err(e.into()),
        };
        let run = self.load(run_id)?;
        if !changed {
            return Err(DiscoveryError::InvalidState {
                run_id,
                status: run.status,
                operation,
            });
        }
        info!("run {run_id}: {operation} -> {}", run.status);
        Ok(run)
    }

    /// Record a PENDING run without crawling it.
    pub fn create(&self, request: RunRequest) -> DiscoveryResult<DiscoveryRun> {
        validate_root(request.root_ip)?;
        let request = RunRequest {
            root_ip: fold_mapped(request.root_ip),
            ..request
        };
        let run = self.store.create_run(&request, RunStatus::Pending)?;
        info!("run {} created for {}", run.id, run.root_ip);
        Ok(run)
    }

    /// Move a PENDING run to RUNNING and crawl it to the end.
    pub async fn execute(&self, run_id: Uuid) -> DiscoveryResult<DiscoveryRun> {
        let run = self.load(run_id)?;
        if run.status != RunStatus::Pending {
            return Err(DiscoveryError::InvalidState {
                run_id,
                status: run.status,
                operation: "execute",
            });
        }
        self.ensure_none_running()?;
        let guard = self.claim(run_id)?;
        let run = self.transition(run_id, &[RunStatus::Pending], RunStatus::Running, None, "execute")?;
        let seeds = vec![run.root_ip];
        self.drive(run, seeds, HashSet::new(), guard).await
    }

    /// Create a RUNNING run and crawl it synchronously. Rejected with `Conflict` while any run is
    /// RUNNING; in that case nothing is recorded.
    pub async fn start(&self, request: RunRequest) -> DiscoveryResult<DiscoveryRun> {
        validate_root(request.root_ip)?;
        self.ensure_none_running()?;
        let request = RunRequest {
            root_ip: fold_mapped(request.root_ip),
            ..request
        };
        let placeholder = Uuid::nil();
        let guard = self.claim(placeholder)?;
        let run = match self.store.create_run(&request, RunStatus::Running) {
            Ok(run) => run,
            Err(StoreError::ActiveRunExists) => {
                let holder = self.store.running_run()?.map(|r| r.id).unwrap_or(placeholder);
                return Err(DiscoveryError::Conflict(holder));
            }
            Err(e) => return Err(e.into()),
        };
        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(run.id);
        }
        info!("run {} started from {}", run.id, run.root_ip);
        let seeds = vec![run.root_ip];
        self.drive(run, seeds, HashSet::new(), guard).await
    }

    /// Re-activate a run and crawl on from `seeds`, the run's persisted next hops that were never
    /// probed and its root if that was never probed. Addresses already visited in the run are
    /// never probed again.
    pub async fn resume(&self, run_id: Uuid, seeds: Vec<IpAddr>) -> DiscoveryResult<DiscoveryRun> {
        let run = self.load(run_id)?;
        if !run.status.is_resumable() {
            return Err(DiscoveryError::InvalidState {
                run_id,
                status: run.status,
                operation: "resume",
            });
        }
        let guard = self.claim(run_id)?;
        let run = if run.status == RunStatus::Running {
            // left behind by a process that no longer drives it
            warn!("run {run_id} was RUNNING without a crawl, taking it over");
            run
        } else {
            self.transition(
                run_id,
                &[RunStatus::Paused, RunStatus::Completed, RunStatus::Failed],
                RunStatus::Running,
                None,
                "resume",
            )?
        };

        let visited = self.store.visited_addresses(run_id)?;
        let mut frontier: Vec<IpAddr> = seeds.into_iter().map(fold_mapped).filter(is_crawlable).collect();
        frontier.extend(self.store.next_hops(run_id)?.into_iter().filter(is_crawlable));
        frontier.push(run.root_ip);
        frontier.retain(|address| !visited.contains(address));
        info!(
            "run {run_id}: resuming with {} visited, {} queued",
            visited.len(),
            frontier.iter().collect::<HashSet<_>>().len()
        );
        self.drive(run, frontier, visited, guard).await
    }

    pub fn pause(&self, run_id: Uuid) -> DiscoveryResult<DiscoveryRun> {
        self.load(run_id)?;
        self.transition(run_id, &[RunStatus::Running], RunStatus::Paused, None, "pause")
    }

    pub fn cancel(&self, run_id: Uuid) -> DiscoveryResult<DiscoveryRun> {
        self.load(run_id)?;
        self.transition(
            run_id,
            &[RunStatus::Running, RunStatus::Pending, RunStatus::Paused],
            RunStatus::Cancelled,
            None,
            "cancel",
        )
    }

    pub fn state(&self, run_id: Uuid) -> DiscoveryResult<DiscoveryRun> {
        self.load(run_id)
    }

    pub fn list_runs(&self) -> DiscoveryResult<Vec<DiscoveryRun>> {
        Ok(self.store.list_runs()?)
    }

    pub fn topology(&self, run_id: Uuid) -> DiscoveryResult<TopologySnapshot> {
        self.load(run_id)?;
        Ok(TopologySnapshot {
            run_id,
            nodes: self.store.routers(run_id)?,
            edges: self.store.edges(run_id)?,
        })
    }

    /// Fetch routes of one recorded router over CLI with credentials supplied for it alone, merge
    /// them into the run, reclassify the router and resume the run from the next hops it learned.
    pub async fn ingest_cli_routes(
        &self,
        run_id: Uuid,
        router_id: RouterId,
        credentials: Vec<CliCredential>,
    ) -> DiscoveryResult<IngestReport> {
        if credentials.is_empty() {
            return Err(DiscoveryError::InvalidArgument("at least one CLI credential is required".into()));
        }
        let run = self.load(run_id)?;
        if !run.status.is_resumable() {
            return Err(DiscoveryError::InvalidState {
                run_id,
                status: run.status,
                operation: "ingest CLI routes into",
            });
        }
        if self.active_run() == Some(run_id) {
            return Err(DiscoveryError::Conflict(run_id));
        }
        let router = self
            .store
            .router(run_id, router_id)?
            .ok_or(DiscoveryError::RouterNotFound { run_id, router_id })?;

        let known = SystemInfo {
            hostname: router.hostname.clone(),
            description: router.sys_descr.clone(),
            object_id: router.sys_object_id.clone(),
        };
        let probe = self.probe.probe_cli(router.ip, known, &credentials).await?;

        // classify on everything known about the router, old and new
        let mut networks: Vec<IpNetwork> = self
            .store
            .networks(run_id)?
            .into_iter()
            .filter(|n| n.router_id == router_id)
            .map(|n| n.network)
            .collect();
        for network in local_networks(&probe.interfaces) {
            if !networks.contains(&network) {
                networks.push(network);
            }
        }
        let interfaces: Vec<InterfaceAddress> = networks
            .iter()
            .filter_map(|n| InterfaceAddress::from_prefix(n.network(), n.prefix()).ok())
            .collect();
        let mut routes: Vec<RouteEntry> = self
            .store
            .routes_of(router_id)?
            .into_iter()
            .map(|r| RouteEntry::new(r.destination, r.next_hop, r.protocol).with_distance(r.admin_distance, r.metric))
            .collect();
        routes.extend(probe.routes.iter().cloned());
        let classification = classify(&probe.system, recorded_forwarding(&router.reason), &interfaces, &routes);

        let row = NewRouter {
            hostname: probe.system.hostname.clone(),
            sys_descr: probe.system.description.clone(),
            sys_object_id: probe.system.object_id.clone(),
            vendor: probe.vendor.clone().or(router.vendor.clone()),
            model: probe.model.clone().or(router.model.clone()),
            is_router: classification.is_router,
            score: classification.score,
            reason: classification.reason,
        };
        let merged = self.store.merge_node(
            run_id,
            router_id,
            &row,
            &local_networks(&probe.interfaces),
            &probe.routes,
        )?;
        let router = self
            .store
            .router(run_id, router_id)?
            .ok_or(DiscoveryError::RouterNotFound { run_id, router_id })?;
        let new_edges = link_router(&self.store, run_id, &router)?;
        info!(
            "run {run_id}: router {} ingested {} new routes, {} new subnets, {new_edges} new edges, {} dropped edges",
            router.ip, merged.new_routes, merged.new_networks, merged.dropped_edges
        );

        let mut seeds: Vec<IpAddr> = Vec::new();
        for hop in probe.routes.iter().filter_map(|r| r.next_hop).map(fold_mapped) {
            if is_crawlable(&hop) && !seeds.contains(&hop) {
                seeds.push(hop);
            }
        }
        let run = self.resume(run_id, seeds.clone()).await?;
        Ok(IngestReport {
            router,
            new_networks: merged.new_networks,
            new_routes: merged.new_routes,
            new_edges,
            dropped_edges: merged.dropped_edges,
            seeds,
            run,
        })
    }

    /// Crawl a RUNNING run and settle its final status. A storage failure during the crawl fails
    /// the run; the failure is reported through the returned run.
    async fn drive(
        &self,
        run: DiscoveryRun,
        seeds: Vec<IpAddr>,
        visited: HashSet<IpAddr>,
        _guard: ActiveCrawl,
    ) -> DiscoveryResult<DiscoveryRun> {
        let crawler = Crawler::new(self.store.clone(), self.probe.clone(), self.budget);
        match crawler.crawl(&run, seeds, visited).await {
            Ok(report) => {
                let CrawlStats { probed, routers, .. } = report.stats;
                match report.outcome {
                    CrawlOutcome::Exhausted => {
                        self.settle(run.id, RunStatus::Completed, None)?;
                        info!("run {}: completed ({probed} probed, {routers} routers)", run.id);
                    }
                    CrawlOutcome::BudgetExhausted(reason) => {
                        let message = format!("crawl budget exhausted: {reason}");
                        self.settle(run.id, RunStatus::Paused, Some(&message))?;
                        warn!("run {}: {message}", run.id);
                    }
                    CrawlOutcome::Interrupted(status) => {
                        info!("run {}: left as {status}", run.id);
                    }
                }
            }
            Err(e) => {
                error!("run {} failed: {e}", run.id);
                self.settle(run.id, RunStatus::Failed, Some(&e.to_string()))?;
            }
        }
        self.load(run.id)
    }

    /// Final transition out of RUNNING; a no-op when the run was paused or cancelled meanwhile.
    fn settle(&self, run_id: Uuid, to: RunStatus, message: Option<&str>) -> DiscoveryResult<()> {
        if !self.store.transition(run_id, &[RunStatus::Running], to, message)? {
            info!("run {run_id}: no longer RUNNING, keeping its status");
        }
        Ok(())
    }
}

fn validate_root(root: IpAddr) -> DiscoveryResult<()> {
    if is_crawlable(&fold_mapped(root)) {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidArgument(format!("{root} cannot be probed")))
    }
}
