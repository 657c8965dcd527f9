/*!
SQLite persistence for discovery runs.

`TopologyStore` owns one connection behind a mutex. Every method is a short synchronous call; a node
(router, subnets, routes) is written in a single transaction so readers never see it half-written.
*/

use std::{
    collections::HashSet,
    net::IpAddr,
    path::Path,
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    data_aquisition::core::{CliCredential, SnmpVersion},
    network::{
        edge::{EdgeReason, TopologyEdge, UndirectedEdgeKey},
        route::{RouteEntry, RouteProtocol},
        router::{NewRouter, Router, RouterId, RouterNetwork, RouterRoute},
    },
    topology::{
        run::{DiscoveryRun, RunRequest, RunStatus, SnmpSettings},
        schema::SchemaManager,
    },
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("another run is already RUNNING")]
    ActiveRunExists,
    #[error("credential encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Subnet of a router together with the router's classification, as read in one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMembership {
    pub router_id: RouterId,
    pub is_router: bool,
    pub network: IpNetwork,
}

/// What a merge changed on an existing router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergedNode {
    pub new_networks: usize,
    pub new_routes: usize,
    /// Edges removed because the router is no longer classified as one
    pub dropped_edges: usize,
}

pub struct TopologyStore {
    conn: Mutex<Connection>,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Parse a TEXT column, reporting a conversion failure on that column.
fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation)
}

const RUN_COLUMNS: &str = "id, status, root_ip, snmp_community, snmp_version, cli_credentials, created_at, started_at, finished_at, error_message";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<DiscoveryRun> {
    let status: String = row.get(1)?;
    let status = RunStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, format!("unknown status {status}").into())
    })?;
    let version: String = row.get(4)?;
    let version = SnmpVersion::parse(&version).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, format!("unknown SNMP version {version}").into())
    })?;
    let credentials: String = row.get(5)?;
    let cli_credentials: Vec<CliCredential> = serde_json::from_str(&credentials)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(DiscoveryRun {
        id: parse_col(row, 0)?,
        status,
        root_ip: parse_col(row, 2)?,
        snmp: SnmpSettings::new(row.get::<_, String>(3)?, version),
        cli_credentials,
        created_at: timestamp(row.get(6)?),
        started_at: row.get::<_, Option<i64>>(7)?.map(timestamp),
        finished_at: row.get::<_, Option<i64>>(8)?.map(timestamp),
        error_message: row.get(9)?,
    })
}

const ROUTER_COLUMNS: &str =
    "id, run_id, ip, hostname, sys_descr, sys_object_id, vendor, model, is_router, score, reason, created_at";

fn router_from_row(row: &Row<'_>) -> rusqlite::Result<Router> {
    Ok(Router {
        id: row.get(0)?,
        run_id: parse_col(row, 1)?,
        ip: parse_col(row, 2)?,
        hostname: row.get(3)?,
        sys_descr: row.get(4)?,
        sys_object_id: row.get(5)?,
        vendor: row.get(6)?,
        model: row.get(7)?,
        is_router: row.get(8)?,
        score: row.get(9)?,
        reason: row.get(10)?,
        created_at: timestamp(row.get(11)?),
    })
}

fn insert_networks(conn: &Connection, run_id: Uuid, router_id: RouterId, networks: &[IpNetwork]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO router_networks (run_id, router_id, network) VALUES (?1, ?2, ?3)",
    )?;
    let mut added = 0;
    for network in networks {
        added += stmt.execute(params![run_id.to_string(), router_id, network.to_string()])?;
    }
    Ok(added)
}

fn insert_routes(conn: &Connection, run_id: Uuid, router_id: RouterId, routes: &[RouteEntry]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO router_routes (run_id, router_id, destination, next_hop, protocol, admin_distance, metric) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut added = 0;
    for route in routes {
        added += stmt.execute(params![
            run_id.to_string(),
            router_id,
            route.destination.to_string(),
            route.next_hop.map(|nh| nh.to_string()),
            route.protocol.label(),
            route.admin_distance,
            route.metric,
        ])?;
    }
    Ok(added)
}

impl TopologyStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        debug!("opening discovery store at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        // in-memory databases answer "memory" here
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute("PRAGMA synchronous=NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys=ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        SchemaManager::new(&conn).initialize()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert a run in `status` (PENDING or RUNNING). Fails with `ActiveRunExists` when the
    /// storage-level single-RUNNING constraint rejects it.
    pub fn create_run(&self, request: &RunRequest, status: RunStatus) -> StoreResult<DiscoveryRun> {
        let now = Utc::now();
        let run = DiscoveryRun {
            id: Uuid::new_v4(),
            status,
            root_ip: request.root_ip,
            snmp: request.snmp.clone(),
            cli_credentials: request.cli_credentials.clone(),
            created_at: timestamp(now.timestamp()),
            started_at: (status == RunStatus::Running).then(|| timestamp(now.timestamp())),
            finished_at: None,
            error_message: None,
        };
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO discovery_runs (id, status, root_ip, snmp_community, snmp_version, cli_credentials, created_at, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id.to_string(),
                status.as_str(),
                run.root_ip.to_string(),
                run.snmp.community,
                run.snmp.version.as_str(),
                serde_json::to_string(&run.cli_credentials)?,
                run.created_at.timestamp(),
                run.started_at.map(|t| t.timestamp()),
            ],
        );
        match inserted {
            Ok(_) => Ok(run),
            Err(e) if status == RunStatus::Running && is_constraint_violation(&e) => Err(StoreError::ActiveRunExists),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_run(&self, id: Uuid) -> StoreResult<Option<DiscoveryRun>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM discovery_runs WHERE id = ?1"),
                [id.to_string()],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn running_run(&self) -> StoreResult<Option<DiscoveryRun>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM discovery_runs WHERE status = 'RUNNING' LIMIT 1"),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> StoreResult<Vec<DiscoveryRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM discovery_runs ORDER BY created_at DESC, rowid DESC"
        ))?;
        let runs = stmt.query_map([], run_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Compare-and-set on the run status: moves the run to `to` only if it is currently in one of
    /// `from`. Returns whether the transition happened. Entering RUNNING stamps `started_at` and
    /// clears the previous error; entering a terminal state stamps `finished_at`.
    pub fn transition(
        &self,
        id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();
        let allowed = from.iter().map(|s| format!("'{}'", s.as_str())).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE discovery_runs SET status = ?1, error_message = ?2, \
             started_at = CASE WHEN ?1 = 'RUNNING' THEN ?3 ELSE started_at END, \
             finished_at = CASE WHEN ?1 IN ('COMPLETED', 'FAILED', 'CANCELLED') THEN ?3 \
                                WHEN ?1 = 'RUNNING' THEN NULL ELSE finished_at END \
             WHERE id = ?4 AND status IN ({allowed})"
        );
        match conn.execute(&sql, params![to.as_str(), error_message, now, id.to_string()]) {
            Ok(changed) => Ok(changed == 1),
            Err(e) if to == RunStatus::Running && is_constraint_violation(&e) => Err(StoreError::ActiveRunExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a visited node: router row, attached subnets and routes, in one transaction.
    pub fn record_node(
        &self,
        run_id: Uuid,
        ip: IpAddr,
        router: &NewRouter,
        networks: &[IpNetwork],
        routes: &[RouteEntry],
    ) -> StoreResult<Router> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let created_at = Utc::now().timestamp();
        tx.execute(
            "INSERT INTO routers (run_id, ip, hostname, sys_descr, sys_object_id, vendor, model, is_router, score, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run_id.to_string(),
                ip.to_string(),
                router.hostname,
                router.sys_descr,
                router.sys_object_id,
                router.vendor,
                router.model,
                router.is_router,
                router.score,
                router.reason,
                created_at,
            ],
        )?;
        let router_id = tx.last_insert_rowid();
        insert_networks(&tx, run_id, router_id, networks)?;
        insert_routes(&tx, run_id, router_id, routes)?;
        tx.commit()?;
        Ok(Router {
            id: router_id,
            run_id,
            ip,
            hostname: router.hostname.clone(),
            sys_descr: router.sys_descr.clone(),
            sys_object_id: router.sys_object_id.clone(),
            vendor: router.vendor.clone(),
            model: router.model.clone(),
            is_router: router.is_router,
            score: router.score,
            reason: router.reason.clone(),
            created_at: timestamp(created_at),
        })
    }

    /// Merge extra subnets and routes into an existing router and overwrite its classification,
    /// in one transaction. A router reclassified as a host loses its edges in the same
    /// transaction, so every stored edge keeps two router endpoints.
    pub fn merge_node(
        &self,
        run_id: Uuid,
        router_id: RouterId,
        router: &NewRouter,
        networks: &[IpNetwork],
        routes: &[RouteEntry],
    ) -> StoreResult<MergedNode> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE routers SET hostname = ?1, sys_descr = ?2, sys_object_id = ?3, vendor = ?4, model = ?5, \
             is_router = ?6, score = ?7, reason = ?8 WHERE id = ?9 AND run_id = ?10",
            params![
                router.hostname,
                router.sys_descr,
                router.sys_object_id,
                router.vendor,
                router.model,
                router.is_router,
                router.score,
                router.reason,
                router_id,
                run_id.to_string(),
            ],
        )?;
        let new_networks = insert_networks(&tx, run_id, router_id, networks)?;
        let new_routes = insert_routes(&tx, run_id, router_id, routes)?;
        let dropped_edges = if router.is_router {
            0
        } else {
            tx.execute(
                "DELETE FROM topology_edges WHERE run_id = ?1 AND (from_router_id = ?2 OR to_router_id = ?2)",
                params![run_id.to_string(), router_id],
            )?
        };
        tx.commit()?;
        if dropped_edges > 0 {
            debug!("router {router_id} is no longer a router, dropped {dropped_edges} edges");
        }
        Ok(MergedNode {
            new_networks,
            new_routes,
            dropped_edges,
        })
    }

    /// Addresses already probed in the run.
    pub fn visited_addresses(&self, run_id: Uuid) -> StoreResult<HashSet<IpAddr>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT ip FROM routers WHERE run_id = ?1")?;
        let visited = stmt
            .query_map([run_id.to_string()], |row| parse_col::<IpAddr>(row, 0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(visited)
    }

    pub fn routers(&self, run_id: Uuid) -> StoreResult<Vec<Router>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {ROUTER_COLUMNS} FROM routers WHERE run_id = ?1 ORDER BY id"))?;
        let routers = stmt
            .query_map([run_id.to_string()], router_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routers)
    }

    pub fn router(&self, run_id: Uuid, router_id: RouterId) -> StoreResult<Option<Router>> {
        let conn = self.lock()?;
        let router = conn
            .query_row(
                &format!("SELECT {ROUTER_COLUMNS} FROM routers WHERE run_id = ?1 AND id = ?2"),
                params![run_id.to_string(), router_id],
                router_from_row,
            )
            .optional()?;
        Ok(router)
    }

    pub fn router_by_ip(&self, run_id: Uuid, ip: IpAddr) -> StoreResult<Option<Router>> {
        let conn = self.lock()?;
        let router = conn
            .query_row(
                &format!("SELECT {ROUTER_COLUMNS} FROM routers WHERE run_id = ?1 AND ip = ?2"),
                params![run_id.to_string(), ip.to_string()],
                router_from_row,
            )
            .optional()?;
        Ok(router)
    }

    pub fn networks(&self, run_id: Uuid) -> StoreResult<Vec<RouterNetwork>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, run_id, router_id, network FROM router_networks WHERE run_id = ?1 ORDER BY id")?;
        let networks = stmt
            .query_map([run_id.to_string()], |row| {
                Ok(RouterNetwork {
                    id: row.get(0)?,
                    run_id: parse_col(row, 1)?,
                    router_id: row.get(2)?,
                    network: parse_col(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(networks)
    }

    /// Every subnet of the run joined with its router's classification. One statement, so the
    /// result is a consistent snapshot of committed nodes.
    pub fn network_memberships(&self, run_id: Uuid) -> StoreResult<Vec<NetworkMembership>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT n.router_id, r.is_router, n.network FROM router_networks n \
             JOIN routers r ON r.id = n.router_id WHERE n.run_id = ?1 ORDER BY n.id",
        )?;
        let memberships = stmt
            .query_map([run_id.to_string()], |row| {
                Ok(NetworkMembership {
                    router_id: row.get(0)?,
                    is_router: row.get(1)?,
                    network: parse_col(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memberships)
    }

    pub fn routes_of(&self, router_id: RouterId) -> StoreResult<Vec<RouterRoute>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, router_id, destination, next_hop, protocol, admin_distance, metric \
             FROM router_routes WHERE router_id = ?1 ORDER BY id",
        )?;
        let routes = stmt
            .query_map([router_id], |row| {
                Ok(RouterRoute {
                    id: row.get(0)?,
                    run_id: parse_col(row, 1)?,
                    router_id: row.get(2)?,
                    destination: parse_col(row, 3)?,
                    next_hop: parse_opt_col(row, 4)?,
                    protocol: RouteProtocol::from_label(&row.get::<_, String>(5)?),
                    admin_distance: row.get(6)?,
                    metric: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    /// Distinct next hops recorded in the run, in the order they were first stored.
    pub fn next_hops(&self, run_id: Uuid) -> StoreResult<Vec<IpAddr>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT next_hop FROM router_routes WHERE run_id = ?1 AND next_hop IS NOT NULL \
             GROUP BY next_hop ORDER BY MIN(id)",
        )?;
        let hops = stmt
            .query_map([run_id.to_string()], |row| parse_col::<IpAddr>(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hops)
    }

    /// Insert an edge unless the pair already has one. Returns whether a row was added.
    pub fn insert_edge(&self, run_id: Uuid, key: UndirectedEdgeKey, reason: EdgeReason) -> StoreResult<bool> {
        let conn = self.lock()?;
        let (from, to) = key.endpoints();
        let added = conn.execute(
            "INSERT OR IGNORE INTO topology_edges (run_id, from_router_id, to_router_id, reason) VALUES (?1, ?2, ?3, ?4)",
            params![run_id.to_string(), from, to, reason.as_str()],
        )?;
        Ok(added == 1)
    }

    pub fn edges(&self, run_id: Uuid) -> StoreResult<Vec<TopologyEdge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, from_router_id, to_router_id, reason FROM topology_edges WHERE run_id = ?1 ORDER BY id",
        )?;
        let edges = stmt
            .query_map([run_id.to_string()], |row| {
                let reason: String = row.get(4)?;
                Ok(TopologyEdge {
                    id: row.get(0)?,
                    run_id: parse_col(row, 1)?,
                    from_router_id: row.get(2)?,
                    to_router_id: row.get(3)?,
                    reason: EdgeReason::parse(&reason).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, format!("unknown edge reason {reason}").into())
                    })?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}
