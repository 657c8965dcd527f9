//! SQLite schema of the discovery store.

use rusqlite::Connection;

pub const SCHEMA_VERSION: u32 = 2;

pub struct SchemaDefinitions;

impl SchemaDefinitions {
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS discovery_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#;

    pub const RUNS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS discovery_runs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'RUNNING', 'PAUSED', 'COMPLETED', 'FAILED', 'CANCELLED')),
            root_ip TEXT NOT NULL,
            snmp_community TEXT NOT NULL,
            snmp_version TEXT NOT NULL,
            cli_credentials TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER,
            error_message TEXT
        );
    "#;

    pub const ROUTERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS routers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES discovery_runs(id) ON DELETE CASCADE,
            ip TEXT NOT NULL,
            hostname TEXT,
            sys_descr TEXT,
            sys_object_id TEXT,
            vendor TEXT,
            model TEXT,
            is_router INTEGER NOT NULL,
            score INTEGER NOT NULL,
            reason TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (run_id, ip)
        );
    "#;

    pub const NETWORKS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS router_networks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES discovery_runs(id) ON DELETE CASCADE,
            router_id INTEGER NOT NULL REFERENCES routers(id) ON DELETE CASCADE,
            network TEXT NOT NULL,
            UNIQUE (router_id, network)
        );
    "#;

    pub const ROUTES_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS router_routes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES discovery_runs(id) ON DELETE CASCADE,
            router_id INTEGER NOT NULL REFERENCES routers(id) ON DELETE CASCADE,
            destination TEXT NOT NULL,
            next_hop TEXT,
            protocol TEXT NOT NULL,
            admin_distance INTEGER,
            metric INTEGER
        );
    "#;

    pub const EDGES_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS topology_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES discovery_runs(id) ON DELETE CASCADE,
            from_router_id INTEGER NOT NULL REFERENCES routers(id) ON DELETE CASCADE,
            to_router_id INTEGER NOT NULL REFERENCES routers(id) ON DELETE CASCADE,
            reason TEXT NOT NULL,
            CHECK (from_router_id < to_router_id),
            UNIQUE (run_id, from_router_id, to_router_id)
        );
    "#;

    pub const INDEXES: &'static [&'static str] = &[
        // at most one run may be RUNNING
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_discovery_runs_single_running ON discovery_runs(status) WHERE status = 'RUNNING'",
        "CREATE INDEX IF NOT EXISTS idx_routers_run ON routers(run_id)",
        "CREATE INDEX IF NOT EXISTS idx_router_networks_run ON router_networks(run_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_router_routes_unique ON router_routes(router_id, destination, IFNULL(next_hop, ''))",
        "CREATE INDEX IF NOT EXISTS idx_router_routes_run ON router_routes(run_id)",
        "CREATE INDEX IF NOT EXISTS idx_topology_edges_run ON topology_edges(run_id)",
    ];
}

/// Creates tables and indexes that don't exist yet.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn initialize(&self) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for table in [
            SchemaDefinitions::META_TABLE,
            SchemaDefinitions::RUNS_TABLE,
            SchemaDefinitions::ROUTERS_TABLE,
            SchemaDefinitions::NETWORKS_TABLE,
            SchemaDefinitions::ROUTES_TABLE,
            SchemaDefinitions::EDGES_TABLE,
        ] {
            tx.execute(table, [])?;
        }
        // version 1 stores lack the object id
        if !Self::has_column(&tx, "routers", "sys_object_id")? {
            tx.execute("ALTER TABLE routers ADD COLUMN sys_object_id TEXT", [])?;
        }
        for index in SchemaDefinitions::INDEXES {
            tx.execute(index, [])?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO discovery_meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )?;
        tx.commit()
    }

    fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|name| name == column))
    }

    pub fn schema_version(&self) -> rusqlite::Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM discovery_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(version.and_then(|v| v.parse().ok()))
    }
}
