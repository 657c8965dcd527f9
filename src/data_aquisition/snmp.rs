use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use snmp2::{AsyncSession, Oid};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    data_aquisition::{
        core::{DeviceValue, SnmpProbe, SnmpTarget, SnmpVersion, oid_to_string},
        mib::{self, MibTable},
    },
    network::{
        route::{InterfaceAddress, RouteEntry, dedup_routes},
        router::SystemInfo,
    },
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SnmpClientError {
    #[error("failed to parse OID")]
    OidParseError,
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("SNMP error: {0:?}")]
    Snmp2Error(snmp2::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("invalid query")]
    InvalidQuery,
    #[error("GET and GETNEXT take exactly one OID")]
    MultipleOidsOnGet,
    #[error("no value for {0}")]
    NoValue(String),
}

/// One OID/value pair of a response, detached from the session buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Varbind {
    pub oid: Vec<u64>,
    pub value: DeviceValue,
}

fn to_oid(components: &[u64]) -> Result<Oid<'static>, SnmpClientError> {
    Oid::from(components).map_err(|_| SnmpClientError::OidParseError)
}

/// Where and how a session is opened.
#[derive(Debug, Clone)]
struct SessionEndpoint {
    address: SocketAddr,
    community: String,
    snmp_version: SnmpVersion,
}

impl SessionEndpoint {
    async fn open(&self) -> Result<AsyncSession, SnmpClientError> {
        let session = match self.snmp_version {
            SnmpVersion::V1 => AsyncSession::new_v1(self.address, self.community.as_bytes(), 0).await,
            SnmpVersion::V2c => AsyncSession::new_v2c(self.address, self.community.as_bytes(), 0).await,
        }?;
        Ok(session)
    }
}

/// SNMP client for retrieving data from a network device.
///
/// The session is opened lazily and reused across queries. A request that times out or fails on
/// the socket drops it, so a retry goes out from a fresh socket and cannot pick up a late answer
/// to the abandoned request.
pub struct SnmpClient {
    endpoint: SessionEndpoint,
    timeout: Duration,
    retries: u32,
    session: Arc<Mutex<Option<AsyncSession>>>,
}

impl SnmpClient {
    /// Creates a new SNMP client for a single network device.
    pub fn new(address: SocketAddr, community: &str, snmp_version: SnmpVersion) -> Self {
        Self {
            endpoint: SessionEndpoint {
                address,
                community: community.to_string(),
                snmp_version,
            },
            timeout: DEFAULT_TIMEOUT,
            retries: 1,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, retries: u32) -> Self {
        self.timeout = timeout;
        self.retries = retries;
        self
    }

    /// Start building a new query.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder {
            endpoint: self.endpoint.clone(),
            session: self.session.clone(),
            oids: Vec::new(),
            operation: None,
            timeout: self.timeout,
            retries: self.retries,
        }
    }

    /// GET a single scalar.
    pub async fn get(&mut self, oid: &[u64]) -> Result<Varbind, SnmpClientError> {
        let response = self.query().oid(to_oid(oid)?).get().execute().await?;
        response
            .into_iter()
            .find(|vb| !vb.value.is_exception())
            .ok_or_else(|| SnmpClientError::NoValue(oid_to_string(oid)))
    }

    /// Walk the subtree below `base`, using GETBULK on v2c and GETNEXT on v1.
    pub async fn walk(
        &mut self,
        base: &[u64],
        max_repetitions: u32,
        max_rows: usize,
    ) -> Result<Vec<Varbind>, SnmpClientError> {
        let mut out: Vec<Varbind> = Vec::new();
        let mut cursor = base.to_vec();
        loop {
            let query = self.query().oid(to_oid(&cursor)?);
            let query = match self.endpoint.snmp_version {
                SnmpVersion::V1 => query.get_next(),
                SnmpVersion::V2c => query.get_bulk(0, max_repetitions),
            };
            let batch = match query.execute().await {
                Ok(batch) => batch,
                // v1 agents signal the end of the MIB with noSuchName
                Err(SnmpClientError::Snmp2Error(e))
                    if self.endpoint.snmp_version == SnmpVersion::V1 && !out.is_empty() =>
                {
                    debug!("walk {} ended with {e:?}", oid_to_string(base));
                    return Ok(out);
                }
                Err(e) => return Err(e),
            };
            if batch.is_empty() {
                return Ok(out);
            }
            for vb in batch {
                if vb.value.is_exception() || !vb.oid.starts_with(base) || vb.oid <= cursor {
                    return Ok(out);
                }
                cursor = vb.oid.clone();
                out.push(vb);
                if out.len() >= max_rows {
                    warn!(
                        "walk of {} on {} stopped after {max_rows} rows",
                        oid_to_string(base),
                        self.endpoint.address
                    );
                    return Ok(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Get,
    GetNext,
    GetBulk { non_repeaters: u32, max_repetitions: u32 },
}

pub struct QueryBuilder {
    endpoint: SessionEndpoint,
    session: Arc<Mutex<Option<AsyncSession>>>,
    oids: Vec<Oid<'static>>,
    operation: Option<Operation>,
    timeout: Duration,
    retries: u32,
}

impl QueryBuilder {
    pub fn get(mut self) -> Self {
        self.operation = Some(Operation::Get);
        self
    }

    pub fn get_next(mut self) -> Self {
        self.operation = Some(Operation::GetNext);
        self
    }

    pub fn get_bulk(mut self, non_repeaters: u32, max_repetitions: u32) -> Self {
        self.operation = Some(Operation::GetBulk {
            non_repeaters,
            max_repetitions,
        });
        self
    }

    pub fn oid(mut self, oid: Oid<'static>) -> Self {
        self.oids.push(oid);
        self
    }

    /// Send the request, retrying after a timeout or transport error up to `retries` times.
    pub async fn execute(self) -> Result<Vec<Varbind>, SnmpClientError> {
        let operation = self.operation.ok_or(SnmpClientError::InvalidQuery)?;
        if self.oids.is_empty() {
            return Err(SnmpClientError::InvalidQuery);
        }
        if matches!(operation, Operation::Get | Operation::GetNext) && self.oids.len() != 1 {
            return Err(SnmpClientError::MultipleOidsOnGet);
        }

        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.timeout, self.send(operation)).await;
            let error = match outcome {
                Ok(Ok(varbinds)) => return Ok(varbinds),
                Ok(Err(e)) => e,
                Err(_) => SnmpClientError::Timeout(self.timeout),
            };
            if attempt >= self.retries {
                return Err(error);
            }
            attempt += 1;
            let jitter = rand::rng().random_range(0..100u64);
            debug!("SNMP request failed ({error}), retry {attempt}/{}", self.retries);
            tokio::time::sleep(Duration::from_millis(50 + jitter)).await;
        }
    }

    /// One request on the cached session, opening it first if needed. The session is only put
    /// back after a reply or an SNMP-level error; a cancelled request drops it with the future.
    async fn send(&self, operation: Operation) -> Result<Vec<Varbind>, SnmpClientError> {
        let mut slot = self.session.lock().await;
        let mut session = match slot.take() {
            Some(session) => session,
            None => self.endpoint.open().await?,
        };
        let outcome = self.request(&mut session, operation).await;
        if !matches!(outcome, Err(SnmpClientError::IoError(_))) {
            *slot = Some(session);
        }
        outcome
    }

    async fn request(&self, session: &mut AsyncSession, operation: Operation) -> Result<Vec<Varbind>, SnmpClientError> {
        let response = match operation {
            Operation::Get => session.get(&self.oids[0]).await,
            Operation::GetNext => session.getnext(&self.oids[0]).await,
            Operation::GetBulk {
                non_repeaters,
                max_repetitions,
            } => {
                let oid_refs: Vec<&Oid> = self.oids.iter().collect();
                session.getbulk(&oid_refs, non_repeaters, max_repetitions).await
            }
        }
        .map_err(SnmpClientError::Snmp2Error)?;

        let varbinds = response
            .varbinds
            .filter_map(|(oid, value)| {
                let components: Vec<u64> = oid.iter()?.collect();
                Some(Varbind {
                    oid: components,
                    value: DeviceValue::from(&value),
                })
            })
            .collect();
        Ok(varbinds)
    }
}

/// A utility struct representing a single row of an SNMP table.
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpTableRow {
    pub row_index_suffix: Vec<u64>,
    /// Column number -> value
    pub columns: HashMap<u64, DeviceValue>,
}

impl SnmpTableRow {
    /// Group walked varbinds of `<table_entry>.<column>.<index>` into rows keyed by index.
    /// Rows come back ordered by index.
    pub fn group_into_rows(
        varbinds: Vec<Varbind>,
        table_entry: &[u64],
        column_id_component_length: usize,
    ) -> Vec<SnmpTableRow> {
        let split = table_entry.len() + column_id_component_length;
        let mut rows_map: HashMap<Vec<u64>, HashMap<u64, DeviceValue>> = HashMap::new();

        for vb in varbinds
            .into_iter()
            .filter(|vb| vb.oid.starts_with(table_entry) && vb.oid.len() > split)
        {
            let column = vb.oid[split - 1];
            let index = vb.oid[split..].to_vec();
            rows_map.entry(index).or_default().insert(column, vb.value);
        }

        let mut rows: Vec<SnmpTableRow> = rows_map
            .into_iter()
            .map(|(row_index_suffix, columns)| SnmpTableRow {
                row_index_suffix,
                columns,
            })
            .collect();
        rows.sort_by(|a, b| a.row_index_suffix.cmp(&b.row_index_suffix));
        rows
    }
}

/// SNMP side of a device probe: timeouts, retries and walk limits shared by every target.
#[derive(Debug, Clone)]
pub struct SnmpPoller {
    pub port: u16,
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
    pub max_walk_rows: usize,
}

impl Default for SnmpPoller {
    fn default() -> Self {
        Self {
            port: 161,
            timeout: DEFAULT_TIMEOUT,
            retries: 1,
            max_repetitions: 25,
            max_walk_rows: 10_000,
        }
    }
}

impl SnmpPoller {
    fn client(&self, target: &SnmpTarget) -> SnmpClient {
        SnmpClient::new(
            SocketAddr::new(target.address, self.port),
            &target.community,
            target.version,
        )
        .with_timeout(self.timeout, self.retries)
    }

    async fn walk_table(
        &self,
        client: &mut SnmpClient,
        table: &MibTable,
    ) -> Result<Vec<SnmpTableRow>, SnmpClientError> {
        let mut varbinds = Vec::new();
        for column in table.columns {
            let column_oid = table.column_oid(*column);
            varbinds.extend(
                client
                    .walk(&column_oid, self.max_repetitions, self.max_walk_rows)
                    .await?,
            );
        }
        Ok(SnmpTableRow::group_into_rows(varbinds, table.entry, 1))
    }
}

#[async_trait]
impl SnmpProbe for SnmpPoller {
    async fn system_info(&self, target: &SnmpTarget) -> Result<SystemInfo, SnmpClientError> {
        let mut client = self.client(target);
        // sysDescr decides reachability; the other two are optional on some agents
        let mut varbinds = vec![client.get(mib::SYS_DESCR).await?];
        for oid in [mib::SYS_OBJECT_ID, mib::SYS_NAME] {
            match client.get(oid).await {
                Ok(vb) => varbinds.push(vb),
                Err(e) => debug!("{}: {} unavailable: {e}", target.address, oid_to_string(oid)),
            }
        }
        Ok(mib::system_info_from(&varbinds))
    }

    async fn ip_forwarding(&self, target: &SnmpTarget) -> Result<bool, SnmpClientError> {
        let mut client = self.client(target);
        let varbind = client.get(mib::IP_FORWARDING).await?;
        mib::forwarding_from(std::slice::from_ref(&varbind))
            .ok_or_else(|| SnmpClientError::NoValue(oid_to_string(mib::IP_FORWARDING)))
    }

    async fn interface_addresses(&self, target: &SnmpTarget) -> Result<Vec<InterfaceAddress>, SnmpClientError> {
        let mut client = self.client(target);
        let rows = self.walk_table(&mut client, &mib::IP_ADDR_TABLE).await?;
        let interfaces = mib::interfaces_from_ip_addr_table(&rows);
        if !interfaces.is_empty() {
            return Ok(interfaces);
        }
        let rows = self.walk_table(&mut client, &mib::IP_ADDRESS_TABLE).await?;
        Ok(mib::interfaces_from_ip_address_table(&rows))
    }

    async fn routing_table(&self, target: &SnmpTarget) -> Result<Vec<RouteEntry>, SnmpClientError> {
        let mut client = self.client(target);
        let mut last_error = None;
        for table in mib::ROUTE_TABLES.iter() {
            match self.walk_table(&mut client, table).await {
                Ok(rows) => {
                    let routes = mib::routes_from_table(table, &rows);
                    if !routes.is_empty() {
                        debug!(
                            "{}: {} routes from {}",
                            target.address,
                            routes.len(),
                            oid_to_string(table.entry)
                        );
                        return Ok(dedup_routes(routes));
                    }
                }
                Err(e) => {
                    debug!("{}: walk of {} failed: {e}", target.address, oid_to_string(table.entry));
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            // every table failed: report it, otherwise the device simply has no routes over SNMP
            Some(e) if matches!(e, SnmpClientError::Timeout(_) | SnmpClientError::IoError(_)) => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}
