use thiserror::Error;
use uuid::Uuid;

use crate::{
    network::{addr::AddrError, router::RouterId},
    topology::{probe::ProbeError, run::RunStatus, store::StoreError},
};

/// Errors surfaced by the run manager to its callers.
///
/// Per-device probe failures never show up here: they are recorded on the router row and the
/// crawl moves on.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A run is already RUNNING.
    #[error("run {0} is already running")]
    Conflict(Uuid),
    #[error("run {run_id} is {status}, cannot {operation}")]
    InvalidState {
        run_id: Uuid,
        status: RunStatus,
        operation: &'static str,
    },
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("router {router_id} not found in run {run_id}")]
    RouterNotFound { run_id: Uuid, router_id: RouterId },
    #[error(transparent)]
    InvalidAddress(#[from] AddrError),
    /// An out-of-band CLI probe reached nothing.
    #[error("device probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
