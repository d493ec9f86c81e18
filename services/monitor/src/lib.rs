//! Monitor (C4): the fleet's telemetry sink. Accepts `register`/`heartbeat`/
//! `unregister`/`llm_usage` frames from Workers over a Unix socket, funnels
//! them through a bounded queue into a single writer task, and runs the
//! stale-worker and telemetry-retention sweeps.

mod server;
mod sweep;
mod work_item;
mod writer;

pub use work_item::WorkItem;
pub use writer::DroppedCounter;

use registry::Registry;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Queue capacity between network handlers and the writer task (§8 scenario
/// 5 uses 1000 as the example capacity).
const WORK_QUEUE_CAPACITY: usize = 1000;

/// Grace period for the writer to drain on shutdown (§5: "Monitor writer 5s").
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct MonitorParams {
    pub socket_path: std::path::PathBuf,
    pub registry_path: std::path::PathBuf,
    pub stale_timeout_secs: i64,
    pub stale_sweep_interval: Duration,
    pub retention_days: i64,
    pub retention_sweep_interval: Duration,
}

/// Run the Monitor until `shutdown` resolves to `true`. Exposed as a library
/// function (rather than inlined in `main`) so integration tests can drive a
/// real instance against a temp socket and an in-memory-equivalent registry.
pub async fn run(params: MonitorParams, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
    let registry = Registry::open(&params.registry_path).map_err(MonitorError::Registry)?;
    let registry = Arc::new(Mutex::new(registry));

    let (tx, rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
    let dropped = Arc::new(DroppedCounter::default());

    let writer_registry = registry.clone();
    let writer_handle = tokio::spawn(writer::run_writer(rx, writer_registry));

    let stale_handle = tokio::spawn(sweep::run_stale_sweep(
        registry.clone(),
        params.stale_sweep_interval,
        params.stale_timeout_secs,
        shutdown.clone(),
    ));
    let retention_handle = tokio::spawn(sweep::run_retention_sweep(
        registry.clone(),
        params.retention_sweep_interval,
        params.retention_days,
        shutdown.clone(),
    ));

    let accept_result = server::run_accept_loop(&params.socket_path, tx.clone(), dropped.clone(), shutdown.clone()).await;

    // Stop producing new work, then give the writer a grace period to drain
    // what is already queued (§5).
    drop(tx);
    let _ = tokio::time::timeout(WRITER_DRAIN_GRACE, writer_handle).await;
    let _ = stale_handle.await;
    let _ = retention_handle.await;

    info!(dropped_total = dropped.get(), "monitor shut down");
    accept_result.map_err(MonitorError::Io)
}

pub fn socket_path_from_config(cfg: &fleet_config::FleetConfig) -> std::path::PathBuf {
    Path::new(&cfg.socket_paths.monitor).to_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
