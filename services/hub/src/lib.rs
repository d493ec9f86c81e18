//! EventSub Hub (C7): owns the single upstream EventSub session, reconciles
//! the Desired/Active subscription sets against it, and routes notifications
//! to Worker connections over a Unix socket.

mod ipc_server;
mod limiter;
mod reconcile;
mod route_table;
mod session_manager;

pub use route_table::RouteTable;
pub use session_manager::SessionHandle;

use credentials::CredentialStore;
use ipc_protocol::Backoff;
use registry::Registry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub struct HubParams {
    pub socket_path: PathBuf,
    pub registry_path: PathBuf,
    pub upstream_ws_url: String,
    pub upstream_http_base_url: String,
    pub handshake_timeout: Duration,
    pub ws_backoff_base_secs: u64,
    pub ws_backoff_max_secs: u64,
    pub eventsub_reconcile_interval: Duration,
    pub eventsub_req_rate_per_s: f64,
    pub eventsub_req_jitter_ms: u64,
    pub max_cost_retry_attempts: u32,
}

/// Run the Hub until `shutdown` resolves to `true`.
pub async fn run(
    params: HubParams,
    credentials: Arc<dyn CredentialStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), HubError> {
    let registry = Registry::open(&params.registry_path).map_err(HubError::Registry)?;
    let registry = Arc::new(Mutex::new(registry));

    let route_table = RouteTable::new();
    let session_handle = Arc::new(SessionHandle::default());
    let (trigger_tx, trigger_rx) = reconcile::trigger_channel();

    let session_cfg = session_manager::SessionManagerConfig {
        initial_url: params.upstream_ws_url,
        handshake_timeout: params.handshake_timeout,
        backoff: Backoff::new(
            Duration::from_secs(params.ws_backoff_base_secs),
            Duration::from_secs(params.ws_backoff_max_secs),
            2,
            0.25,
        ),
    };
    let session_handle_for_manager = session_handle.clone();
    let route_table_for_manager = route_table.clone();
    let registry_for_manager = registry.clone();
    let shutdown_for_manager = shutdown.clone();
    let session_task = tokio::spawn(async move {
        session_manager::run(
            session_cfg,
            session_handle_for_manager,
            route_table_for_manager,
            registry_for_manager,
            shutdown_for_manager,
        )
        .await;
    });

    let reconcile_cfg = reconcile::ReconcileConfig {
        base_url: params.upstream_http_base_url,
        rate_per_s: params.eventsub_req_rate_per_s,
        jitter_ms: params.eventsub_req_jitter_ms,
        max_cost_retry_attempts: params.max_cost_retry_attempts,
        reconcile_interval: params.eventsub_reconcile_interval,
    };
    let registry_for_reconcile = registry.clone();
    let session_handle_for_reconcile = session_handle.clone();
    let shutdown_for_reconcile = shutdown.clone();
    let reconcile_task = tokio::spawn(reconcile::run(
        reconcile_cfg,
        registry_for_reconcile,
        session_handle_for_reconcile,
        credentials,
        trigger_rx,
        shutdown_for_reconcile,
    ));

    let ipc_result = ipc_server::run_accept_loop(
        params.socket_path,
        registry.clone(),
        route_table,
        trigger_tx,
        shutdown,
    )
    .await;

    let _ = session_task.await;
    let _ = reconcile_task.await;

    info!("hub shut down");
    ipc_result.map_err(HubError::Io)
}

pub fn socket_path_from_config(cfg: &fleet_config::FleetConfig) -> PathBuf {
    Path::new(&cfg.socket_paths.hub).to_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
