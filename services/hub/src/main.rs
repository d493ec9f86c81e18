use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hub starting");

    let cfg = match fleet_config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // TODO(credential-store): wire up an HTTP-backed CredentialStore against
    // `cfg.credential_store_endpoint` once that service exists; credential
    // storage itself is out of this fleet's scope.
    let credentials: Arc<dyn credentials::CredentialStore> =
        Arc::new(credentials::InMemoryCredentialStore::new());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = hub::HubParams {
        socket_path: hub::socket_path_from_config(&cfg),
        registry_path: std::path::PathBuf::from("/var/lib/fleet/registry.sqlite3"),
        upstream_ws_url: cfg.eventsub_ws_url,
        upstream_http_base_url: cfg.eventsub_http_base_url,
        handshake_timeout: Duration::from_secs(cfg.session_handshake_timeout_secs),
        ws_backoff_base_secs: cfg.ws_backoff_base_secs,
        ws_backoff_max_secs: cfg.ws_backoff_max_secs,
        eventsub_reconcile_interval: Duration::from_secs(cfg.eventsub_reconcile_interval_secs),
        eventsub_req_rate_per_s: cfg.eventsub_req_rate_per_s,
        eventsub_req_jitter_ms: cfg.eventsub_req_jitter_ms,
        max_cost_retry_attempts: cfg.max_cost_retry_attempts,
    };

    let run = hub::run(params, credentials, shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                eprintln!("hub exited with error: {e}");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            let _ = run.await;
        }
    }
    info!("hub shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
