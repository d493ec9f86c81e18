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

    info!(version = env!("CARGO_PKG_VERSION"), "monitor starting");

    let cfg = match fleet_config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = monitor::MonitorParams {
        socket_path: monitor::socket_path_from_config(&cfg),
        registry_path: std::path::PathBuf::from("/var/lib/fleet/registry.sqlite3"),
        stale_timeout_secs: cfg.stale_timeout_secs as i64,
        stale_sweep_interval: Duration::from_secs(10),
        retention_days: cfg.data_retention_days,
        retention_sweep_interval: Duration::from_secs(24 * 60 * 60),
    };

    let run = monitor::run(params, shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                eprintln!("monitor exited with error: {e}");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            let _ = run.await;
        }
    }
    info!("monitor shut down gracefully");
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
