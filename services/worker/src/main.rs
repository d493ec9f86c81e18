use clap::{Arg, Command};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use worker::{LoggingEventHandler, NoopChatTransport};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("Worker")
        .arg(
            Arg::new("channel")
                .long("channel")
                .required(true)
                .help("Twitch login name of the channel this worker runs for"),
        )
        .arg(
            Arg::new("channel-id")
                .long("channel-id")
                .required(true)
                .help("Numeric broadcaster id for the channel"),
        )
        .get_matches();

    let channel = matches.get_one::<String>("channel").unwrap().clone();
    let channel_id = matches.get_one::<String>("channel-id").unwrap().clone();

    info!(version = env!("CARGO_PKG_VERSION"), %channel, "worker starting");

    let cfg = match fleet_config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = worker::WorkerParams {
        channel,
        channel_id,
        topics: vec!["stream.online".to_owned(), "stream.offline".to_owned()],
        hub_socket_path: std::path::PathBuf::from(&cfg.socket_paths.hub),
        monitor_socket_path: std::path::PathBuf::from(&cfg.socket_paths.monitor),
        heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval_secs),
    };

    let handler: Arc<dyn worker::EventHandler> = Arc::new(LoggingEventHandler);
    let transport: Arc<dyn worker::ChatTransport> = Arc::new(NoopChatTransport);

    let run = worker::run(params, handler, transport, shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            run.await;
        }
    }
    info!("worker shut down gracefully");
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
