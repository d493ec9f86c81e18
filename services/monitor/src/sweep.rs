use registry::Registry;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Periodic stale-worker sweep (§4.2: "flips any WorkerRegistration whose
/// last_heartbeat age exceeds stale_timeout to stale"). Runs until `shutdown`
/// resolves.
pub async fn run_stale_sweep(
    registry: Arc<Mutex<Registry>>,
    sweep_interval: Duration,
    stale_timeout_secs: i64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let flipped = {
                    let mut reg = registry.lock().unwrap();
                    reg.sweep_stale_workers(stale_timeout_secs)
                };
                match flipped {
                    Ok(channels) if !channels.is_empty() => {
                        info!(count = channels.len(), "flipped stale worker registrations");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "stale sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Daily retention sweep (§4.2: "Metric and telemetry rows older than
/// data_retention_days are removed on a daily sweep").
pub async fn run_retention_sweep(
    registry: Arc<Mutex<Registry>>,
    sweep_interval: Duration,
    retention_days: i64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pruned = {
                    let mut reg = registry.lock().unwrap();
                    reg.prune_telemetry_older_than(retention_days)
                };
                match pruned {
                    Ok(n) if n > 0 => info!(rows = n, "pruned expired telemetry/metric rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
