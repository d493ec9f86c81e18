//! Reconciliation loop (§4.5.2): diffs Desired against Active and drives the
//! upstream CREATE/DELETE calls through the rate limiter.

use crate::limiter::RateLimiter;
use crate::session_manager::SessionHandle;
use credentials::CredentialStore;
use eventsub_client::{CreateError, DeleteError, EventSubHttpClient, EventSubHttpConfig};
use registry::{ActiveStatus, ActiveSubscription, DesiredSubscription, Registry};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Exponential delay schedule for the cost-exceeded retry queue (§4.5.2 step 7).
const COST_RETRY_DELAYS_SECS: [u64; 5] = [30, 60, 120, 240, 300];

pub struct ReconcileConfig {
    pub base_url: String,
    pub rate_per_s: f64,
    pub jitter_ms: u64,
    pub max_cost_retry_attempts: u32,
    pub reconcile_interval: Duration,
}

struct CostRetryItem {
    desired: DesiredSubscription,
    attempts: u32,
    next_attempt: Instant,
}

/// Coalescing on-demand trigger: the IPC server and revocation handling send
/// on this to request a run as soon as the current one finishes, without
/// piling up duplicate requests (§4.5.2: "at most one run in-flight; a
/// pending request becomes the next run").
pub fn trigger_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

pub async fn run(
    cfg: ReconcileConfig,
    registry: Arc<Mutex<Registry>>,
    session_handle: Arc<SessionHandle>,
    credentials: Arc<dyn CredentialStore>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut limiter = RateLimiter::new(cfg.rate_per_s, cfg.jitter_ms);
    let mut ticker = tokio::time::interval(cfg.reconcile_interval);
    let mut retry_queue: Vec<CostRetryItem> = Vec::new();
    let mut last_generation = session_handle.generation();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = trigger_rx.recv() => {
                // Drain any further coalesced requests that piled up.
                while trigger_rx.try_recv().is_ok() {}
            }
            _ = session_handle.changed.notified() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        if *shutdown.borrow() {
            return;
        }

        let generation = session_handle.generation();
        let force_recreate = generation != last_generation;
        last_generation = generation;

        run_once(
            &cfg,
            &registry,
            &session_handle,
            credentials.as_ref(),
            &mut limiter,
            &mut retry_queue,
            force_recreate,
            &mut shutdown,
        )
        .await;
    }
}

async fn run_once(
    cfg: &ReconcileConfig,
    registry: &Arc<Mutex<Registry>>,
    session_handle: &SessionHandle,
    credentials: &(dyn CredentialStore),
    limiter: &mut RateLimiter,
    retry_queue: &mut Vec<CostRetryItem>,
    force_recreate: bool,
    shutdown: &mut watch::Receiver<bool>,
) {
    let Some(session_id) = session_handle.current() else {
        return;
    };

    let (desired, active) = match registry.lock().unwrap().snapshot() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to read registry snapshot, skipping reconcile");
            return;
        }
    };
    let _ = registry.lock().unwrap().set_hub_state("last_reconcile_ts", &registry::now_rfc3339());

    let (to_delete, to_create) = if force_recreate {
        info!("session changed, recreating every active subscription");
        (active, desired)
    } else {
        let mut to_delete: Vec<ActiveSubscription> = active
            .iter()
            .filter(|a| !desired.iter().any(|d| d.channel_id == a.channel_id && d.topic == a.topic))
            .cloned()
            .collect();
        let mut to_create: Vec<DesiredSubscription> = desired
            .iter()
            .filter(|d| !active.iter().any(|a| a.channel_id == d.channel_id && a.topic == d.topic))
            .cloned()
            .collect();

        // Tie-break: a Desired row whose Active counterpart exists but is in
        // a terminal failure state is a recreation, not a no-op.
        for d in &desired {
            if let Some(a) = active
                .iter()
                .find(|a| a.channel_id == d.channel_id && a.topic == d.topic)
            {
                if a.status == ActiveStatus::Failed {
                    to_delete.push(a.clone());
                    to_create.push(d.clone());
                }
            }
        }
        (to_delete, to_create)
    };

    for active_sub in &to_delete {
        if *shutdown.borrow() {
            return;
        }
        limiter.acquire().await;
        delete_one(registry, credentials, &cfg.base_url, active_sub).await;
    }

    for desired_sub in &to_create {
        if *shutdown.borrow() {
            return;
        }
        limiter.acquire().await;
        create_one(registry, credentials, &cfg.base_url, &session_id, desired_sub, retry_queue).await;
    }

    drain_retry_queue(
        registry,
        credentials,
        &cfg.base_url,
        &session_id,
        limiter,
        retry_queue,
        cfg.max_cost_retry_attempts,
        shutdown,
    )
    .await;
}

async fn delete_one(
    registry: &Arc<Mutex<Registry>>,
    credentials: &(dyn CredentialStore),
    base_url: &str,
    active_sub: &ActiveSubscription,
) {
    let cred = match credentials.get(&active_sub.channel_id).await {
        Ok(c) => c,
        Err(e) => {
            warn!(channel_id = %active_sub.channel_id, error = %e, "no credential for delete, skipping");
            return;
        }
    };
    let client = match EventSubHttpClient::new(
        EventSubHttpConfig { base_url: base_url.to_owned() },
        &cred.access_token,
    ) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build eventsub http client");
            return;
        }
    };
    match client.delete(&active_sub.upstream_id).await {
        Ok(()) | Err(DeleteError::NotFound) => {
            let mut reg = registry.lock().unwrap();
            let _ = reg.delete_active(&active_sub.channel_id, &active_sub.topic);
            let _ = reg.append_audit(
                "eventsub_subscription_deleted",
                &format!("channel_id={} topic={}", active_sub.channel_id, active_sub.topic),
            );
        }
        Err(e) => {
            warn!(channel_id = %active_sub.channel_id, topic = %active_sub.topic, error = %e, "delete failed");
            let mut reg = registry.lock().unwrap();
            let _ = reg.append_audit(
                "eventsub_delete_failed",
                &format!("channel_id={} topic={} error={}", active_sub.channel_id, active_sub.topic, e),
            );
        }
    }
}

/// Drops the durable `needs_reauth:{channel_id}` flag once a create call
/// succeeds for that channel, since a successful call proves the credential
/// is usable again.
fn clear_needs_reauth(reg: &mut Registry, channel_id: &str) {
    if reg.get_hub_state(&format!("needs_reauth:{channel_id}")).ok().flatten().is_some() {
        let _ = reg.set_hub_state(&format!("needs_reauth:{channel_id}"), "0");
    }
}

async fn create_one(
    registry: &Arc<Mutex<Registry>>,
    credentials: &(dyn CredentialStore),
    base_url: &str,
    session_id: &str,
    desired_sub: &DesiredSubscription,
    retry_queue: &mut Vec<CostRetryItem>,
) {
    let cred = match credentials.get(&desired_sub.channel_id).await {
        Ok(c) => c,
        Err(e) => {
            warn!(channel_id = %desired_sub.channel_id, error = %e, "no credential for create, skipping");
            return;
        }
    };
    let client = match EventSubHttpClient::new(
        EventSubHttpConfig { base_url: base_url.to_owned() },
        &cred.access_token,
    ) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build eventsub http client");
            return;
        }
    };
    match client.create(&desired_sub.topic, &desired_sub.channel_id, session_id).await {
        Ok(result) => {
            let mut reg = registry.lock().unwrap();
            let _ = reg.upsert_active(
                &desired_sub.channel_id,
                &desired_sub.topic,
                &result.upstream_id,
                ActiveStatus::Enabled,
                result.cost,
            );
            let _ = reg.append_audit(
                "eventsub_subscription_created",
                &format!("channel_id={} topic={}", desired_sub.channel_id, desired_sub.topic),
            );
            clear_needs_reauth(&mut reg, &desired_sub.channel_id);
        }
        Err(CreateError::CostExceeded) => {
            info!(channel_id = %desired_sub.channel_id, topic = %desired_sub.topic, "cost exceeded, queued for retry");
            retry_queue.push(CostRetryItem {
                desired: desired_sub.clone(),
                attempts: 1,
                next_attempt: Instant::now() + Duration::from_secs(COST_RETRY_DELAYS_SECS[0]),
            });
        }
        Err(CreateError::CredentialInvalid) => {
            warn!(channel_id = %desired_sub.channel_id, "credential invalid, marking needs_reauth");
            credentials.mark_needs_reauth(&desired_sub.channel_id).await;
            let mut reg = registry.lock().unwrap();
            // Persisted (not just in the in-process CredentialStore) so the
            // Supervisor, a separate process, can see it too (§7).
            let _ = reg.set_hub_state(&format!("needs_reauth:{}", desired_sub.channel_id), "1");
            let _ = reg.append_audit(
                "eventsub_credential_invalid",
                &format!("channel_id={}", desired_sub.channel_id),
            );
        }
        Err(e) => {
            warn!(channel_id = %desired_sub.channel_id, topic = %desired_sub.topic, error = %e, "create failed");
            let mut reg = registry.lock().unwrap();
            let _ = reg.append_audit(
                "eventsub_create_failed",
                &format!("channel_id={} topic={} error={}", desired_sub.channel_id, desired_sub.topic, e),
            );
        }
    }
}

async fn drain_retry_queue(
    registry: &Arc<Mutex<Registry>>,
    credentials: &(dyn CredentialStore),
    base_url: &str,
    session_id: &str,
    limiter: &mut RateLimiter,
    retry_queue: &mut Vec<CostRetryItem>,
    max_cost_retry_attempts: u32,
    shutdown: &mut watch::Receiver<bool>,
) {
    // Never exceed the delay table even if configured higher; never let a
    // misconfigured 0 stop the first attempt from being scheduled.
    let max_attempts = (max_cost_retry_attempts as usize).clamp(1, COST_RETRY_DELAYS_SECS.len());
    let now = Instant::now();
    let due: Vec<usize> = retry_queue
        .iter()
        .enumerate()
        .filter(|(_, item)| item.next_attempt <= now)
        .map(|(i, _)| i)
        .collect();

    // Process the oldest due entry first, one per reconcile pass, never
    // re-enqueuing faster than the limiter allows.
    for idx in due {
        if *shutdown.borrow() {
            return;
        }
        let item = &retry_queue[idx];
        let cred = match credentials.get(&item.desired.channel_id).await {
            Ok(c) => c,
            Err(_) => continue,
        };
        limiter.acquire().await;
        let client = match EventSubHttpClient::new(
            EventSubHttpConfig { base_url: base_url.to_owned() },
            &cred.access_token,
        ) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let result = client
            .create(&item.desired.topic, &item.desired.channel_id, session_id)
            .await;
        match result {
            Ok(created) => {
                let mut reg = registry.lock().unwrap();
                let _ = reg.upsert_active(
                    &item.desired.channel_id,
                    &item.desired.topic,
                    &created.upstream_id,
                    ActiveStatus::Enabled,
                    created.cost,
                );
                clear_needs_reauth(&mut reg, &item.desired.channel_id);
            }
            Err(CreateError::CostExceeded) => {
                let retry_queue_item = &mut retry_queue[idx];
                retry_queue_item.attempts += 1;
                let attempts = retry_queue_item.attempts;
                if attempts as usize >= max_attempts {
                    let mut reg = registry.lock().unwrap();
                    let _ = reg.append_audit(
                        "eventsub_cost_retry_exhausted",
                        &format!("channel_id={} topic={}", item.desired.channel_id, item.desired.topic),
                    );
                } else {
                    let delay = COST_RETRY_DELAYS_SECS[attempts as usize - 1];
                    retry_queue_item.next_attempt = Instant::now() + Duration::from_secs(delay);
                }
            }
            Err(_) => {}
        }
    }

    retry_queue.retain(|item| (item.attempts as usize) < max_attempts);
}
