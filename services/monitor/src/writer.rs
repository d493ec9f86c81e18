use crate::work_item::WorkItem;
use registry::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bumped whenever the bounded queue is full and an item is dropped (§8
/// scenario 5: `telemetry_dropped_total`).
#[derive(Default)]
pub struct DroppedCounter(AtomicU64);

impl DroppedCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Try to enqueue a work item without blocking the caller; on a full queue,
/// increment `dropped` and return. Network handlers call only this.
pub fn try_enqueue(
    tx: &mpsc::Sender<WorkItem>,
    dropped: &DroppedCounter,
    item: WorkItem,
) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(item) {
        dropped.incr();
    }
}

/// The single task permitted to call into the registry. Drains `rx` until
/// the sender side is dropped (a clean shutdown signal), applying each item.
pub async fn run_writer(mut rx: mpsc::Receiver<WorkItem>, registry: Arc<std::sync::Mutex<Registry>>) {
    while let Some(item) = rx.recv().await {
        let mut reg = registry.lock().unwrap();
        let result = match item {
            WorkItem::Register {
                channel,
                pid,
                features_json,
            } => reg.upsert_worker_registration(&channel, pid, &features_json),
            WorkItem::Heartbeat {
                channel,
                pid,
                rss_mb,
                cpu_pct,
            } => reg
                .record_heartbeat(&channel, pid)
                .and_then(|()| {
                    if rss_mb.is_some() || cpu_pct.is_some() {
                        reg.append_worker_metric(&channel, pid, rss_mb, cpu_pct)
                    } else {
                        Ok(())
                    }
                }),
            WorkItem::Unregister { channel, pid } => reg.mark_worker_offline(&channel, pid),
            WorkItem::LlmUsage {
                channel,
                model,
                feature,
                tokens_in,
                tokens_out,
                latency_ms,
                estimated_cost,
            } => reg.append_telemetry_llm_usage(
                &channel,
                &model,
                &feature,
                tokens_in as i64,
                tokens_out as i64,
                latency_ms as i64,
                estimated_cost,
            ),
        };
        if let Err(e) = result {
            warn!(error = %e, "monitor writer: registry operation failed");
        } else {
            debug!("monitor writer: work item applied");
        }
    }
}
