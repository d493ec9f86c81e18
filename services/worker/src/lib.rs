//! Worker (C5): a minimal bot harness. Maintains an IPC connection to the Hub
//! (hello/subscribe, receives forwarded events) and a second one to the
//! Monitor (register/heartbeat/unregister), with pluggable chat-transport and
//! event-handler seams (§4.3).

pub mod handler;
pub mod transport;

pub use handler::{EventHandler, LoggingEventHandler};
pub use transport::{ChatTransport, NoopChatTransport};

use ipc_protocol::{DecodedFrame, Heartbeat, Hello, IpcClient, Message, Register, Subscribe, Unregister};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct WorkerParams {
    pub channel: String,
    pub channel_id: String,
    pub topics: Vec<String>,
    pub hub_socket_path: PathBuf,
    pub monitor_socket_path: PathBuf,
    pub heartbeat_interval: Duration,
}

/// Run the Worker until `shutdown` resolves to `true`. The Hub and Monitor
/// connections are independent: either one being unreachable never blocks
/// the other, or chat processing (§4.3).
pub async fn run(
    params: WorkerParams,
    handler: Arc<dyn EventHandler>,
    _transport: Arc<dyn ChatTransport>,
    shutdown: watch::Receiver<bool>,
) {
    let hub_task = tokio::spawn(run_hub_connection(
        params.channel.clone(),
        params.channel_id,
        params.topics,
        params.hub_socket_path,
        handler,
        shutdown.clone(),
    ));
    let monitor_task = tokio::spawn(run_monitor_connection(
        params.channel,
        params.monitor_socket_path,
        params.heartbeat_interval,
        shutdown,
    ));

    let _ = hub_task.await;
    let _ = monitor_task.await;
}

async fn run_hub_connection(
    channel: String,
    channel_id: String,
    topics: Vec<String>,
    hub_socket_path: PathBuf,
    handler: Arc<dyn EventHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut client = IpcClient::new(hub_socket_path);
    let mut last_hello_generation = 0u64;

    loop {
        if *shutdown.borrow() {
            return;
        }

        if client.connection_generation() == last_hello_generation {
            if client.ensure_connected().await {
                client.send(&Message::Hello(Hello {
                    channel: channel.clone(),
                    channel_id: channel_id.clone(),
                    topics: topics.clone(),
                }))
                .await;
                for topic in &topics {
                    client
                        .send(&Message::Subscribe(Subscribe {
                            channel_id: channel_id.clone(),
                            topic: topic.clone(),
                            version: None,
                        }))
                        .await;
                }
                last_hello_generation = client.connection_generation();
                info!(%channel, %channel_id, "worker announced to hub");
            } else {
                continue;
            }
        }

        tokio::select! {
            frame = client.recv() => {
                match frame {
                    Some(DecodedFrame::Message(Message::EventsubEvent(event))) => {
                        handler.handle(&event).await;
                    }
                    Some(DecodedFrame::Message(other)) => {
                        debug!(r#type = other.type_name(), "unexpected message type from hub");
                    }
                    Some(DecodedFrame::Unknown(tag)) => {
                        debug!(tag = %tag, "unknown message type from hub");
                    }
                    Some(DecodedFrame::Malformed) => {
                        warn!("malformed frame from hub");
                    }
                    None => {
                        // ensure_connected failed this attempt; loop back and
                        // retry after its backoff sleep.
                    }
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

async fn run_monitor_connection(
    channel: String,
    monitor_socket_path: PathBuf,
    heartbeat_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut client = IpcClient::new(monitor_socket_path);
    let pid = std::process::id();
    client
        .send(&Message::Register(Register {
            channel: channel.clone(),
            pid,
            features: Default::default(),
        }))
        .await;

    loop {
        let jitter = jittered_interval(heartbeat_interval);
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {
                client
                    .send(&Message::Heartbeat(Heartbeat {
                        channel: channel.clone(),
                        pid,
                        rss_mb: None,
                        cpu_pct: None,
                    }))
                    .await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    client
                        .send(&Message::Unregister(Unregister { channel: channel.clone(), pid }))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Jitter the heartbeat interval by up to ±10% (§4.3).
fn jittered_interval(base: Duration) -> Duration {
    let pct = rand::thread_rng().gen_range(-0.10..=0.10);
    Duration::from_secs_f64((base.as_secs_f64() * (1.0 + pct)).max(0.0))
}
