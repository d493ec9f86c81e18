//! Worker-facing IPC server (§4.5.3): accepts Worker connections, maintains
//! the route table, and upserts Desired rows on hello/subscribe/unsubscribe.

use crate::route_table::RouteTable;
use ipc_protocol::{encode_line, DecodedFrame, FrameDecoder, Message};
use registry::Registry;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

const MALFORMED_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Accept Worker connections until `shutdown` fires. Each connection's
/// channel_id registration lives only as long as the socket is open; Desired
/// rows persist past disconnect so a reconnecting Worker re-asserts them.
pub async fn run_accept_loop(
    socket_path: PathBuf,
    registry: Arc<Mutex<Registry>>,
    route_table: RouteTable,
    trigger: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&socket_path)?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let registry = Arc::clone(&registry);
                let route_table = route_table.clone();
                let trigger = trigger.clone();
                tokio::spawn(handle_connection(stream, registry, route_table, trigger));
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    registry: Arc<Mutex<Registry>>,
    route_table: RouteTable,
    trigger: mpsc::Sender<()>,
) {
    let (mut read_half, write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut last_malformed_log: Option<Instant> = None;
    let mut channel_id: Option<String> = None;
    let mut write_half = Some(write_half);
    let mut writer_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "worker connection read error, closing");
                break;
            }
        };
        let frames = match decoder.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(_) => {
                warn!("worker connection line exceeded max size, closing");
                break;
            }
        };
        for frame in frames {
            match frame {
                DecodedFrame::Message(Message::Hello(hello)) => {
                    channel_id = Some(hello.channel_id.clone());
                    let rx = route_table.register(hello.channel_id.clone());
                    if let Some(wh) = write_half.take() {
                        writer_task = Some(tokio::spawn(run_writer(rx, wh)));
                    }
                    let mut reg = registry.lock().unwrap();
                    for topic in &hello.topics {
                        let _ = reg.upsert_desired(&hello.channel_id, topic, "1", "websocket");
                    }
                    drop(reg);
                    let _ = trigger.try_send(());
                }
                DecodedFrame::Message(Message::Subscribe(sub)) => {
                    let mut reg = registry.lock().unwrap();
                    let _ = reg.upsert_desired(
                        &sub.channel_id,
                        &sub.topic,
                        sub.version.as_deref().unwrap_or("1"),
                        "websocket",
                    );
                    drop(reg);
                    let _ = trigger.try_send(());
                }
                DecodedFrame::Message(Message::Unsubscribe(unsub)) => {
                    let mut reg = registry.lock().unwrap();
                    let _ = reg.delete_desired(&unsub.channel_id, &unsub.topic);
                    drop(reg);
                    let _ = trigger.try_send(());
                }
                DecodedFrame::Message(Message::Ping) => {}
                DecodedFrame::Message(other) => {
                    debug!(r#type = other.type_name(), "unexpected message type on hub ipc server");
                }
                DecodedFrame::Unknown(tag) => {
                    debug!(tag = %tag, "unknown message type from worker");
                }
                DecodedFrame::Malformed => {
                    log_malformed(&mut last_malformed_log);
                }
            }
        }
    }

    if let Some(task) = writer_task {
        task.abort();
    }
    if let Some(id) = channel_id {
        route_table.unregister(&id);
    }
}

fn log_malformed(last: &mut Option<Instant>) {
    let now = Instant::now();
    let should_log = match last {
        Some(t) => now.duration_since(*t) >= MALFORMED_LOG_INTERVAL,
        None => true,
    };
    if should_log {
        warn!("received malformed frame from worker");
        *last = Some(now);
    }
}

/// Drains the route table's per-worker queue onto the socket. Fire-and-forget:
/// a write failure just ends the task, the connection's read loop notices on
/// its own next EOF/error.
async fn run_writer(mut rx: mpsc::Receiver<Message>, mut write_half: OwnedWriteHalf) {
    while let Some(msg) = rx.recv().await {
        let line = encode_line(&msg);
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}
