use crate::work_item::WorkItem;
use crate::writer::{try_enqueue, DroppedCounter};
use ipc_protocol::{DecodedFrame, FrameDecoder};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MALFORMED_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Accept loop for the Monitor's IPC socket. Spawns one reader task per
/// connection; each reader only ever does a socket read and a non-blocking
/// queue put (§4.2: "network handlers must never await I/O other than the
/// queue put").
pub async fn run_accept_loop(
    socket_path: &Path,
    tx: mpsc::Sender<WorkItem>,
    dropped: Arc<DroppedCounter>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let tx = tx.clone();
                        let dropped = dropped.clone();
                        tokio::spawn(handle_connection(stream, tx, dropped));
                    }
                    Err(e) => warn!(error = %e, "monitor accept failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, tx: mpsc::Sender<WorkItem>, dropped: Arc<DroppedCounter>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut last_malformed_log: Option<Instant> = None;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("monitor connection closed by peer");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "monitor connection read error");
                return;
            }
        };
        let frames = match decoder.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(_) => {
                warn!("monitor connection sent an oversized line, closing");
                return;
            }
        };
        for frame in frames {
            match frame {
                DecodedFrame::Message(msg) => {
                    if let Some(item) = WorkItem::from_message(&msg) {
                        try_enqueue(&tx, &dropped, item);
                    }
                }
                DecodedFrame::Unknown(type_name) => {
                    debug!(r#type = %type_name, "monitor: unknown frame type, discarding");
                }
                DecodedFrame::Malformed => {
                    let now = Instant::now();
                    let should_log = last_malformed_log
                        .map(|t| now.duration_since(t) >= MALFORMED_LOG_INTERVAL)
                        .unwrap_or(true);
                    if should_log {
                        warn!("monitor: malformed frame received, skipping");
                        last_malformed_log = Some(now);
                    }
                }
            }
        }
    }
}
