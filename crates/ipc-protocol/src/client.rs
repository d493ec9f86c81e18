use crate::backoff::Backoff;
use crate::framing::{encode_line, DecodedFrame, FrameDecoder};
use crate::messages::Message;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// IPC write timeout from §5: "IPC writes: 2s".
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// A reconnecting client for the Worker side of an IPC socket (to the Hub or
/// to the Monitor). Per §4.1, sends are fire-and-forget: a failed write
/// discards the message and records a counter rather than blocking the
/// caller's work loop.
pub struct IpcClient {
    path: PathBuf,
    stream: Option<UnixStream>,
    backoff: Backoff,
    decoder: FrameDecoder,
    pending: VecDeque<DecodedFrame>,
    dropped: u64,
    generation: u64,
}

impl IpcClient {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            stream: None,
            backoff: Backoff::ipc_default(),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            dropped: 0,
            generation: 0,
        }
    }

    /// Number of messages discarded because the peer was unreachable or the
    /// write timed out. Surfaced so callers can report it as a metric.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Bumped each time a new underlying connection is established. Callers
    /// that need to re-assert state on the peer after a reconnect (the
    /// Worker's hello/subscribe handshake) can compare this against the
    /// value they last saw to notice a transparent reconnect happened.
    pub fn connection_generation(&self) -> u64 {
        self.generation
    }

    /// Ensure a connection is open, attempting one reconnect if needed.
    /// Never blocks longer than the caller's own sleep between calls; a
    /// failed attempt just advances the backoff schedule for next time.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match UnixStream::connect(&self.path).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.backoff.reset();
                self.generation += 1;
                true
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ipc connect failed");
                tokio::time::sleep(self.backoff.next()).await;
                false
            }
        }
    }

    /// Fire-and-forget send. On any failure the connection is torn down (the
    /// next `ensure_connected` will reconnect with backoff) and the message
    /// is dropped, never blocking the caller.
    pub async fn send(&mut self, msg: &Message) {
        if !self.ensure_connected().await {
            self.dropped += 1;
            return;
        }
        let line = encode_line(msg);
        let Some(stream) = self.stream.as_mut() else {
            self.dropped += 1;
            return;
        };
        match timeout(WRITE_TIMEOUT, stream.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            _ => {
                warn!(r#type = msg.type_name(), "ipc write failed or timed out, dropping");
                self.stream = None;
                self.dropped += 1;
            }
        }
    }

    /// Read and decode the next frame, reconnecting on EOF/error. Used by the
    /// Worker's Hub connection to receive `eventsub_event` frames.
    pub async fn recv(&mut self) -> Option<DecodedFrame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if !self.ensure_connected().await {
                return None;
            }
            let Some(stream) = self.stream.as_mut() else {
                return None;
            };
            let mut buf = [0u8; 4096];
            match stream.read(&mut buf).await {
                Ok(0) => {
                    debug!(path = %self.path.display(), "ipc peer closed, reconnecting");
                    self.stream = None;
                    continue;
                }
                Ok(n) => match self.decoder.feed(&buf[..n]) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(_) => {
                        warn!("ipc line exceeded max size, reconnecting");
                        self.stream = None;
                    }
                },
                Err(e) => {
                    debug!(error = %e, "ipc read failed, reconnecting");
                    self.stream = None;
                }
            }
        }
    }
}
