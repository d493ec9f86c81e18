//! Upstream session manager (§4.5.1): owns the Hub's single logical upstream
//! WebSocket, routes notifications to Workers, and exposes the current
//! session id to the reconciliation loop so CREATE calls bind to it.

use crate::route_table::RouteTable;
use eventsub_client::{EventSubSession, SessionError, SessionMessage};
use ipc_protocol::{Backoff, EventsubEvent, Message};
use registry::{now_rfc3339, Registry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

/// Leaky-bucket error counter (§4.5.4): +1 per error, decays at
/// `DECAY_PER_SEC`; crossing `THRESHOLD` doubles the reconnect backoff until
/// it decays back down.
const ERROR_BURST_THRESHOLD: f64 = 5.0;
const ERROR_BURST_DECAY_PER_SEC: f64 = 1.0;

/// Shared view of "what session is the Hub on right now", read by the
/// reconciliation loop to bind CREATE calls and detect session changes.
#[derive(Default)]
pub struct SessionHandle {
    session_id: Mutex<Option<String>>,
    generation: AtomicU64,
    /// Fired whenever `generation` advances, so the reconcile loop can wake
    /// immediately instead of waiting for its next tick (§4.5.2's "session
    /// change forces recreation").
    pub changed: Notify,
}

impl SessionHandle {
    pub fn current(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn set(&self, session_id: String) {
        *self.session_id.lock().unwrap() = Some(session_id);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }
}

pub struct SessionManagerConfig {
    pub initial_url: String,
    pub handshake_timeout: Duration,
    pub backoff: Backoff,
}

/// What happened on one connected session.
enum Outcome {
    /// A reconnect directive arrived; `old_session` is still open and is
    /// handed back so the caller can open the new session first and close
    /// this one only once the new one confirms (§4.5.1 overlap).
    ReconnectTo { old_session: EventSubSession, new_url: String },
    /// Clean shutdown.
    Shutdown,
    /// Socket error or keepalive timeout; reconnect from `down`.
    Lost(SessionError),
}

/// Leaky-bucket tracker for `error_burst_level`, decayed lazily off a
/// monotonic clock rather than a background task.
struct ErrorBurst {
    level: f64,
    last_decay: Instant,
}

impl ErrorBurst {
    fn new() -> Self {
        Self { level: 0.0, last_decay: Instant::now() }
    }

    fn decay(&mut self) {
        let elapsed = self.last_decay.elapsed().as_secs_f64();
        self.level = (self.level - elapsed * ERROR_BURST_DECAY_PER_SEC).max(0.0);
        self.last_decay = Instant::now();
    }

    /// Record one error, decaying first, and persist the new level.
    fn bump(&mut self, registry: &Arc<Mutex<Registry>>) {
        self.decay();
        self.level += 1.0;
        set_hub_state(registry, "error_burst_level", &format!("{:.2}", self.level));
    }

    fn over_threshold(&mut self) -> bool {
        self.decay();
        self.level >= ERROR_BURST_THRESHOLD
    }
}

/// Drive the upstream connection forever (until `shutdown`), forwarding
/// notifications into the route table and handling reconnect/revocation
/// directives. Errors never escape this loop; they feed the backoff.
pub async fn run(
    mut cfg: SessionManagerConfig,
    handle: Arc<SessionHandle>,
    route_table: RouteTable,
    registry: Arc<Mutex<Registry>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut url = cfg.initial_url.clone();
    let mut pending_session: Option<EventSubSession> = None;
    let mut burst = ErrorBurst::new();

    loop {
        if *shutdown.borrow() {
            set_hub_state(&registry, "ws_state", "down");
            return;
        }

        let session = match pending_session.take() {
            Some(s) => s,
            None => {
                set_hub_state(&registry, "ws_state", "connecting");
                info!(%url, "connecting upstream session");
                match EventSubSession::connect(&url, cfg.handshake_timeout).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "upstream connect failed");
                        burst.bump(&registry);
                        set_hub_state(&registry, "ws_state", "reconnecting");
                        if !sleep_for_backoff(&mut cfg.backoff, &mut burst, &mut shutdown).await {
                            return;
                        }
                        record_reconnect(&registry);
                        continue;
                    }
                }
            }
        };

        cfg.backoff.reset();
        handle.set(session.session_id().to_owned());
        set_hub_state(&registry, "ws_state", "connected");
        set_hub_state(&registry, "last_ws_connect_ts", &now_rfc3339());
        info!(session_id = %session.session_id(), "upstream session active");

        let outcome = run_connected(session, &route_table, &registry, &mut shutdown).await;
        match outcome {
            Outcome::ReconnectTo { old_session, new_url } => {
                set_hub_state(&registry, "ws_state", "reconnecting");
                // Open the new session before closing the old one so there is
                // no gap where upstream events have nowhere to land (§4.5.1).
                match EventSubSession::connect(&new_url, cfg.handshake_timeout).await {
                    Ok(new_session) => {
                        old_session.close().await;
                        pending_session = Some(new_session);
                        url = new_url;
                    }
                    Err(e) => {
                        warn!(error = %e, "new session handshake failed, reconnecting from down");
                        burst.bump(&registry);
                        old_session.close().await;
                        url = cfg.initial_url.clone();
                    }
                }
                record_reconnect(&registry);
            }
            Outcome::Shutdown => return,
            Outcome::Lost(e) => {
                warn!(error = %e, "upstream session lost");
                burst.bump(&registry);
                set_hub_state(&registry, "ws_state", "reconnecting");
                if !sleep_for_backoff(&mut cfg.backoff, &mut burst, &mut shutdown).await {
                    return;
                }
                record_reconnect(&registry);
            }
        }
    }
}

/// Sleeps the backoff's next delay, doubled while `error_burst_level` is
/// over threshold (§4.5.4).
async fn sleep_for_backoff(backoff: &mut Backoff, burst: &mut ErrorBurst, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let mut delay = backoff.next();
    if burst.over_threshold() {
        delay *= 2;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => !*shutdown.borrow(),
    }
}

async fn run_connected(
    mut session: EventSubSession,
    route_table: &RouteTable,
    registry: &Arc<Mutex<Registry>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Outcome {
    loop {
        tokio::select! {
            msg = session.recv() => {
                match msg {
                    Ok(SessionMessage::Event(event)) => {
                        let delivered = route_table.try_send(
                            &event.channel_id,
                            Message::EventsubEvent(EventsubEvent {
                                channel_id: event.channel_id.clone(),
                                topic: event.topic.clone(),
                                payload: event.payload,
                            }),
                        );
                        if delivered {
                            increment_hub_state(registry, "total_events_routed");
                        } else {
                            warn!(channel_id = %event.channel_id, "no route for upstream event, dropping");
                            increment_hub_state(registry, &format!("events_dropped:{}", event.channel_id));
                        }
                    }
                    Ok(SessionMessage::Keepalive) => {}
                    Ok(SessionMessage::Revocation { upstream_id }) => {
                        let deleted = registry.lock().unwrap().delete_active_by_upstream_id(&upstream_id);
                        match deleted {
                            Ok(Some((channel_id, topic))) => {
                                info!(%channel_id, %topic, "subscription revoked, removed from active");
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "failed to remove revoked subscription"),
                        }
                    }
                    Ok(SessionMessage::Reconnect { new_url }) => {
                        info!(new_url = %new_url, "reconnect directive received");
                        return Outcome::ReconnectTo { old_session: session, new_url };
                    }
                    Err(e) => return Outcome::Lost(e),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    session.close().await;
                    return Outcome::Shutdown;
                }
            }
        }
    }
}

fn set_hub_state(registry: &Arc<Mutex<Registry>>, key: &str, value: &str) {
    let _ = registry.lock().unwrap().set_hub_state(key, value);
}

fn increment_hub_state(registry: &Arc<Mutex<Registry>>, key: &str) {
    let _ = registry.lock().unwrap().increment_hub_state_counter(key, 1);
}

fn record_reconnect(registry: &Arc<Mutex<Registry>>) {
    let _ = registry.lock().unwrap().increment_hub_state_counter("ws_reconnect_count", 1);
    let _ = registry.lock().unwrap().append_audit("eventsub_ws_reconnect", "");
}
