//! A mock upstream EventSub service for integration tests: a WebSocket
//! endpoint that performs the session handshake and lets tests push
//! notification/reconnect/revocation frames, plus an HTTP endpoint
//! implementing CREATE/DELETE/LIST (§6.2), adapted from the teacher's
//! `MockWsServer` (bind-to-port-0, spawn-per-connection accept loop).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock upstream WebSocket session server. Binds to a random port; every
/// accepted connection completes the session handshake immediately, then
/// forwards whatever frames are pushed via [`push_raw`](Self::push_raw) and
/// its typed wrappers.
pub struct MockEventSubWs {
    addr: SocketAddr,
    push_tx: broadcast::Sender<String>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockEventSubWs {
    pub async fn start() -> Self {
        Self::start_with_keepalive(3600).await
    }

    pub async fn start_with_keepalive(keepalive_interval_secs: u64) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push_tx, _) = broadcast::channel(256);
        let push_tx_for_task = push_tx.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let rx = push_tx_for_task.subscribe();
                        tokio::spawn(Self::handle_connection(
                            stream,
                            keepalive_interval_secs,
                            rx,
                        ));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            push_tx,
            _task: task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push a raw, already-serialized wire frame to every connected client.
    pub fn push_raw(&self, line: &str) {
        let _ = self.push_tx.send(line.to_owned());
    }

    pub fn push_notification(&self, event_id: &str, topic: &str, channel_id: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({
            "message_type": "notification",
            "payload": { "event_id": event_id, "topic": topic, "channel_id": channel_id, "payload": payload },
        });
        self.push_raw(&frame.to_string());
    }

    pub fn push_reconnect(&self, new_url: &str) {
        let frame = serde_json::json!({
            "message_type": "reconnect",
            "payload": { "new_url": new_url },
        });
        self.push_raw(&frame.to_string());
    }

    pub fn push_revocation(&self, upstream_id: &str) {
        let frame = serde_json::json!({
            "message_type": "revocation",
            "payload": { "upstream_id": upstream_id },
        });
        self.push_raw(&frame.to_string());
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        keepalive_interval_secs: u64,
        mut push_rx: broadcast::Receiver<String>,
    ) {
        let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        let session_id = uuid::Uuid::new_v4().to_string();
        let welcome = serde_json::json!({
            "message_type": "session_welcome",
            "payload": { "session_id": session_id, "keepalive_interval_secs": keepalive_interval_secs },
        });
        if write.send(Message::Text(welcome.to_string().into())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                pushed = push_rx.recv() => {
                    match pushed {
                        Ok(line) => {
                            if write.send(Message::Text(line.into())).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                next = read.next() => {
                    match next {
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => return,
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP CREATE/DELETE/LIST mock
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UpstreamState {
    subscriptions: HashMap<String, StoredSubscription>,
    /// Remaining cost budget; `None` means unlimited.
    cost_budget: Option<i64>,
}

#[derive(Clone)]
struct StoredSubscription {
    topic: String,
    channel_id: String,
    cost: i64,
}

#[derive(Deserialize)]
struct CreateRequest {
    topic: String,
    channel_id: String,
    #[allow(dead_code)]
    session_id: String,
}

#[derive(Serialize)]
struct CreateResponse {
    upstream_id: String,
    status: String,
    cost: i64,
}

#[derive(Serialize)]
struct ListedSubscription {
    upstream_id: String,
    topic: String,
    channel_id: String,
    status: String,
    cost: i64,
}

#[derive(Serialize)]
struct ListResponse {
    subscriptions: Vec<ListedSubscription>,
}

/// A mock upstream HTTP CREATE/DELETE/LIST server, with a configurable cost
/// budget so tests can exercise the cost-exceeded retry path (§4.5.2 step 7).
pub struct MockEventSubHttp {
    addr: SocketAddr,
    state: Arc<Mutex<UpstreamState>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockEventSubHttp {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(UpstreamState::default()));
        let router = Router::new()
            .route("/subscriptions", post(create_subscription))
            .route("/subscriptions", get(list_subscriptions))
            .route("/subscriptions/{id}", delete(delete_subscription))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        Self { addr, state, _task: task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Set the remaining cost budget; each CREATE with `cost=1` consumes one
    /// unit. Once exhausted, CREATE returns 429 (cost exceeded).
    pub fn set_cost_budget(&self, budget: i64) {
        self.state.lock().unwrap().cost_budget = Some(budget);
    }

    pub fn free_budget(&self, amount: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(b) = state.cost_budget.as_mut() {
            *b += amount;
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }
}

async fn create_subscription(
    State(state): State<Arc<Mutex<UpstreamState>>>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, StatusCode> {
    let mut state = state.lock().unwrap();
    if let Some(budget) = state.cost_budget.as_mut() {
        if *budget <= 0 {
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
        *budget -= 1;
    }
    let upstream_id = uuid::Uuid::new_v4().to_string();
    state.subscriptions.insert(
        upstream_id.clone(),
        StoredSubscription {
            topic: req.topic,
            channel_id: req.channel_id,
            cost: 1,
        },
    );
    Ok(Json(CreateResponse {
        upstream_id,
        status: "enabled".to_owned(),
        cost: 1,
    }))
}

async fn delete_subscription(
    State(state): State<Arc<Mutex<UpstreamState>>>,
    Path(id): Path<String>,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    if state.subscriptions.remove(&id).is_some() {
        if let Some(budget) = state.cost_budget.as_mut() {
            *budget += 1;
        }
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn list_subscriptions(
    State(state): State<Arc<Mutex<UpstreamState>>>,
) -> Json<ListResponse> {
    let state = state.lock().unwrap();
    let subscriptions = state
        .subscriptions
        .iter()
        .map(|(upstream_id, s)| ListedSubscription {
            upstream_id: upstream_id.clone(),
            topic: s.topic.clone(),
            channel_id: s.channel_id.clone(),
            status: "enabled".to_owned(),
            cost: s.cost,
        })
        .collect();
    Json(ListResponse { subscriptions })
}
