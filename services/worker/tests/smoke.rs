use async_trait::async_trait;
use ipc_protocol::{encode_line, DecodedFrame, FrameDecoder, Message};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_support::SocketDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use worker::{EventHandler, NoopChatTransport};

#[derive(Default)]
struct CountingHandler {
    count: AtomicUsize,
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _event: &ipc_protocol::EventsubEvent) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A minimal stand-in Hub: accepts one connection, expects a hello then a
/// subscribe, then pushes one eventsub_event frame.
async fn run_fake_hub(listener: UnixListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (mut read_half, mut write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut saw_hello = false;
    let mut saw_subscribe = false;
    while !(saw_hello && saw_subscribe) {
        let n = read_half.read(&mut buf).await.unwrap();
        for frame in decoder.feed(&buf[..n]).unwrap() {
            match frame {
                DecodedFrame::Message(Message::Hello(_)) => saw_hello = true,
                DecodedFrame::Message(Message::Subscribe(_)) => saw_subscribe = true,
                _ => {}
            }
        }
    }
    let line = encode_line(&Message::EventsubEvent(ipc_protocol::EventsubEvent {
        channel_id: "100".to_owned(),
        topic: "stream.online".to_owned(),
        payload: serde_json::json!({}),
    }));
    write_half.write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn hello_subscribe_then_dispatches_forwarded_event() {
    let socket_dir = SocketDir::new();
    let hub_socket_path = socket_dir.path("hub.sock");
    let monitor_socket_path = socket_dir.path("monitor.sock");

    let hub_listener = UnixListener::bind(&hub_socket_path).unwrap();
    let hub_task = tokio::spawn(run_fake_hub(hub_listener));

    // No real monitor is listening; the worker must tolerate that.
    let handler = Arc::new(CountingHandler::default());
    let params = worker::WorkerParams {
        channel: "somechannel".to_owned(),
        channel_id: "100".to_owned(),
        topics: vec!["stream.online".to_owned()],
        hub_socket_path,
        monitor_socket_path,
        heartbeat_interval: Duration::from_secs(30),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handler_dyn: Arc<dyn EventHandler> = handler.clone();
    let transport: Arc<dyn worker::ChatTransport> = Arc::new(NoopChatTransport);
    let worker_task = tokio::spawn(worker::run(params, handler_dyn, transport, shutdown_rx));

    tokio::time::timeout(Duration::from_secs(5), hub_task)
        .await
        .expect("fake hub timed out")
        .unwrap();

    // Give the worker a moment to dispatch the pushed event.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.count.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_task).await;
}
