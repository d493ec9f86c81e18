use ipc_protocol::{Hello, Message};
use std::sync::Arc;
use std::time::Duration;
use test_support::{MockEventSubHttp, MockEventSubWs, SocketDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

async fn connect_retrying(path: &std::path::Path) -> UnixStream {
    let mut attempts = 0;
    loop {
        match UnixStream::connect(path).await {
            Ok(s) => return s,
            Err(_) if attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("could not connect to hub socket: {e}"),
        }
    }
}

#[tokio::test]
async fn hello_subscribe_reconcile_creates_upstream_subscription() {
    let ws = MockEventSubWs::start().await;
    let http = MockEventSubHttp::start().await;
    http.set_cost_budget(10);

    let socket_dir = SocketDir::new();
    let registry_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path("hub.sock");
    let registry_path = registry_dir.path().join("registry.sqlite3");

    let in_memory = credentials::InMemoryCredentialStore::new();
    in_memory.insert("100", "test-token");
    let credentials: Arc<dyn credentials::CredentialStore> = Arc::new(in_memory);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = hub::HubParams {
        socket_path: socket_path.clone(),
        registry_path: registry_path.clone(),
        upstream_ws_url: ws.ws_url(),
        upstream_http_base_url: http.base_url(),
        handshake_timeout: Duration::from_secs(5),
        ws_backoff_base_secs: 1,
        ws_backoff_max_secs: 5,
        eventsub_reconcile_interval: Duration::from_millis(200),
        eventsub_req_rate_per_s: 20.0,
        eventsub_req_jitter_ms: 0,
        max_cost_retry_attempts: 3,
    };
    let handle = tokio::spawn(hub::run(params, credentials, shutdown_rx));

    let mut stream = connect_retrying(&socket_path).await;
    let hello_line = ipc_protocol::encode_line(&Message::Hello(Hello {
        channel: "somechannel".to_owned(),
        channel_id: "100".to_owned(),
        topics: vec!["stream.online".to_owned()],
    }));
    stream.write_all(hello_line.as_bytes()).await.unwrap();

    // Give the reconcile loop a few ticks to create the subscription upstream.
    let mut created = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if http.active_count() == 1 {
            created = true;
            break;
        }
    }
    assert!(created, "expected the hub to create the subscription upstream");

    // The upstream pushes a notification; the hub should forward it verbatim
    // to the connected worker as an eventsub_event frame.
    ws.push_notification("evt-1", "stream.online", "100", serde_json::json!({"k": "v"}));

    let mut buf = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for forwarded event")
        .unwrap();
    let text = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(text.contains("eventsub_event"));
    assert!(text.contains("stream.online"));

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}
