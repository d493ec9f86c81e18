use ipc_protocol::{Message, Register, Unregister};
use std::time::Duration;
use test_support::SocketDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

async fn send(stream: &mut UnixStream, msg: &Message) {
    let line = ipc_protocol::encode_line(msg);
    stream.write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn register_then_unregister_round_trips_through_registry() {
    let socket_dir = SocketDir::new();
    let registry_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path("monitor.sock");
    let registry_path = registry_dir.path().join("registry.sqlite3");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = monitor::MonitorParams {
        socket_path: socket_path.clone(),
        registry_path: registry_path.clone(),
        stale_timeout_secs: 60,
        stale_sweep_interval: Duration::from_secs(3600),
        retention_days: 7,
        retention_sweep_interval: Duration::from_secs(3600),
    };
    let handle = tokio::spawn(monitor::run(params, shutdown_rx));

    // Give the accept loop a moment to bind.
    let mut attempts = 0;
    let mut stream = loop {
        match UnixStream::connect(&socket_path).await {
            Ok(s) => break s,
            Err(_) if attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("could not connect to monitor socket: {e}"),
        }
    };

    send(
        &mut stream,
        &Message::Register(Register {
            channel: "somechannel".to_owned(),
            pid: 4242,
            features: Default::default(),
        }),
    )
    .await;
    send(
        &mut stream,
        &Message::Unregister(Unregister {
            channel: "somechannel".to_owned(),
            pid: 4242,
        }),
    )
    .await;

    // Give the writer task time to drain the queue before we shut down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let reg = registry::Registry::open(&registry_path).unwrap();
    let workers = reg.list_worker_registrations().unwrap();
    let w = workers.iter().find(|w| w.channel == "somechannel").unwrap();
    assert_eq!(w.pid, 4242);
    assert_eq!(w.status, registry::WorkerStatus::Offline);
}
