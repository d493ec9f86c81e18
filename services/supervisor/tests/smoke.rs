use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write_script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

fn base_config(bin_dir: &TempDir, socket_dir: &TempDir, command_inbox: PathBuf) -> fleet_config::FleetConfig {
    fleet_config::load_config_from_str(&format!(
        r#"
        channels = ["somechannel:100"]

        [socket_paths]
        hub = "{hub_sock}"
        monitor = "{monitor_sock}"

        [supervisor]
        monitor_bin = "{monitor_bin}"
        hub_bin = "{hub_bin}"
        worker_bin = "{worker_bin}"
        command_inbox_path = "{inbox}"
        worker_inter_start_delay_ms = 10
        graceful_stop_timeout_secs = 2
        "#,
        hub_sock = socket_dir.path().join("hub.sock").display(),
        monitor_sock = socket_dir.path().join("monitor.sock").display(),
        monitor_bin = write_script(bin_dir, "fake-monitor", "sleep 30"),
        hub_bin = write_script(bin_dir, "fake-hub", "sleep 30"),
        worker_bin = write_script(bin_dir, "fake-worker", "sleep 30"),
        inbox = command_inbox.display(),
    ))
    .unwrap()
}

#[tokio::test]
async fn spawn_order_runs_monitor_then_hub_then_worker_and_shuts_down_cleanly() {
    let bin_dir = tempfile::tempdir().unwrap();
    let socket_dir = tempfile::tempdir().unwrap();
    let registry_dir = tempfile::tempdir().unwrap();
    let inbox_path = registry_dir.path().join("supervisor.cmd");
    let registry_path = registry_dir.path().join("registry.sqlite3");

    let cfg = base_config(&bin_dir, &socket_dir, inbox_path.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = supervisor::SupervisorParams {
        health_check_interval: Duration::from_millis(100),
        command_poll_interval: Duration::from_millis(50),
        monitor_ready_budget: Duration::from_millis(200),
        hub_ready_budget: Duration::from_millis(200),
        registry_path: registry_path.clone(),
        config: cfg,
    };

    let handle = tokio::spawn(supervisor::run(params, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor did not shut down in time")
        .unwrap();

    let reg = registry::Registry::open(&registry_path).unwrap();
    let audit = reg.list_audit(100).unwrap();
    let events: Vec<&str> = audit.iter().map(|e| e.event.as_str()).collect();
    assert!(events.contains(&"supervisor_start"));
    assert!(events.contains(&"monitor_start"));
    assert!(events.contains(&"hub_start"));
    assert!(events.contains(&"bot_start"));
    assert!(events.contains(&"supervisor_stop"));
}

#[tokio::test]
async fn crashed_worker_is_restarted_with_backoff() {
    let bin_dir = tempfile::tempdir().unwrap();
    let socket_dir = tempfile::tempdir().unwrap();
    let registry_dir = tempfile::tempdir().unwrap();
    let inbox_path = registry_dir.path().join("supervisor.cmd");
    let registry_path = registry_dir.path().join("registry.sqlite3");

    let mut cfg = base_config(&bin_dir, &socket_dir, inbox_path.clone());
    // Exits immediately with a nonzero status, simulating a crash loop.
    cfg.supervisor.worker_bin = write_script(&bin_dir, "crashing-worker", "exit 1");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = supervisor::SupervisorParams {
        health_check_interval: Duration::from_millis(100),
        command_poll_interval: Duration::from_millis(50),
        monitor_ready_budget: Duration::from_millis(200),
        hub_ready_budget: Duration::from_millis(200),
        registry_path: registry_path.clone(),
        config: cfg,
    };

    let handle = tokio::spawn(supervisor::run(params, shutdown_rx));

    // First backoff is 1s; give it enough time to detect the crash and
    // restart at least once.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor did not shut down in time")
        .unwrap();

    let reg = registry::Registry::open(&registry_path).unwrap();
    let audit = reg.list_audit(200).unwrap();
    let crash_count = audit.iter().filter(|e| e.event == "bot_crash").count();
    assert!(crash_count >= 1, "expected at least one bot_crash event, got: {audit:?}");
}

#[tokio::test]
async fn command_inbox_starts_an_extra_worker_and_quit_shuts_down() {
    let bin_dir = tempfile::tempdir().unwrap();
    let socket_dir = tempfile::tempdir().unwrap();
    let registry_dir = tempfile::tempdir().unwrap();
    let inbox_path = registry_dir.path().join("supervisor.cmd");
    let registry_path = registry_dir.path().join("registry.sqlite3");

    let cfg = base_config(&bin_dir, &socket_dir, inbox_path.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let params = supervisor::SupervisorParams {
        health_check_interval: Duration::from_millis(100),
        command_poll_interval: Duration::from_millis(50),
        monitor_ready_budget: Duration::from_millis(200),
        hub_ready_budget: Duration::from_millis(200),
        registry_path: registry_path.clone(),
        config: cfg,
    };

    let handle = tokio::spawn(supervisor::run(params, shutdown_rx));

    // Let the initial spawn sequence finish before issuing commands.
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(&inbox_path, "start anotherchannel\n").unwrap();
    let result_path = registry_dir.path().join("supervisor.cmd.result");
    wait_for_file(&result_path).await;
    let result = std::fs::read_to_string(&result_path).unwrap();
    assert!(result.starts_with("SUCCESS"), "unexpected result: {result}");
    assert!(!inbox_path.exists(), "command file should be removed after processing");

    std::fs::write(&inbox_path, "quit\n").unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor did not shut down in time")
        .unwrap();

    // The sender is still held, but the supervisor already exited via the
    // quit command; this just drops it cleanly.
    drop(shutdown_tx);

    let reg = registry::Registry::open(&registry_path).unwrap();
    let audit = reg.list_audit(200).unwrap();
    let events: Vec<&str> = audit.iter().map(|e| e.event.as_str()).collect();
    assert!(events.iter().any(|e| *e == "bot_start"));
    assert!(events.contains(&"supervisor_stop"));
}

async fn wait_for_file(path: &std::path::Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", path.display());
}
