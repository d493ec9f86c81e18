//! Supervisor (C6): spawns Monitor, Hub, and one Worker per channel in the
//! right order, restarts crashed children with backoff, and exposes a
//! filesystem command inbox (§4.4).

mod child;
mod inbox;
mod process_util;

pub use child::ChildKind;

use fleet_config::FleetConfig;
use registry::Registry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command as ProcessCommand;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use child::SupervisedChild;

pub struct SupervisorParams {
    pub config: FleetConfig,
    pub registry_path: PathBuf,
    pub health_check_interval: Duration,
    pub command_poll_interval: Duration,
    pub monitor_ready_budget: Duration,
    pub hub_ready_budget: Duration,
}

/// A channel entry in `FleetConfig::channels` is `<login>` or
/// `<login>:<channel_id>`; when no id is given the login doubles as the id.
/// (§6.5 names `channels` as a bare list with no further structure; this is
/// the minimal parsing needed to hand a Worker its two required CLI args.)
fn parse_channel_entry(entry: &str) -> (String, String) {
    match entry.split_once(':') {
        Some((login, id)) => (login.to_owned(), id.to_owned()),
        None => (entry.to_owned(), entry.to_owned()),
    }
}

struct Fleet {
    cfg: FleetConfig,
    registry: Arc<std::sync::Mutex<Registry>>,
    monitor: Option<SupervisedChild>,
    hub: Option<SupervisedChild>,
    workers: HashMap<String, (SupervisedChild, String)>,
}

impl Fleet {
    fn audit(&self, event: &str, detail: &str) {
        if let Ok(mut reg) = self.registry.lock() {
            let _ = reg.append_audit(event, detail);
        }
    }

    fn spawn_monitor(&self) -> std::io::Result<tokio::process::Child> {
        ProcessCommand::new(&self.cfg.supervisor.monitor_bin)
            .kill_on_drop(true)
            .spawn()
    }

    fn spawn_hub(&self) -> std::io::Result<tokio::process::Child> {
        ProcessCommand::new(&self.cfg.supervisor.hub_bin)
            .kill_on_drop(true)
            .spawn()
    }

    fn spawn_worker(&self, channel: &str, channel_id: &str) -> std::io::Result<tokio::process::Child> {
        ProcessCommand::new(&self.cfg.supervisor.worker_bin)
            .arg("--channel")
            .arg(channel)
            .arg("--channel-id")
            .arg(channel_id)
            .kill_on_drop(true)
            .spawn()
    }
}

/// Run the Supervisor until `shutdown` resolves to `true`.
pub async fn run(params: SupervisorParams, shutdown: watch::Receiver<bool>) {
    let registry = match Registry::open(&params.registry_path) {
        Ok(reg) => Arc::new(std::sync::Mutex::new(reg)),
        Err(e) => {
            error!(error = %e, "failed to open registry, supervisor cannot start");
            return;
        }
    };

    let fleet = Arc::new(Mutex::new(Fleet {
        cfg: params.config.clone(),
        registry,
        monitor: None,
        hub: None,
        workers: HashMap::new(),
    }));

    {
        let mut fleet = fleet.lock().await;
        fleet.audit("supervisor_start", "spawn sequence beginning");
        start_sequence(&mut fleet, &params).await;
    }

    run_loop(fleet.clone(), params.clone(), shutdown).await;

    let mut fleet = fleet.lock().await;
    shutdown_sequence(&mut fleet, &params).await;
    fleet.audit("supervisor_stop", "shutdown complete");
}

impl Clone for SupervisorParams {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry_path: self.registry_path.clone(),
            health_check_interval: self.health_check_interval,
            command_poll_interval: self.command_poll_interval,
            monitor_ready_budget: self.monitor_ready_budget,
            hub_ready_budget: self.hub_ready_budget,
        }
    }
}

/// Monitor, then Hub, then Workers one at a time with an inter-start delay
/// (§4.4 spawn order).
async fn start_sequence(fleet: &mut Fleet, params: &SupervisorParams) {
    match fleet.spawn_monitor() {
        Ok(child) => {
            let sc = SupervisedChild::new(ChildKind::Monitor, child);
            let ready = process_util::wait_for_socket(
                std::path::Path::new(&fleet.cfg.socket_paths.monitor),
                Duration::from_millis(100),
                params.monitor_ready_budget,
            )
            .await;
            if !ready {
                warn!("monitor socket did not become ready within budget, continuing anyway");
                fleet.audit("monitor_start_timeout", "socket not ready within budget");
            }
            fleet.audit(sc.kind.start_audit_event(), "monitor spawned");
            fleet.monitor = Some(sc);
        }
        Err(e) => {
            error!(error = %e, "failed to spawn monitor");
            fleet.audit("monitor_start_failed", &e.to_string());
        }
    }

    match fleet.spawn_hub() {
        Ok(child) => {
            let sc = SupervisedChild::new(ChildKind::Hub, child);
            let ready = process_util::wait_for_socket(
                std::path::Path::new(&fleet.cfg.socket_paths.hub),
                Duration::from_millis(100),
                params.hub_ready_budget,
            )
            .await;
            if !ready {
                warn!("hub socket did not become ready within budget, continuing anyway");
                fleet.audit("hub_start_timeout", "socket not ready within budget");
            }
            fleet.audit(sc.kind.start_audit_event(), "hub spawned");
            fleet.hub = Some(sc);
        }
        Err(e) => {
            error!(error = %e, "failed to spawn hub");
            fleet.audit("hub_start_failed", &e.to_string());
        }
    }

    let channels: Vec<String> = fleet.cfg.channels.clone();
    let inter_start_delay = Duration::from_millis(fleet.cfg.supervisor.worker_inter_start_delay_ms);
    for (i, entry) in channels.iter().enumerate() {
        let (channel, channel_id) = parse_channel_entry(entry);
        start_worker(fleet, &channel, &channel_id);
        if i + 1 < channels.len() {
            tokio::time::sleep(inter_start_delay).await;
        }
    }
}

fn start_worker(fleet: &mut Fleet, channel: &str, channel_id: &str) {
    match fleet.spawn_worker(channel, channel_id) {
        Ok(child) => {
            let kind = ChildKind::Worker(channel.to_owned());
            fleet.audit(kind.start_audit_event(), &format!("channel={channel}"));
            let sc = SupervisedChild::new(kind, child);
            fleet.workers.insert(channel.to_owned(), (sc, channel_id.to_owned()));
        }
        Err(e) => {
            error!(error = %e, %channel, "failed to spawn worker");
            fleet.audit("bot_start_failed", &format!("channel={channel} error={e}"));
        }
    }
}

async fn run_loop(fleet: Arc<Mutex<Fleet>>, params: SupervisorParams, mut shutdown: watch::Receiver<bool>) {
    let mut health_timer = tokio::time::interval(params.health_check_interval);
    let mut inbox_timer = tokio::time::interval(params.command_poll_interval);

    loop {
        tokio::select! {
            _ = health_timer.tick() => {
                health_check(&fleet, &params).await;
            }
            _ = inbox_timer.tick() => {
                if poll_inbox(&fleet, &params).await {
                    return;
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

async fn health_check(fleet: &Arc<Mutex<Fleet>>, params: &SupervisorParams) {
    let base = Duration::from_secs(1);
    let cap = Duration::from_secs(60);
    let max_crash_count = {
        let f = fleet.lock().await;
        f.cfg.max_crash_count
    };

    let dead_kinds: Vec<ChildKind> = {
        let mut f = fleet.lock().await;
        let mut dead = Vec::new();
        if let Some(sc) = f.monitor.as_mut() {
            if !sc.disabled && sc.has_exited() {
                dead.push(ChildKind::Monitor);
            }
        }
        if let Some(sc) = f.hub.as_mut() {
            if !sc.disabled && sc.has_exited() {
                dead.push(ChildKind::Hub);
            }
        }
        for (channel, (sc, _)) in f.workers.iter_mut() {
            if !sc.disabled && sc.has_exited() {
                dead.push(ChildKind::Worker(channel.clone()));
            }
        }
        dead
    };

    for kind in dead_kinds {
        schedule_restart(fleet.clone(), kind, base, cap, max_crash_count, params.clone());
    }
}

fn schedule_restart(
    fleet: Arc<Mutex<Fleet>>,
    kind: ChildKind,
    base: Duration,
    cap: Duration,
    max_crash_count: u32,
    params: SupervisorParams,
) {
    tokio::spawn(async move {
        let consecutive_failures = {
            let mut f = fleet.lock().await;
            let entry_failures = match &kind {
                ChildKind::Monitor => f.monitor.as_mut().map(|sc| {
                    sc.consecutive_failures += 1;
                    sc.consecutive_failures
                }),
                ChildKind::Hub => f.hub.as_mut().map(|sc| {
                    sc.consecutive_failures += 1;
                    sc.consecutive_failures
                }),
                ChildKind::Worker(channel) => f.workers.get_mut(channel).map(|(sc, _)| {
                    sc.consecutive_failures += 1;
                    sc.consecutive_failures
                }),
            };
            f.audit(kind.crash_audit_event(), &kind.label());
            match entry_failures {
                Some(n) => n,
                None => return,
            }
        };

        if let ChildKind::Worker(channel) = &kind {
            let needs_reauth = {
                let f = fleet.lock().await;
                let mut reg = f.registry.lock().unwrap();
                reg.get_hub_state(&format!("needs_reauth:{channel}")).ok().flatten().as_deref() == Some("1")
            };
            if needs_reauth {
                let mut f = fleet.lock().await;
                if let Some((sc, _)) = f.workers.get_mut(channel) {
                    sc.disabled = true;
                }
                warn!(%channel, "credential needs reauth, not restarting worker; human intervention required");
                f.audit("token_needs_reauth", &format!("channel={channel}"));
                return;
            }
        }

        if consecutive_failures > max_crash_count {
            let mut f = fleet.lock().await;
            match &kind {
                ChildKind::Monitor => {
                    if let Some(sc) = f.monitor.as_mut() {
                        sc.disabled = true;
                    }
                }
                ChildKind::Hub => {
                    if let Some(sc) = f.hub.as_mut() {
                        sc.disabled = true;
                    }
                }
                ChildKind::Worker(channel) => {
                    if let Some((sc, _)) = f.workers.get_mut(channel) {
                        sc.disabled = true;
                    }
                }
            }
            error!(child = %kind.label(), "crash count exceeded, disabling; human intervention required");
            f.audit("child_disabled", &format!("{} consecutive failures", consecutive_failures));
            return;
        }

        let delay = child::restart_backoff(consecutive_failures - 1, base, cap);
        info!(child = %kind.label(), delay_ms = delay.as_millis() as u64, "scheduling restart");
        tokio::time::sleep(delay).await;

        let mut f = fleet.lock().await;
        match &kind {
            ChildKind::Monitor => {
                let ready_budget = params.monitor_ready_budget;
                match f.spawn_monitor() {
                    Ok(child) => {
                        let ready = process_util::wait_for_socket(
                            std::path::Path::new(&f.cfg.socket_paths.monitor),
                            Duration::from_millis(100),
                            ready_budget,
                        )
                        .await;
                        if !ready {
                            warn!("restarted monitor socket not ready within budget");
                        }
                        let mut sc = SupervisedChild::new(ChildKind::Monitor, child);
                        sc.consecutive_failures = consecutive_failures;
                        f.monitor = Some(sc);
                        f.audit("monitor_start", "restarted after crash");
                    }
                    Err(e) => error!(error = %e, "failed to restart monitor"),
                }
            }
            ChildKind::Hub => {
                let ready_budget = params.hub_ready_budget;
                match f.spawn_hub() {
                    Ok(child) => {
                        let ready = process_util::wait_for_socket(
                            std::path::Path::new(&f.cfg.socket_paths.hub),
                            Duration::from_millis(100),
                            ready_budget,
                        )
                        .await;
                        if !ready {
                            warn!("restarted hub socket not ready within budget");
                        }
                        let mut sc = SupervisedChild::new(ChildKind::Hub, child);
                        sc.consecutive_failures = consecutive_failures;
                        f.hub = Some(sc);
                        f.audit("hub_start", "restarted after crash");
                    }
                    Err(e) => error!(error = %e, "failed to restart hub"),
                }
            }
            ChildKind::Worker(channel) => {
                let channel_id = f
                    .workers
                    .get(channel)
                    .map(|(_, id)| id.clone())
                    .unwrap_or_else(|| channel.clone());
                match f.spawn_worker(channel, &channel_id) {
                    Ok(child) => {
                        let mut sc = SupervisedChild::new(ChildKind::Worker(channel.clone()), child);
                        sc.consecutive_failures = consecutive_failures;
                        f.audit("bot_start", &format!("channel={channel} restarted after crash"));
                        f.workers.insert(channel.clone(), (sc, channel_id));
                    }
                    Err(e) => error!(error = %e, %channel, "failed to restart worker"),
                }
            }
        }
    });
}

/// Returns `true` if a `quit` command was processed, telling the caller to
/// stop the run loop (and fall through to the ordered shutdown sequence).
async fn poll_inbox(fleet: &Arc<Mutex<Fleet>>, params: &SupervisorParams) -> bool {
    let inbox_path = std::path::PathBuf::from(&params.config.supervisor.command_inbox_path);
    let Some(cmd) = inbox::take_command(&inbox_path).await else {
        return false;
    };

    let is_quit = matches!(cmd, inbox::Command::Quit);
    let stop_timeout = Duration::from_secs(params.config.supervisor.graceful_stop_timeout_secs);
    let result = match cmd {
        inbox::Command::Start(channel) => {
            let mut f = fleet.lock().await;
            if f.workers.contains_key(&channel) {
                Err(format!("worker for channel {channel} already running"))
            } else {
                start_worker(&mut f, &channel, &channel);
                Ok(format!("started {channel}"))
            }
        }
        inbox::Command::Stop(channel) => {
            let pid = {
                let f = fleet.lock().await;
                f.workers.get(&channel).and_then(|(sc, _)| sc.pid())
            };
            match pid {
                Some(pid) => {
                    process_util::graceful_stop(pid, stop_timeout).await;
                    let mut f = fleet.lock().await;
                    f.workers.remove(&channel);
                    Ok(format!("stopped {channel}"))
                }
                None => Err(format!("no running worker for channel {channel}")),
            }
        }
        inbox::Command::Restart(channel) => {
            let (pid, channel_id) = {
                let f = fleet.lock().await;
                f.workers
                    .get(&channel)
                    .map(|(sc, id)| (sc.pid(), id.clone()))
                    .unwrap_or((None, channel.clone()))
            };
            if let Some(pid) = pid {
                process_util::graceful_stop(pid, stop_timeout).await;
            }
            let mut f = fleet.lock().await;
            f.workers.remove(&channel);
            start_worker(&mut f, &channel, &channel_id);
            Ok(format!("restarted {channel}"))
        }
        inbox::Command::Quit => Ok("shutting down".to_owned()),
    };

    inbox::write_result(&inbox_path, result).await;
    is_quit
}

async fn shutdown_sequence(fleet: &mut Fleet, params: &SupervisorParams) {
    let stop_timeout = Duration::from_secs(params.config.supervisor.graceful_stop_timeout_secs);

    let worker_pids: Vec<u32> = fleet.workers.values().filter_map(|(sc, _)| sc.pid()).collect();
    for pid in worker_pids {
        process_util::graceful_stop(pid, stop_timeout).await;
    }
    fleet.workers.clear();

    if let Some(sc) = fleet.hub.take() {
        if let Some(pid) = sc.pid() {
            process_util::graceful_stop(pid, stop_timeout).await;
        }
    }

    if let Some(sc) = fleet.monitor.take() {
        if let Some(pid) = sc.pid() {
            process_util::graceful_stop(pid, stop_timeout).await;
        }
    }
}
