//! Graceful-stop primitive: SIGTERM, poll for exit, SIGKILL any straggler.
//! Grounded on the teacher's orphan-process cleanup (SIGTERM, wait, SIGKILL)
//! and its `kill(pid, 0)` liveness check.

use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `true` if a process with this pid is alive, checked via `kill(pid, 0)`.
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

/// Send SIGTERM, poll every 100ms up to `timeout`, then SIGKILL if still
/// alive.
pub async fn graceful_stop(pid: u32, timeout: Duration) {
    send_signal(pid, libc::SIGTERM);

    let mut waited = Duration::ZERO;
    while waited < timeout {
        tokio::time::sleep(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
        if !is_alive(pid) {
            debug!(pid, "process exited gracefully");
            return;
        }
    }

    if is_alive(pid) {
        warn!(pid, "process did not exit within timeout, sending SIGKILL");
        send_signal(pid, libc::SIGKILL);
    }
}

/// Poll a Unix socket path every `poll_interval` until it accepts a
/// connection, up to `budget`. Used for spawn-order readiness checks (§4.4).
pub async fn wait_for_socket(
    path: &std::path::Path,
    poll_interval: Duration,
    budget: Duration,
) -> bool {
    let attempts = (budget.as_millis() / poll_interval.as_millis().max(1)).max(1) as u32;
    for attempt in 0..attempts {
        if tokio::net::UnixStream::connect(path).await.is_ok() {
            return true;
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(poll_interval).await;
        }
    }
    false
}
