use std::time::Duration;
use tokio::process::Child;

/// Which fleet process a `SupervisedChild` wraps. Workers are keyed by their
/// channel login since there can be many.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildKind {
    Monitor,
    Hub,
    Worker(String),
}

impl ChildKind {
    pub fn label(&self) -> String {
        match self {
            ChildKind::Monitor => "monitor".to_owned(),
            ChildKind::Hub => "hub".to_owned(),
            ChildKind::Worker(channel) => format!("worker:{channel}"),
        }
    }

    pub fn crash_audit_event(&self) -> &'static str {
        match self {
            ChildKind::Monitor => "monitor_crash",
            ChildKind::Hub => "hub_crash",
            ChildKind::Worker(_) => "bot_crash",
        }
    }

    pub fn start_audit_event(&self) -> &'static str {
        match self {
            ChildKind::Monitor => "monitor_start",
            ChildKind::Hub => "hub_start",
            ChildKind::Worker(_) => "bot_start",
        }
    }
}

pub struct SupervisedChild {
    pub kind: ChildKind,
    pub child: Child,
    pub consecutive_failures: u32,
    pub disabled: bool,
}

impl SupervisedChild {
    pub fn new(kind: ChildKind, child: Child) -> Self {
        Self {
            kind,
            child,
            consecutive_failures: 0,
            disabled: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// `true` once the child process has exited, without blocking.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// Exponential restart backoff `min(base * 2^k, cap)` (§4.4), k = consecutive
/// prior failures.
pub fn restart_backoff(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u64.checked_shl(consecutive_failures).unwrap_or(u64::MAX);
    let scaled_ms = (base.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(scaled_ms).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(restart_backoff(0, base, cap), Duration::from_secs(1));
        assert_eq!(restart_backoff(1, base, cap), Duration::from_secs(2));
        assert_eq!(restart_backoff(2, base, cap), Duration::from_secs(4));
        assert_eq!(restart_backoff(10, base, cap), Duration::from_secs(60));
    }
}
