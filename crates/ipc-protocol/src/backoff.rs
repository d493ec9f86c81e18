use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with symmetric jitter, shared by every
/// reconnect policy in this core (IPC client §4.1, upstream WS §4.5.1).
///
/// `next()` both returns the delay to sleep and advances the internal
/// failure counter; `reset()` is called on a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    factor: u32,
    jitter_pct: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, factor: u32, jitter_pct: f64) -> Self {
        Self {
            base,
            cap,
            factor,
            jitter_pct,
            failures: 0,
        }
    }

    /// The IPC reconnect policy from §4.1: base 0.5s, factor 2, cap 30s, ±25%.
    pub fn ipc_default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 2, 0.25)
    }

    /// The upstream WS reconnect policy from §4.5.1 defaults: base 2s, cap 60s, ±25%.
    pub fn upstream_ws_default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60), 2, 0.25)
    }

    /// Advance past one failure and return the delay to sleep before retrying.
    pub fn next(&mut self) -> Duration {
        let exp = self.factor.saturating_pow(self.failures);
        self.failures = self.failures.saturating_add(1);
        let raw = self.base.saturating_mul(exp).min(self.cap);
        jittered(raw, self.jitter_pct)
    }

    /// Reset the failure counter after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

fn jittered(d: Duration, jitter_pct: f64) -> Duration {
    if jitter_pct <= 0.0 {
        return d;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter_pct..=jitter_pct);
    Duration::from_secs_f64((d.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_capped() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2, 0.0);
        assert_eq!(b.next(), Duration::from_secs(1));
        assert_eq!(b.next(), Duration::from_secs(2));
        assert_eq!(b.next(), Duration::from_secs(4));
        assert_eq!(b.next(), Duration::from_secs(8));
        assert_eq!(b.next(), Duration::from_secs(8), "capped, not unbounded");
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2, 0.0);
        b.next();
        b.next();
        assert_eq!(b.consecutive_failures(), 2);
        b.reset();
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.next(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(10), 1, 0.25);
        for _ in 0..50 {
            let d = b.next();
            assert!(d >= Duration::from_secs_f64(7.5) && d <= Duration::from_secs_f64(12.5));
        }
    }
}
