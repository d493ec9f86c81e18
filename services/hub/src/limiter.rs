use rand::Rng;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Token-bucket limiter draining the CREATE/DELETE queue at
/// `eventsub_req_rate_per_s`, with per-request jitter (§4.5.2 step 5).
pub struct RateLimiter {
    interval: Duration,
    jitter_ms: u64,
    last_take: Option<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_s: f64, jitter_ms: u64) -> Self {
        let rate_per_s = rate_per_s.max(0.001);
        Self {
            interval: Duration::from_secs_f64(1.0 / rate_per_s),
            jitter_ms,
            last_take: None,
        }
    }

    /// Wait until the next request is allowed, then record the take.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_take {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleep(self.interval - elapsed).await;
            }
        }
        if self.jitter_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
            sleep(Duration::from_millis(jitter)).await;
        }
        self.last_take = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_out_successive_acquires() {
        let mut limiter = RateLimiter::new(2.0, 0);
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // 2 req/s => 500ms apart; two gaps elapsed by the third acquire.
        assert!(start.elapsed() >= Duration::from_millis(999));
    }
}
