// =============================================================================
// Token-bucket rate limiter — Hyperliquid API weight budget
// =============================================================================
//
// Tokens refill continuously off a monotonic clock. `acquire` blocks the
// calling task until enough tokens are available or the timeout elapses.
//
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    max: f64,
    refill_rate: f64, // tokens per second
    bucket: Mutex<Bucket>,
    total_acquired: Mutex<u64>,
    total_waited_s: Mutex<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimiterStats {
    pub available: f64,
    pub max: f64,
    pub total_acquired: u64,
    pub total_waited_s: f64,
}

impl RateLimiter {
    pub fn new(max_weight: u32, safety_pct: u32) -> Self {
        let max = (max_weight * safety_pct / 100) as f64;
        Self {
            max,
            refill_rate: max / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: max,
                last_refill: Instant::now(),
            }),
            total_acquired: Mutex::new(0),
            total_waited_s: Mutex::new(0.0),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max);
        bucket.last_refill = now;
    }

    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Block until `weight` tokens are available, retrying on a short sleep.
    /// Returns `false` if `timeout` elapses first.
    pub async fn acquire(&self, weight: u32, timeout: Duration) -> bool {
        let weight = weight as f64;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= weight {
                    bucket.tokens -= weight;
                    *self.total_acquired.lock() += weight as u64;
                    return true;
                }
            }
            let wait = weight / self.refill_rate;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(weight, "rate limiter timeout acquiring weight");
                return false;
            }
            let sleep_time = Duration::from_secs_f64(wait * 0.5)
                .min(remaining)
                .min(Duration::from_secs(1));
            tokio::time::sleep(sleep_time).await;
            *self.total_waited_s.lock() += sleep_time.as_secs_f64();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        RateLimiterStats {
            available: (bucket.tokens * 10.0).round() / 10.0,
            max: self.max,
            total_acquired: *self.total_acquired.lock(),
            total_waited_s: (*self.total_waited_s.lock() * 100.0).round() / 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_budget_applies_safety_percentage() {
        let rl = RateLimiter::new(1200, 85);
        assert_eq!(rl.max, 1020.0);
        assert!((rl.available() - 1020.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn acquire_drains_and_refills_tokens() {
        let rl = RateLimiter::new(1200, 85);
        assert!(rl.acquire(100, Duration::from_secs(1)).await);
        assert!((rl.available() - 920.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn acquire_times_out_when_budget_exhausted() {
        let rl = RateLimiter::new(60, 100); // max=60, refill_rate=1/s
        assert!(rl.acquire(60, Duration::from_millis(10)).await);
        let ok = rl.acquire(60, Duration::from_millis(50)).await;
        assert!(!ok);
    }

    #[test]
    fn stats_reports_available_within_bounds() {
        let rl = RateLimiter::new(1200, 85);
        let s = rl.stats();
        assert!(s.available >= 0.0 && s.available <= s.max);
    }
}
