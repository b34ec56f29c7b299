//! Global request pacing.
//!
//! A token bucket shared by every worker: capacity and refill rate are
//! both the configured requests-per-second, so short bursts up to one
//! second's budget are allowed and the steady-state rate never exceeds
//! it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rate: f64,
    capacity: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing `rps` requests per second with a
    /// burst of the same size. A zero rate disables limiting.
    pub fn per_second(rps: u32) -> Self {
        let rate = f64::from(rps);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            rate,
            capacity: rate,
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        if self.rate <= 0.0 {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Floor the wait so rounding in the deficit can never
                // produce a zero-length sleep and spin the loop.
                Duration::from_secs_f64(((1.0 - bucket.tokens) / self.rate).max(1e-3))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_burst_up_to_capacity() {
        let limiter = RateLimiter::per_second(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_beyond_capacity() {
        let limiter = RateLimiter::per_second(2);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // Two tokens are free; the next two each wait half a second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(950), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "elapsed: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_never_blocks() {
        let limiter = RateLimiter::per_second(0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
