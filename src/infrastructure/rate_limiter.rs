//! Token bucket rate limiter, keyed per agent.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

/// Per-key token bucket state.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Keyed token bucket rate limiter.
///
/// Tokens refill continuously based on elapsed time:
/// `tokens = min(tokens + elapsed_seconds * refill_rate, capacity)`.
/// `try_acquire` consumes a token when one is available and never blocks;
/// callers that are over the limit receive the suggested wait instead.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` acquisitions per key per
    /// minute, with burst capacity equal to the same amount.
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute.max(1));
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity,
            refill_rate: capacity / 60.0,
        }
    }

    /// Try to consume one token for `key`.
    ///
    /// Returns `Ok(())` on success, or `Err(wait_seconds)` with the time
    /// until a token becomes available.
    pub async fn try_acquire(&self, key: &str) -> Result<(), f64> {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(deficit / self.refill_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_capacity() {
        let limiter = RateLimiter::per_minute(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire("agent-a").await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_exhausted_bucket_suggests_wait() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.try_acquire("agent-a").await.is_ok());
        assert!(limiter.try_acquire("agent-a").await.is_ok());

        let wait = limiter.try_acquire("agent-a").await.unwrap_err();
        assert!(wait > 0.0);
        assert!(wait <= 60.0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.try_acquire("agent-a").await.is_ok());
        assert!(limiter.try_acquire("agent-b").await.is_ok());
        assert!(limiter.try_acquire("agent-a").await.is_err());
    }
}
