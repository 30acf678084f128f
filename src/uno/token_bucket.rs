//! Per-court token bucket pacing remote calls at `rpm` with bursts up to `burst`.

use tokio::{sync::Mutex, time::Instant};

/// Capacity and refill rate of a per-court burst limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    /// Sustained requests per minute.
    pub rpm: u32,
    /// Maximum tokens held at once.
    pub burst: u32,
}

impl BucketLimits {
    fn tokens_per_second(&self) -> f64 {
        f64::from(self.rpm) / 60.0
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst)
    }
}

#[derive(Debug)]
struct BucketState {
    limits: BucketLimits,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.limits.tokens_per_second())
                .min(self.limits.capacity());
            self.last_refill = now;
        }
    }
}

/// Short-term burst limiter guarding outbound requests for a single court.
///
/// Starts full. `take` never waits: callers that fail to get a token skip their request.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limits: BucketLimits, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                limits,
                tokens: limits.capacity(),
                last_refill: now,
            }),
        }
    }

    /// Take one token if available.
    pub async fn take(&self, now: Instant) -> bool {
        self.take_n(1, now).await
    }

    /// Atomically take `n` tokens, or none when fewer are available.
    pub async fn take_n(&self, n: u32, now: Instant) -> bool {
        let mut guard = self.state.lock().await;
        guard.refill(now);
        let wanted = f64::from(n);
        if guard.tokens >= wanted {
            guard.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Tokens currently available after refilling up to `now`.
    pub async fn available(&self, now: Instant) -> f64 {
        let mut guard = self.state.lock().await;
        guard.refill(now);
        guard.tokens
    }

    /// Swap in new limits, keeping accrued tokens up to the new capacity.
    pub async fn reconfigure(&self, limits: BucketLimits, now: Instant) {
        let mut guard = self.state.lock().await;
        guard.refill(now);
        guard.limits = limits;
        guard.tokens = guard.tokens.min(limits.capacity());
    }
}
