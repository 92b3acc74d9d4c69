//! Token bucket with a one-second burst capacity

use std::time::Duration;
use tokio::time::Instant;

/// Byte-budget token bucket.
///
/// Capacity equals the per-second rate: a fresh bucket permits a burst of
/// one second's worth of bytes, then sustains the configured rate. Refill
/// is continuous, computed from elapsed time on demand rather than by a
/// background timer, so an idle bucket costs nothing.
///
/// Uses `tokio::time::Instant` so throttle behavior follows the runtime
/// clock in tests.
#[derive(Debug)]
pub struct TokenBucket {
    /// Bytes per second; also the bucket capacity.
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket sustaining `rate_bytes_per_sec`, starting full.
    ///
    /// Callers disable throttling instead of constructing a zero-rate
    /// bucket; a zero rate is clamped to one byte per second.
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let rate = rate_bytes_per_sec.max(1) as f64;
        Self {
            rate,
            tokens: rate,
            last_refill: Instant::now(),
        }
    }

    /// Bucket for a limit expressed in KB/s.
    pub fn from_kbps(kbps: u32) -> Self {
        Self::new(u64::from(kbps) * 1024)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last_refill = now;
    }

    /// Whole tokens currently available.
    pub fn available(&mut self) -> usize {
        self.refill();
        self.tokens as usize
    }

    /// Spend `n` tokens. Callers only consume what `available` granted.
    pub fn consume(&mut self, n: usize) {
        self.tokens = (self.tokens - n as f64).max(0.0);
    }

    /// Time until `n` tokens (capped at capacity) have accumulated.
    pub fn delay_for(&mut self, n: usize) -> Duration {
        self.refill();
        let wanted = (n as f64).min(self.rate);
        let missing = wanted - self.tokens;
        if missing <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(missing / self.rate)
        }
    }
}
