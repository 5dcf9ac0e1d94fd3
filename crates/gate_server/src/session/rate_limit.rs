//! Greedy token bucket guarding how fast one session may forward frames.
//!
//! Tokens refill continuously at `refill_per_second`, so a bucket drained
//! at time `t` has one token back after `1 / refill_per_second` seconds
//! rather than waiting for a whole refill period.

use std::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            refill_per_second: f64::from(config.refill_per_second),
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Takes one token if available.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    /// Same as [`TokenBucket::try_consume`] with an explicit clock.
    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available_at(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }
}
