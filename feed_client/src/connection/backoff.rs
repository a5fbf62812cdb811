//! Bounded exponential backoff with downward jitter.
use std::time::Duration;

use rand::Rng;

/// Delay sequence between reconnect attempts.
///
/// The base delay doubles on every attempt starting from `initial` and never exceeds
/// `max`. Each returned delay is the base scaled by a random factor in `[0.5, 1.0]`, so
/// clients that dropped together do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a fresh sequence.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the given 1-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Advances to the next attempt and returns its jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.base_delay(self.attempt).as_nanos() as u64;
        Duration::from_nanos(rand::rng().random_range(base / 2..=base))
    }

    /// Starts over from `initial`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
