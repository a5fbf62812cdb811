//! Keep-alive tracker for the live push channel.
//!
//! The manager records every frame received from the server and sends a `ping` on each
//! heartbeat tick. When nothing at all has arrived for longer than the idle timeout the
//! channel is considered dead even if the socket never reported an error, which is how
//! half-open TCP connections on mobile networks are detected.
//!
//! Time is measured using `std::time::Instant`, which is monotonic and immune to system
//! clock changes.
use std::time::{Duration, Instant};

/// Tracks the last time the server was heard from.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    last_seen: Instant,
    timeout: Duration,
}

impl LivenessMonitor {
    /// Starts tracking as if a frame had just arrived.
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// Records a frame received now.
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Records a frame received at `at`.
    pub fn record_at(&mut self, at: Instant) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    /// Time since the last frame.
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// `true` once the server has been silent for longer than the timeout.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Same as `is_expired`, evaluated at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.timeout
    }
}
