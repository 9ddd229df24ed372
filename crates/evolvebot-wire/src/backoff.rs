//! Exponential reconnect backoff shared by the registry session and the relay
//! client.
//!
//! Starts at `initial`, doubles on every consecutive failure, caps at `max`,
//! and resets to `initial` after a successful handshake. No jitter.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to sleep before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }

    /// The delay the next call to [`Backoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.current
    }
}

impl Default for Backoff {
    /// 1 s doubling to 30 s.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
