//! Bounded exponential backoff for transient channel failures.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Exponential delay sequence capped at a maximum.
///
/// `next_delay()` returns `initial, initial*m, initial*m^2, ...` up to `max`
/// and stays there until `reset()` is called after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Option<Duration>,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_ms),
            max: Duration::from_millis(config.max_ms.max(config.initial_ms)),
            multiplier: config.multiplier.max(1.0),
            current: None,
            failures: 0,
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(d) => d.mul_f64(self.multiplier).min(self.max),
        };
        self.current = Some(next);
        self.failures += 1;
        next
    }

    /// Clears the failure streak.
    pub fn reset(&mut self) {
        self.current = None;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
