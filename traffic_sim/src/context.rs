//! Simulation context implementing TrafficContext for deterministic testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use traffic_env::{mix_seed, TrafficContext};

/// Simulation context backed by a virtual clock and a master seed.
///
/// This implements `TrafficContext` using:
/// - A virtual clock that only moves when someone sleeps or advances it
/// - Entropy streams derived from one 64-bit seed
///
/// Clones share the clock.
#[derive(Clone)]
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.virtual_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrafficContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // virtual time: sleeping is advancing
        self.advance_time(duration);
    }

    fn derive_seed(&self, stream: u64) -> u64 {
        mix_seed(self.seed, stream)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
