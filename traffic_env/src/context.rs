//! Core environment context trait for simulation processes.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for time and entropy.
///
/// This trait abstracts the "real world" so that the orchestrator and the
/// workers can run against a wall clock in production and a virtual clock
/// in deterministic tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `OsRng`
/// - **Simulation**: `SimContext` - virtual clock, seeded entropy
#[async_trait]
pub trait TrafficContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives a reproducible seed for an entropy stream.
    ///
    /// Workers key their per-tick RNG on `stream`, so the same stream always
    /// yields the same seed for the lifetime of the context.
    fn derive_seed(&self, stream: u64) -> u64;

    /// Returns the context's master seed (for logging/debugging).
    fn seed(&self) -> u64;
}

/// Mixes a master seed with a stream id (splitmix64 finalizer).
pub fn mix_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}
